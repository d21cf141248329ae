//! Calibration store: (camera mode, zoom bucket) -> reticle offset
//!
//! The persisted file maps mode to zoom key to `[offset_x, offset_y]`:
//!
//! ```json
//! {
//!   "day": {
//!     "0.35": [12, -4]
//!   }
//! }
//! ```
//!
//! The whole file is rewritten after every mutation.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use super::ZoomBucket;
use crate::can::buttons::CameraMode;
use crate::config::CalibrationConfig;
use crate::error::{ConsoleError, Result};

/// Store shared between the console and the zoom tracker
pub type SharedCalibration = Arc<Mutex<CalibrationStore>>;

/// Reticle displacement in pixels from the viewport centre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Offset {
    pub x: i32,
    pub y: i32,
}

impl Offset {
    pub const ZERO: Offset = Offset { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

type FileLayout = BTreeMap<String, BTreeMap<String, [i32; 2]>>;

/// Zoom-dependent reticle offsets with write-through persistence
#[derive(Debug)]
pub struct CalibrationStore {
    path: PathBuf,
    zoom_step: f64,
    max_x: i32,
    max_y: i32,
    entries: BTreeMap<(CameraMode, ZoomBucket), Offset>,
    mode: CameraMode,
    zoom: f64,
    current: Offset,
    dirty: bool,
}

impl CalibrationStore {
    /// Open the store, loading any persisted offsets
    ///
    /// A missing file starts an empty store. An unreadable file is logged
    /// and also starts empty; it is replaced on the next mutation.
    pub fn open(config: &CalibrationConfig, mode: CameraMode, zoom: f64) -> Self {
        let mut store = Self {
            path: PathBuf::from(&config.path),
            zoom_step: config.zoom_step,
            max_x: config.viewport_width / 2 - config.margin_px,
            max_y: config.viewport_height / 2 - config.margin_px,
            entries: BTreeMap::new(),
            mode,
            zoom,
            current: Offset::ZERO,
            dirty: true,
        };

        match store.load() {
            Ok(count) => info!("Loaded {} reticle offsets from {}", count, store.path.display()),
            Err(e) => warn!("Ignoring calibration file {}: {}", store.path.display(), e),
        }
        store.current = store.lookup(mode, zoom);
        store
    }

    /// Reload entries from disk, replacing those in memory
    ///
    /// # Returns
    ///
    /// Number of entries loaded
    pub fn load(&mut self) -> Result<usize> {
        self.entries = read_file(&self.path, self.zoom_step)?;
        Ok(self.entries.len())
    }

    /// Write every entry to disk
    ///
    /// Writes a sibling temp file, syncs it, and renames it over the target.
    pub fn persist(&self) -> Result<()> {
        let mut layout = FileLayout::new();
        for (&(mode, bucket), offset) in &self.entries {
            layout
                .entry(mode.as_str().to_string())
                .or_default()
                .insert(bucket.file_key(self.zoom_step), [offset.x, offset.y]);
        }

        let json = serde_json::to_string_pretty(&layout)?;
        let tmp = self.path.with_extension("json.tmp");
        write_synced(&tmp, json.as_bytes()).map_err(|e| {
            ConsoleError::Calibration(format!("write {}: {}", tmp.display(), e))
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            ConsoleError::Calibration(format!("replace {}: {}", self.path.display(), e))
        })?;
        debug!("Saved {} reticle offsets", self.entries.len());
        Ok(())
    }

    fn bucket(&self, zoom: f64) -> ZoomBucket {
        ZoomBucket::quantize(zoom, self.zoom_step)
    }

    /// Offset stored for `(mode, zoom)`, or zero
    pub fn lookup(&self, mode: CameraMode, zoom: f64) -> Offset {
        self.entries
            .get(&(mode, self.bucket(zoom)))
            .copied()
            .unwrap_or(Offset::ZERO)
    }

    /// Offset currently applied to the reticle
    pub fn current(&self) -> Offset {
        self.current
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn current_bucket(&self) -> ZoomBucket {
        self.bucket(self.zoom)
    }

    /// Largest allowed `|x|` and `|y|`
    pub fn bounds(&self) -> (i32, i32) {
        (self.max_x, self.max_y)
    }

    fn clamp(&self, offset: Offset) -> Offset {
        Offset {
            x: offset.x.clamp(-self.max_x, self.max_x),
            y: offset.y.clamp(-self.max_y, self.max_y),
        }
    }

    /// Move the current offset and persist it
    ///
    /// Both axes saturate at `±(half_viewport - margin)`.
    ///
    /// # Errors
    ///
    /// Returns `Calibration` or `Json` if the file cannot be written. The
    /// in-memory offset is updated either way.
    pub fn nudge(&mut self, dx: i32, dy: i32) -> Result<Offset> {
        let moved = Offset {
            x: self.current.x.saturating_add(dx),
            y: self.current.y.saturating_add(dy),
        };
        self.current = self.clamp(moved);
        self.entries.insert((self.mode, self.current_bucket()), self.current);
        self.dirty = true;
        debug!(
            "Reticle {} @ {}: ({}, {})",
            self.mode.as_str(),
            self.current_bucket().file_key(self.zoom_step),
            self.current.x,
            self.current.y
        );
        self.persist()?;
        Ok(self.current)
    }

    /// Store the current offset under the active key and persist
    pub fn save_current(&mut self) -> Result<()> {
        self.entries.insert((self.mode, self.current_bucket()), self.current);
        self.persist()?;
        info!(
            "Saved reticle offset ({}, {}) for {} @ {}",
            self.current.x,
            self.current.y,
            self.mode.as_str(),
            self.current_bucket().file_key(self.zoom_step)
        );
        Ok(())
    }

    /// Zero the offset for the active key and persist
    pub fn reset_current(&mut self) -> Result<()> {
        self.current = Offset::ZERO;
        self.dirty = true;
        self.save_current()
    }

    /// Switch camera mode, reloading the offset if it changed
    ///
    /// # Returns
    ///
    /// `true` if the mode changed
    pub fn set_mode(&mut self, mode: CameraMode) -> bool {
        if mode == self.mode {
            return false;
        }
        self.mode = mode;
        self.reload_current();
        true
    }

    /// Record a new zoom level, reloading the offset on a bucket change
    ///
    /// # Returns
    ///
    /// `true` if the zoom bucket changed
    pub fn set_zoom(&mut self, zoom: f64) -> bool {
        let before = self.current_bucket();
        self.zoom = zoom;
        if self.current_bucket() == before {
            return false;
        }
        self.reload_current();
        true
    }

    /// Re-read the current offset for the active key
    pub fn reload_current(&mut self) {
        self.current = self.lookup(self.mode, self.zoom);
        self.dirty = true;
    }

    /// Whether the reticle needs redrawing; clears the flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_shared(self) -> SharedCalibration {
        Arc::new(Mutex::new(self))
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn read_file(path: &Path, zoom_step: f64) -> Result<BTreeMap<(CameraMode, ZoomBucket), Offset>> {
    let mut entries = BTreeMap::new();
    if !path.exists() {
        return Ok(entries);
    }

    let contents = fs::read_to_string(path)?;
    let layout: FileLayout = serde_json::from_str(&contents)?;

    for (mode_key, zooms) in layout {
        let mode = match mode_key.as_str() {
            "day" => CameraMode::Day,
            "night" => CameraMode::Night,
            other => {
                warn!("Unknown camera mode {:?} in calibration file", other);
                continue;
            }
        };
        for (zoom_key, [x, y]) in zooms {
            match ZoomBucket::from_file_key(&zoom_key, zoom_step) {
                Some(bucket) => {
                    entries.insert((mode, bucket), Offset::new(x, y));
                }
                None => warn!("Bad zoom key {:?} in calibration file", zoom_key),
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CalibrationConfig {
        CalibrationConfig {
            path: dir.path().join("crosshair.json").to_string_lossy().into_owned(),
            ..CalibrationConfig::default()
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.0);
        assert_eq!(store.current(), Offset::ZERO);
        assert_eq!(store.lookup(CameraMode::Night, 0.5), Offset::ZERO);
    }

    #[test]
    fn test_nudge_then_lookup() {
        let dir = TempDir::new().unwrap();
        let mut store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.35);

        store.nudge(5, -3).unwrap();
        let offset = store.nudge(1, 0).unwrap();
        assert_eq!(offset, Offset::new(6, -3));
        assert_eq!(store.lookup(CameraMode::Day, 0.36), offset);
        assert_eq!(store.lookup(CameraMode::Night, 0.35), Offset::ZERO);
    }

    #[test]
    fn test_nudge_persists_and_reloads() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        {
            let mut store = CalibrationStore::open(&cfg, CameraMode::Night, 0.35);
            store.nudge(12, 4).unwrap();
            store.set_mode(CameraMode::Day);
            store.nudge(-7, 0).unwrap();
        }

        let contents = fs::read_to_string(&cfg.path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(json["night"]["0.35"], serde_json::json!([12, 4]));
        assert_eq!(json["day"]["0.35"], serde_json::json!([-7, 0]));

        let reopened = CalibrationStore::open(&cfg, CameraMode::Night, 0.35);
        assert_eq!(reopened.current(), Offset::new(12, 4));
        assert_eq!(reopened.lookup(CameraMode::Day, 0.35), Offset::new(-7, 0));
    }

    #[test]
    fn test_fine_zoom_step_reloads_same_buckets() {
        let dir = TempDir::new().unwrap();
        let cfg = CalibrationConfig {
            zoom_step: 0.005,
            ..config(&dir)
        };
        {
            let mut store = CalibrationStore::open(&cfg, CameraMode::Day, 0.005);
            store.nudge(10, 0).unwrap();
            store.set_zoom(0.010);
            store.nudge(0, 5).unwrap();
        }

        let reopened = CalibrationStore::open(&cfg, CameraMode::Day, 0.005);
        assert_eq!(reopened.lookup(CameraMode::Day, 0.005), Offset::new(10, 0));
        assert_eq!(reopened.lookup(CameraMode::Day, 0.010), Offset::new(0, 5));
    }

    #[test]
    fn test_persist_replaces_file_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut store = CalibrationStore::open(&cfg, CameraMode::Day, 0.0);
        store.nudge(1, 2).unwrap();
        store.nudge(1, 2).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["crosshair.json".to_string()]);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&cfg.path).unwrap()).unwrap();
        assert_eq!(json["day"]["0.00"], serde_json::json!([2, 4]));
    }

    #[test]
    fn test_clamp_positive_and_negative() {
        let dir = TempDir::new().unwrap();
        let mut store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.0);
        assert_eq!(store.bounds(), (620, 340));

        assert_eq!(store.nudge(10_000, 10_000).unwrap(), Offset::new(620, 340));
        assert_eq!(store.nudge(1, 1).unwrap(), Offset::new(620, 340));
        assert_eq!(store.nudge(i32::MIN, -10_000).unwrap(), Offset::new(-620, -340));
        assert_eq!(store.nudge(-1, -1).unwrap(), Offset::new(-620, -340));
    }

    #[test]
    fn test_zoom_bucket_change_reloads_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.30);
        store.nudge(3, 3).unwrap();

        assert!(store.set_zoom(0.35));
        assert_eq!(store.current(), Offset::ZERO);
        store.nudge(-9, 0).unwrap();

        assert!(!store.set_zoom(0.34));
        assert!(store.set_zoom(0.30));
        assert_eq!(store.current(), Offset::new(3, 3));
    }

    #[test]
    fn test_mode_change_reloads_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.0);
        store.nudge(2, 2).unwrap();

        assert!(store.set_mode(CameraMode::Night));
        assert_eq!(store.current(), Offset::ZERO);
        assert!(!store.set_mode(CameraMode::Night));
        assert!(store.set_mode(CameraMode::Day));
        assert_eq!(store.current(), Offset::new(2, 2));
    }

    #[test]
    fn test_reset_current() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let mut store = CalibrationStore::open(&cfg, CameraMode::Day, 0.5);
        store.nudge(8, 8).unwrap();
        store.reset_current().unwrap();
        assert_eq!(store.current(), Offset::ZERO);

        let reopened = CalibrationStore::open(&cfg, CameraMode::Day, 0.5);
        assert_eq!(reopened.current(), Offset::ZERO);
    }

    #[test]
    fn test_dirty_flag() {
        let dir = TempDir::new().unwrap();
        let mut store = CalibrationStore::open(&config(&dir), CameraMode::Day, 0.0);
        assert!(store.take_dirty());
        assert!(!store.take_dirty());
        store.nudge(1, 0).unwrap();
        assert!(store.take_dirty());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        fs::write(&cfg.path, "not json").unwrap();

        let mut store = CalibrationStore::open(&cfg, CameraMode::Day, 0.0);
        assert_eq!(store.current(), Offset::ZERO);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_unwritable_path_reports_error() {
        let dir = TempDir::new().unwrap();
        let cfg = CalibrationConfig {
            path: dir.path().join("missing/dir/crosshair.json").to_string_lossy().into_owned(),
            ..CalibrationConfig::default()
        };
        let mut store = CalibrationStore::open(&cfg, CameraMode::Day, 0.0);
        let err = store.nudge(1, 1).unwrap_err();
        assert!(matches!(err, ConsoleError::Calibration(_)));
        assert_eq!(store.current(), Offset::new(1, 1));
    }
}
