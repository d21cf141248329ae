//! # Reticle Calibration
//!
//! Per-camera, per-zoom reticle offsets.
//!
//! Zoom is quantized to an integer bucket index before it is used as a key,
//! so two zoom readings that round to the same step always share an offset.

pub mod store;

pub use store::{CalibrationStore, Offset, SharedCalibration};

/// Quantized zoom level
///
/// The index counts zoom steps from zero: with a step of 0.05, zoom 0.35 is
/// bucket 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoomBucket(pub u32);

impl ZoomBucket {
    /// Round `zoom` to the nearest step
    ///
    /// Negative zoom maps to bucket 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use sight_console::calibration::ZoomBucket;
    ///
    /// assert_eq!(ZoomBucket::quantize(0.34, 0.05), ZoomBucket(7));
    /// assert_eq!(ZoomBucket::quantize(0.36, 0.05), ZoomBucket(7));
    /// ```
    pub fn quantize(zoom: f64, step: f64) -> Self {
        let index = (zoom / step).round();
        if index.is_finite() && index > 0.0 {
            ZoomBucket(index as u32)
        } else {
            ZoomBucket(0)
        }
    }

    /// Zoom value at the centre of this bucket
    pub fn zoom(&self, step: f64) -> f64 {
        f64::from(self.0) * step
    }

    /// Key used in the persisted file, e.g. `"0.35"`
    ///
    /// Uses at least two decimals, and as many more as `step` needs for
    /// every bucket to get a distinct key.
    pub fn file_key(&self, step: f64) -> String {
        format!("{:.*}", key_decimals(step), self.zoom(step))
    }

    /// Parse a persisted key back into a bucket
    pub fn from_file_key(key: &str, step: f64) -> Option<Self> {
        key.trim().parse::<f64>().ok().map(|zoom| Self::quantize(zoom, step))
    }
}

/// Decimal places needed to write multiples of `step` exactly
fn key_decimals(step: f64) -> usize {
    const MAX_DECIMALS: usize = 9;
    let mut scale = 100.0;
    for decimals in 2..MAX_DECIMALS {
        let scaled = step * scale;
        if (scaled - scaled.round()).abs() < 1e-6 {
            return decimals;
        }
        scale *= 10.0;
    }
    MAX_DECIMALS
}
