//! # Sight Console
//!
//! Operator console core for a pan-tilt sighting rig.
//!
//! Runs the rangefinder link, the CAN reader, the telemetry publisher, the
//! zoom tracker, operator notifications and the event router as independent
//! tasks until Ctrl+C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sight_console::calibration::CalibrationStore;
use sight_console::camera::ptz::DetachedPtz;
use sight_console::camera::zoom::{self, ZoomController};
use sight_console::can::buttons::CameraMode;
use sight_console::config::{Config, LoggingConfig, RecordingConfig};
use sight_console::console::Console;
use sight_console::error::ConsoleError;
use sight_console::events::{ConsoleEvent, EventBus};
use sight_console::notify::{self, Notifier};
use sight_console::rangefinder::{self, RangefinderTrigger};
use sight_console::recording::{self, RawFileSink, RecordingSession};
use sight_console::telemetry::{self, record::TelemetrySlot};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/console.toml";

/// Pick the configuration path from the command-line arguments
fn config_path(mut args: impl Iterator<Item = String>) -> PathBuf {
    args.nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load the configuration, falling back to defaults when the file is absent
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    Config::load(path).with_context(|| format!("loading {}", path.display()))
}

/// Install console and rolling-file logging
///
/// The returned guard must live until exit so buffered file records are
/// flushed.
fn init_logging(config: &LoggingConfig) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(&config.dir, &config.file_prefix);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

async fn join<T>(name: &str, handle: JoinHandle<T>) {
    if let Err(e) = handle.await {
        error!("{} task failed: {}", name, e);
    }
}

/// A recording in progress and the task feeding it
struct ActiveRecording {
    session: RecordingSession<RawFileSink>,
    capture: JoinHandle<()>,
}

/// Open the frame source and start recording into `config.dir`
async fn start_recording(
    config: &RecordingConfig,
    events: &EventBus,
    cancel: CancellationToken,
) -> Result<ActiveRecording, ConsoleError> {
    let source = tokio::fs::File::open(&config.source).await.map_err(|e| {
        ConsoleError::Recording(format!("cannot open frame source {}: {}", config.source, e))
    })?;
    let session = RecordingSession::start_in(Path::new(&config.dir), config.queue_capacity).await?;

    let frames = session.frames();
    let frame_bytes = config.frame_bytes;
    let events = events.clone();
    let capture = tokio::spawn(async move {
        match recording::capture(source, frame_bytes, frames, cancel).await {
            Ok(n) => info!("Capture stopped after {} frames", n),
            Err(e) => {
                warn!("Capture failed: {}", e);
                events.publish(ConsoleEvent::fault(&e));
            }
        }
    });
    Ok(ActiveRecording { session, capture })
}

async fn stop_recording(active: ActiveRecording) {
    join("capture", active.capture).await;
    let label = recording::elapsed_label(active.session.elapsed());
    match active.session.stop().await {
        Ok(sink) => info!(
            "Recording {} closed: {} frames ({})",
            sink.path().display(),
            sink.frames(),
            label
        ),
        Err(e) => error!("Recording did not close cleanly: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path(std::env::args());
    let config = load_config(&path)?;
    let _log_guard = init_logging(&config.logging);

    info!("Sight Console v{} starting...", env!("CARGO_PKG_VERSION"));
    if path.exists() {
        info!("Configuration loaded from {}", path.display());
    } else {
        warn!("{} not found, using built-in defaults", path.display());
    }

    let events = EventBus::default();
    let cancel = CancellationToken::new();

    let slot = TelemetrySlot::new(
        config.telemetry.initial_elevation,
        config.telemetry.initial_azimuth,
    );
    let calibration =
        CalibrationStore::open(&config.calibration, CameraMode::Day, config.camera.initial_zoom)
            .into_shared();
    let zoom_tracker = Arc::new(tokio::sync::Mutex::new(ZoomController::from_config(
        DetachedPtz::new(config.camera.initial_zoom),
        DetachedPtz::new(config.camera.initial_zoom),
        calibration.clone(),
        &config.camera,
        &config.calibration,
    )));
    let (trigger, triggers) = RangefinderTrigger::channel();

    // Consumers subscribe here, before anything that can publish is spawned.
    let notifier = tokio::spawn(notify::run(
        Notifier::from_config(&config.notifications),
        events.subscribe(),
        cancel.clone(),
    ));
    let console = Console::new(
        zoom_tracker.clone(),
        calibration.clone(),
        slot.clone(),
        trigger,
        config.calibration.nudge_step_px,
    );
    let console = {
        let rx = events.subscribe();
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            console.run(rx, events, cancel).await;
        })
    };

    let publisher = if config.telemetry.enabled {
        Some(tokio::spawn(telemetry::run(
            config.telemetry.clone(),
            config.can.clone(),
            slot.clone(),
            events.clone(),
            cancel.clone(),
        )))
    } else {
        info!("Telemetry egress disabled");
        None
    };
    let zoom_sync = tokio::spawn(zoom::run_sync(
        zoom_tracker,
        Duration::from_millis(config.camera.zoom_sync_interval_ms),
        events.clone(),
        cancel.clone(),
    ));

    let rangefinder = {
        let serial = config.serial.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            // Failure was already published; the link stays down until restart.
            let _ = rangefinder::run(serial, triggers, events, cancel).await;
        })
    };
    let can_reader = {
        let config = config.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = sight_console::can::reader::run(config, events, cancel).await;
        })
    };

    let recording = if config.recording.enabled {
        match start_recording(&config.recording, &events, cancel.clone()).await {
            Ok(active) => {
                info!("Recording from {} into {}", config.recording.source, config.recording.dir);
                Some(active)
            }
            Err(e) => {
                warn!("Recording disabled: {}", e);
                events.publish(ConsoleEvent::fault(&e));
                None
            }
        }
    } else {
        None
    };

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();

    // Producers first, then the components consuming their events.
    join("rangefinder", rangefinder).await;
    join("CAN reader", can_reader).await;
    if let Some(active) = recording {
        stop_recording(active).await;
    }
    if let Some(publisher) = publisher {
        join("telemetry", publisher).await;
    }
    join("zoom sync", zoom_sync).await;
    join("console", console).await;
    join("notifier", notifier).await;

    match calibration.lock() {
        Ok(store) => info!("Calibration kept in {}", store.path().display()),
        Err(_) => warn!("Calibration store lock poisoned at shutdown"),
    }
    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_defaults() {
        let args = vec!["sight-console".to_string()];
        assert_eq!(config_path(args.into_iter()), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn test_config_path_from_first_argument() {
        let args = vec!["sight-console".to_string(), "/etc/console.toml".to_string()];
        assert_eq!(config_path(args.into_iter()), PathBuf::from("/etc/console.toml"));
    }

    #[test]
    fn test_missing_config_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.serial.baud_rate, 115200);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("console.toml");
        std::fs::write(&path, "[serial]\nbaud_rate = 1234\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[tokio::test]
    async fn test_recording_runs_until_source_ends() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("frames.bin");
        std::fs::write(&source, [7u8; 12]).unwrap();
        let config = RecordingConfig {
            enabled: true,
            dir: dir.path().join("out").to_string_lossy().into_owned(),
            source: source.to_string_lossy().into_owned(),
            frame_bytes: 4,
            ..RecordingConfig::default()
        };

        let active = start_recording(&config, &EventBus::default(), CancellationToken::new())
            .await
            .unwrap();
        stop_recording(active).await;

        let written: Vec<_> = std::fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert_eq!(written.len(), 1);
        let bytes = std::fs::read(written[0].as_ref().unwrap().path()).unwrap();
        assert_eq!(bytes.len(), 3 * (4 + 4));
    }

    #[tokio::test]
    async fn test_missing_frame_source_is_a_recording_fault() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = RecordingConfig {
            enabled: true,
            dir: dir.path().to_string_lossy().into_owned(),
            source: dir.path().join("absent").to_string_lossy().into_owned(),
            ..RecordingConfig::default()
        };

        let result = start_recording(&config, &EventBus::default(), CancellationToken::new()).await;
        assert!(matches!(result, Err(ConsoleError::Recording(_))));
    }
}
