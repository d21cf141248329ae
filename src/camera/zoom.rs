//! Local zoom tracking with periodic correction from the camera
//!
//! Zoom buttons move the camera by a fixed step and update a local estimate
//! straight away, so the reticle offset follows without a round trip. A
//! periodic sync reads the real zoom back and adopts it when the estimate
//! has drifted past the tolerance.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ptz::PtzControl;
use crate::calibration::SharedCalibration;
use crate::can::buttons::CameraMode;
use crate::config::{CalibrationConfig, CameraConfig};
use crate::error::{ConsoleError, Result};
use crate::events::{ConsoleEvent, EventBus};

/// Default bound on one PTZ request
pub const DEFAULT_PTZ_TIMEOUT: Duration = Duration::from_secs(1);

/// Zoom tracker for the day and night cameras
pub struct ZoomController<P: PtzControl> {
    day: P,
    night: P,
    calibration: SharedCalibration,
    step: f64,
    tolerance: f64,
    local_zoom: f64,
    ptz_timeout: Duration,
}

impl<P: PtzControl> ZoomController<P> {
    pub fn new(
        day: P,
        night: P,
        calibration: SharedCalibration,
        step: f64,
        tolerance: f64,
        initial_zoom: f64,
    ) -> Self {
        Self {
            day,
            night,
            calibration,
            step,
            tolerance,
            local_zoom: initial_zoom.clamp(0.0, 1.0),
            ptz_timeout: DEFAULT_PTZ_TIMEOUT,
        }
    }

    /// Bound how long a move or zoom query may take before it fails
    pub fn with_ptz_timeout(mut self, ptz_timeout: Duration) -> Self {
        self.ptz_timeout = ptz_timeout;
        self
    }

    pub fn from_config(
        day: P,
        night: P,
        calibration: SharedCalibration,
        camera: &CameraConfig,
        cal: &CalibrationConfig,
    ) -> Self {
        Self::new(
            day,
            night,
            calibration,
            cal.zoom_step,
            camera.zoom_sync_tolerance,
            camera.initial_zoom,
        )
        .with_ptz_timeout(camera.ptz_timeout())
    }

    pub fn local_zoom(&self) -> f64 {
        self.local_zoom
    }

    fn active_mode(&self) -> Result<CameraMode> {
        self.calibration
            .lock()
            .map(|store| store.mode())
            .map_err(|_| ConsoleError::Calibration("calibration store lock poisoned".into()))
    }

    fn active_ptz(&self) -> Result<&P> {
        Ok(match self.active_mode()? {
            CameraMode::Day => &self.day,
            CameraMode::Night => &self.night,
        })
    }

    fn publish_zoom(&self) -> Result<()> {
        let mut store = self
            .calibration
            .lock()
            .map_err(|_| ConsoleError::Calibration("calibration store lock poisoned".into()))?;
        store.set_zoom(self.local_zoom);
        Ok(())
    }

    async fn bounded<T>(&self, request: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.ptz_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(ConsoleError::Camera(format!(
                    "PTZ {} timed out after {:?}",
                    request, self.ptz_timeout
                )))
            })
    }

    async fn step_zoom(&mut self, delta: f64) -> Result<f64> {
        let ptz = self.active_ptz()?;
        self.bounded("relative move", ptz.relative_move(0.0, 0.0, delta))
            .await?;
        self.local_zoom = (self.local_zoom + delta).clamp(0.0, 1.0);
        self.publish_zoom()?;
        debug!("Zoom -> {:.2}", self.local_zoom);
        Ok(self.local_zoom)
    }

    /// Zoom in one step
    ///
    /// # Returns
    ///
    /// The new local zoom estimate
    ///
    /// # Errors
    ///
    /// Returns the PTZ error, or `Camera` if the request outlives the PTZ
    /// timeout; the local estimate is left unchanged.
    pub async fn zoom_in(&mut self) -> Result<f64> {
        self.step_zoom(self.step).await
    }

    /// Zoom out one step
    pub async fn zoom_out(&mut self) -> Result<f64> {
        self.step_zoom(-self.step).await
    }

    /// Compare the local estimate with the camera and correct it
    ///
    /// # Returns
    ///
    /// `true` if the estimate was replaced by the camera's value
    pub async fn sync(&mut self) -> Result<bool> {
        let ptz = self.active_ptz()?;
        let actual = self.bounded("zoom query", ptz.current_zoom()).await?;
        if (actual - self.local_zoom).abs() <= self.tolerance {
            return Ok(false);
        }

        info!("Zoom corrected: {:.2} -> {:.2}", self.local_zoom, actual);
        self.local_zoom = actual.clamp(0.0, 1.0);
        let mut store = self
            .calibration
            .lock()
            .map_err(|_| ConsoleError::Calibration("calibration store lock poisoned".into()))?;
        store.set_zoom(self.local_zoom);
        store.reload_current();
        Ok(true)
    }
}

/// Periodically run [`ZoomController::sync`] until cancelled
///
/// The controller is shared with the console, which drives the zoom
/// buttons through the same lock.
pub async fn run_sync<P: PtzControl>(
    controller: std::sync::Arc<tokio::sync::Mutex<ZoomController<P>>>,
    period: Duration,
    events: EventBus,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = controller.lock().await.sync().await {
                    warn!("Zoom sync failed: {}", e);
                    events.publish(ConsoleEvent::fault(&e));
                }
            }
        }
    }
}
