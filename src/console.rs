//! # Console
//!
//! Routes events between components: panel buttons drive the zoom tracker,
//! the camera mode and the laser; rangefinder and turret readings feed the
//! telemetry slot.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calibration::{Offset, SharedCalibration};
use crate::camera::ptz::PtzControl;
use crate::camera::zoom::ZoomController;
use crate::can::buttons::{Action, ButtonEvent, CameraMode};
use crate::error::{ConsoleError, Result};
use crate::events::{ConsoleEvent, EventBus};
use crate::rangefinder::RangefinderTrigger;
use crate::telemetry::record::TelemetrySlot;

/// Zoom tracker shared with the sync task
pub type SharedZoom<P> = Arc<tokio::sync::Mutex<ZoomController<P>>>;

/// Event router and owner of operator-facing state
pub struct Console<P: PtzControl> {
    zoom: SharedZoom<P>,
    calibration: SharedCalibration,
    slot: TelemetrySlot,
    trigger: RangefinderTrigger,
    nudge_step: i32,
    reticle_locked: bool,
}

impl<P: PtzControl> Console<P> {
    pub fn new(
        zoom: SharedZoom<P>,
        calibration: SharedCalibration,
        slot: TelemetrySlot,
        trigger: RangefinderTrigger,
        nudge_step: i32,
    ) -> Self {
        Self {
            zoom,
            calibration,
            slot,
            trigger,
            nudge_step,
            reticle_locked: false,
        }
    }

    pub fn reticle_locked(&self) -> bool {
        self.reticle_locked
    }

    fn with_calibration<T>(&self, f: impl FnOnce(&mut crate::calibration::CalibrationStore) -> T) -> Result<T> {
        let mut store = self
            .calibration
            .lock()
            .map_err(|_| ConsoleError::Calibration("calibration store lock poisoned".into()))?;
        Ok(f(&mut store))
    }

    pub fn camera_mode(&self) -> Result<CameraMode> {
        self.with_calibration(|store| store.mode())
    }

    /// Current reticle offset for the active camera and zoom
    pub fn reticle_offset(&self) -> Result<Offset> {
        self.with_calibration(|store| store.current())
    }

    /// Move the reticle by `steps` nudge increments on each axis
    ///
    /// Ignored while the reticle is locked.
    pub fn nudge_reticle(&self, steps_x: i32, steps_y: i32) -> Result<Offset> {
        if self.reticle_locked {
            debug!("Reticle locked; nudge ignored");
            return self.reticle_offset();
        }
        let dx = steps_x.saturating_mul(self.nudge_step);
        let dy = steps_y.saturating_mul(self.nudge_step);
        self.with_calibration(|store| store.nudge(dx, dy))?
    }

    pub fn save_offset(&self) -> Result<()> {
        self.with_calibration(|store| store.save_current())?
    }

    pub fn reset_offset(&self) -> Result<()> {
        self.with_calibration(|store| store.reset_current())?
    }

    async fn handle_button(&mut self, button: ButtonEvent) -> Result<()> {
        match button.action {
            Action::ZoomIn => {
                self.zoom.lock().await.zoom_in().await?;
            }
            Action::ZoomOut => {
                self.zoom.lock().await.zoom_out().await?;
            }
            Action::SwitchCamera => {
                if let Some(mode) = button.mode {
                    if self.with_calibration(|store| store.set_mode(mode))? {
                        info!("Camera -> {}", mode.as_str());
                    }
                }
            }
            Action::ReticleToggle => {
                self.reticle_locked = !self.reticle_locked;
                info!("Reticle {}", if self.reticle_locked { "locked" } else { "unlocked" });
            }
            Action::Laser => {
                if !self.trigger.fire() {
                    debug!("Measurement already pending");
                }
            }
        }
        Ok(())
    }

    /// Apply one event
    pub async fn handle(&mut self, event: ConsoleEvent) -> Result<()> {
        match event {
            ConsoleEvent::Button(button) => self.handle_button(button).await?,
            ConsoleEvent::Distance(sample) => {
                if let Some(distance) = sample.primary() {
                    self.slot.update_distance(distance);
                }
            }
            ConsoleEvent::Angles(angles) => {
                self.slot
                    .update_angles(angles.elevation_degrees, angles.azimuth_degrees);
            }
            ConsoleEvent::Fault { .. } => {}
        }
        Ok(())
    }

    /// Route events from `rx` until cancelled
    ///
    /// `rx` is subscribed by the caller, so nothing published between
    /// spawning and the first poll is missed. Action failures go to `events`.
    pub async fn run(
        mut self,
        mut rx: broadcast::Receiver<ConsoleEvent>,
        events: EventBus,
        cancel: CancellationToken,
    ) -> Self {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => event,
            };

            match event {
                Ok(event) => {
                    if let Err(e) = self.handle(event).await {
                        warn!("Console action failed: {}", e);
                        events.publish(ConsoleEvent::fault(&e));
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Console lagged; {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }

        self
    }
}
