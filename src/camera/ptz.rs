//! PTZ collaborator interface
//!
//! Pan, tilt and zoom are normalised ONVIF coordinates; zoom runs from 0.0
//! (wide) to 1.0 (full telephoto).

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;

/// Camera PTZ control surface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PtzControl: Send + Sync {
    /// Move relative to the current position
    async fn relative_move(&self, pan: f64, tilt: f64, zoom: f64) -> Result<()>;

    /// Move to an absolute position
    async fn absolute_move(&self, pan: f64, tilt: f64, zoom: f64) -> Result<()>;

    /// Zoom the camera currently reports
    async fn current_zoom(&self) -> Result<f64>;
}

/// Stand-in PTZ for a camera with no control channel attached
///
/// Accepts every move and reports the zoom it was last told to reach, so
/// the zoom tracker never sees drift.
#[derive(Debug, Default)]
pub struct DetachedPtz {
    zoom: Mutex<f64>,
}

impl DetachedPtz {
    pub fn new(initial_zoom: f64) -> Self {
        Self {
            zoom: Mutex::new(initial_zoom.clamp(0.0, 1.0)),
        }
    }

    fn set(&self, apply: impl FnOnce(f64) -> f64) -> f64 {
        let mut zoom = self.zoom.lock().unwrap_or_else(|p| p.into_inner());
        *zoom = apply(*zoom).clamp(0.0, 1.0);
        *zoom
    }
}

#[async_trait]
impl PtzControl for DetachedPtz {
    async fn relative_move(&self, pan: f64, tilt: f64, zoom: f64) -> Result<()> {
        let now = self.set(|z| z + zoom);
        debug!("Detached PTZ relative move ({}, {}, {}) -> zoom {:.2}", pan, tilt, zoom, now);
        Ok(())
    }

    async fn absolute_move(&self, pan: f64, tilt: f64, zoom: f64) -> Result<()> {
        self.set(|_| zoom);
        debug!("Detached PTZ absolute move ({}, {}, {})", pan, tilt, zoom);
        Ok(())
    }

    async fn current_zoom(&self) -> Result<f64> {
        Ok(self.set(|z| z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detached_tracks_commanded_zoom() {
        let ptz = DetachedPtz::new(0.0);
        ptz.relative_move(0.0, 0.0, 0.05).await.unwrap();
        ptz.relative_move(0.0, 0.0, 0.05).await.unwrap();
        assert!((ptz.current_zoom().await.unwrap() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_detached_clamps_zoom() {
        let ptz = DetachedPtz::new(0.98);
        ptz.relative_move(0.0, 0.0, 0.05).await.unwrap();
        assert_eq!(ptz.current_zoom().await.unwrap(), 1.0);
        ptz.absolute_move(0.0, 0.0, -3.0).await.unwrap();
        assert_eq!(ptz.current_zoom().await.unwrap(), 0.0);
    }
}
