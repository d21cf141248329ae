//! # Camera Module
//!
//! PTZ control seam and the zoom tracker that keeps reticle calibration in
//! step with the lens.

pub mod ptz;
pub mod zoom;
