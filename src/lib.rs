//! # Sight Console Library
//!
//! Core of the operator console for a pan-tilt sighting rig.
//!
//! This library reads a laser rangefinder over serial, decodes operator
//! buttons and turret angles from CAN, republishes the fused reading over CAN
//! and TCP, and keeps the zoom-dependent reticle calibration.

pub mod calibration;
pub mod camera;
pub mod can;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod notify;
pub mod protocol;
pub mod rangefinder;
pub mod recording;
pub mod serial;
pub mod telemetry;
