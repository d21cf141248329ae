//! # Rangefinder Frame Protocol
//!
//! Binary framing used by the laser rangefinder over its serial link.
//!
//! This module handles:
//! - XOR checksum calculation
//! - Frame encoding (start byte, command, length, payload, checksum)
//! - Frame decoding from a byte slice or a live serial stream
//! - Resynchronisation on the start byte

pub mod checksum;
pub mod decoder;
pub mod encoder;
pub mod frame;
