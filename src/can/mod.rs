//! # CAN Module
//!
//! Operator panel and turret telemetry over SocketCAN.
//!
//! This module handles:
//! - Bus access behind the [`bus::CanBus`] trait
//! - Button press/hold/release state machines ([`buttons`])
//! - Elevation/azimuth decoding ([`angles`])
//! - The reader task that ties them together ([`reader`])

pub mod angles;
pub mod bus;
pub mod buttons;
pub mod reader;
