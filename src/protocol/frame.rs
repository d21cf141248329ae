//! # Rangefinder Frame Constants and Types
//!
//! Frame structure on the wire:
//!
//! ```text
//! STX(0x55) | CMD | LEN | DATA[LEN] | CHK
//! ```
//!
//! where `CHK = XOR(STX..DATA)`.

use super::checksum::xor_checksum;
use crate::error::{ConsoleError, Result};

/// Frame start byte (always 0x55)
pub const START_BYTE: u8 = 0x55;

/// Single-shot measurement command / response
pub const CMD_SINGLE_SHOT: u8 = 0x01;

/// Continuous measurement command / response
pub const CMD_CONTINUOUS: u8 = 0x02;

/// Target-mode selection command
pub const CMD_SET_TARGET_MODE: u8 = 0x22;

/// Declared payload length of every distance response
pub const DISTANCE_RESPONSE_LENGTH: u8 = 0x0A;

/// Largest payload a one-byte length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Frame overhead: start(1) + command(1) + length(1) + checksum(1)
pub const FRAME_OVERHEAD: usize = 4;

/// Total size of a distance response frame (4 + 10)
pub const DISTANCE_FRAME_SIZE: usize = FRAME_OVERHEAD + DISTANCE_RESPONSE_LENGTH as usize;

/// Pre-built single-shot request
pub const FRAME_SINGLE_SHOT: [u8; 6] = [0x55, 0x01, 0x02, 0x00, 0x00, 0x56];

/// Pre-built continuous request (interval argument 0x03E8)
pub const FRAME_CONTINUOUS: [u8; 6] = [0x55, 0x02, 0x02, 0x03, 0xE8, 0xBE];

/// Pre-built single-target mode request
pub const FRAME_SINGLE_TARGET_MODE: [u8; 6] = [0x55, 0x22, 0x02, 0x00, 0x00, 0x77];

/// A rangefinder frame
///
/// Invariants: `length == payload.len()` and `checksum` equals the XOR of
/// the start byte, command, length and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Start byte (always [`START_BYTE`])
    pub start_byte: u8,

    /// Command byte
    pub command: u8,

    /// Declared payload length
    pub length: u8,

    /// Payload bytes
    pub payload: Vec<u8>,

    /// Trailing XOR checksum
    pub checksum: u8,
}

impl Frame {
    /// Create a new frame, computing length and checksum
    ///
    /// # Errors
    ///
    /// Returns error if payload exceeds [`MAX_PAYLOAD_SIZE`] (255 bytes)
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ConsoleError::Transport(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let length = payload.len() as u8;
        let mut header = vec![START_BYTE, command, length];
        header.extend_from_slice(&payload);
        let checksum = xor_checksum(&header);

        Ok(Self {
            start_byte: START_BYTE,
            command,
            length,
            payload,
            checksum,
        })
    }

    /// Bytes covered by the checksum: start + command + length + payload
    pub fn checked_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3 + self.payload.len());
        bytes.push(self.start_byte);
        bytes.push(self.command);
        bytes.push(self.length);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Complete wire representation including the checksum trailer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.checked_bytes();
        bytes.push(self.checksum);
        bytes
    }

    /// Whether this is a single-shot or continuous distance response
    pub fn is_distance_response(&self) -> bool {
        matches!(self.command, CMD_SINGLE_SHOT | CMD_CONTINUOUS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(START_BYTE, 0x55);
        assert_eq!(DISTANCE_RESPONSE_LENGTH, 0x0A);
        assert_eq!(DISTANCE_FRAME_SIZE, 14);
    }

    #[test]
    fn test_prebuilt_frames_are_consistent() {
        for prebuilt in [FRAME_SINGLE_SHOT, FRAME_CONTINUOUS, FRAME_SINGLE_TARGET_MODE] {
            let frame = Frame::new(prebuilt[1], prebuilt[3..5].to_vec()).unwrap();
            assert_eq!(frame.to_bytes(), prebuilt.to_vec());
        }
    }

    #[test]
    fn test_frame_length_matches_payload() {
        let frame = Frame::new(CMD_SINGLE_SHOT, vec![0u8; 10]).unwrap();
        assert_eq!(frame.length, 10);
        assert_eq!(frame.to_bytes().len(), 14);
        assert!(frame.is_distance_response());
    }

    #[test]
    fn test_frame_payload_too_large() {
        let result = Frame::new(CMD_SINGLE_SHOT, vec![0u8; 256]);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_max_payload() {
        let frame = Frame::new(CMD_CONTINUOUS, vec![0u8; 255]).unwrap();
        assert_eq!(frame.length, 255);
    }

    #[test]
    fn test_non_distance_command() {
        let frame = Frame::new(CMD_SET_TARGET_MODE, vec![0, 0]).unwrap();
        assert!(!frame.is_distance_response());
    }
}
