//! # Error Types
//!
//! Custom error types for the sight console using `thiserror`.

use thiserror::Error;

/// Failure to read a well-formed rangefinder frame off the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// No start byte arrived before the read timeout
    #[error("timeout waiting for start byte")]
    TimeoutWaitingStart,

    /// Fewer than two header bytes followed the start byte
    #[error("incomplete header: got {got} bytes")]
    IncompleteHeader { got: usize },

    /// Payload shorter than the declared length
    #[error("incomplete data: expected {expected}, got {got}")]
    IncompleteData { expected: usize, got: usize },

    /// Checksum byte never arrived
    #[error("missing checksum byte")]
    MissingChecksum,

    /// Checksum byte does not match the XOR of the frame
    #[error("bad checksum: received {received:02X}, expected {expected:02X}, raw={}", hex(raw))]
    BadChecksum {
        received: u8,
        expected: u8,
        raw: Vec<u8>,
    },
}

/// A frame was well-formed but is not a usable distance response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Command byte is not a distance response
    #[error("non-distance command 0x{command:02X}, raw={}", hex(raw))]
    UnexpectedCommand { command: u8, raw: Vec<u8> },

    /// Distance response with a declared length other than 0x0A
    #[error("wrong length: 0x{length:02X}")]
    WrongLength { length: u8 },

    /// Distance payload has no flag byte
    #[error("distance response too short")]
    PayloadTooShort,

    /// Every target in the response decoded to zero
    #[error("no valid target (distance == 0 or empty)")]
    NoValidTarget,

    /// Fixed-frame variant returned the wrong number of bytes
    #[error("fixed frame must be 14 bytes, got {got}")]
    FixedFrameLength { got: usize },
}

/// Main error type for the sight console
#[derive(Debug, Error)]
pub enum ConsoleError {
    /// Port or socket could not be opened, or failed mid-flight
    #[error("transport error: {0}")]
    Transport(String),

    /// None of the configured device paths could be opened
    #[error("serial port not found (tried: {0})")]
    PortNotFound(String),

    /// Rangefinder framing errors
    #[error("read frame error: {0}")]
    Framing(#[from] FramingError),

    /// Rangefinder response decoding errors
    #[error("parse distance error: {0}")]
    Decode(#[from] DecodeError),

    /// Telemetry egress failure on one channel
    #[error("publish error on {channel}: {reason}")]
    Publish { channel: &'static str, reason: String },

    /// Reticle calibration store errors
    #[error("calibration error: {0}")]
    Calibration(String),

    /// PTZ collaborator errors
    #[error("camera error: {0}")]
    Camera(String),

    /// Recording pipeline errors
    #[error("recording error: {0}")]
    Recording(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding / decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Notification bucket an error belongs to
///
/// Operator notifications are rate limited per category, not per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaultCategory {
    Transport,
    Framing,
    Decode,
    Publish,
    Calibration,
    Camera,
    Recording,
}

impl FaultCategory {
    /// Human-readable category label
    pub fn label(&self) -> &'static str {
        match self {
            FaultCategory::Transport => "transport",
            FaultCategory::Framing => "framing",
            FaultCategory::Decode => "decode",
            FaultCategory::Publish => "publish",
            FaultCategory::Calibration => "calibration",
            FaultCategory::Camera => "camera",
            FaultCategory::Recording => "recording",
        }
    }
}

impl ConsoleError {
    /// Category used for notification cool-down
    pub fn category(&self) -> FaultCategory {
        match self {
            ConsoleError::Transport(_) | ConsoleError::PortNotFound(_) | ConsoleError::Io(_) => {
                FaultCategory::Transport
            }
            ConsoleError::Framing(_) => FaultCategory::Framing,
            ConsoleError::Decode(_) => FaultCategory::Decode,
            ConsoleError::Publish { .. } => FaultCategory::Publish,
            ConsoleError::Calibration(_) | ConsoleError::Json(_) | ConsoleError::Config(_) => {
                FaultCategory::Calibration
            }
            ConsoleError::Camera(_) => FaultCategory::Camera,
            ConsoleError::Recording(_) => FaultCategory::Recording,
        }
    }
}

/// Format bytes as space-separated uppercase hex
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result type alias for the sight console
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_checksum_message_carries_diagnostics() {
        let err = FramingError::BadChecksum {
            received: 0x12,
            expected: 0x56,
            raw: vec![0x55, 0x01, 0x02, 0x00, 0x00],
        };
        let msg = err.to_string();
        assert!(msg.contains("received 12"));
        assert!(msg.contains("expected 56"));
        assert!(msg.contains("55 01 02 00 00"));
    }

    #[test]
    fn test_categories() {
        let err: ConsoleError = FramingError::MissingChecksum.into();
        assert_eq!(err.category(), FaultCategory::Framing);

        let err: ConsoleError = DecodeError::NoValidTarget.into();
        assert_eq!(err.category(), FaultCategory::Decode);

        let err = ConsoleError::Publish { channel: "can", reason: "down".into() };
        assert_eq!(err.category(), FaultCategory::Publish);

        let err: ConsoleError = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert_eq!(err.category(), FaultCategory::Transport);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[]), "");
        assert_eq!(hex(&[0x55, 0x0A, 0xFF]), "55 0A FF");
    }
}
