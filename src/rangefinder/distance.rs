//! # Distance Response Parsing
//!
//! Two response layouts exist in the field:
//!
//! - **Multi-target**: a regular frame (`CMD` 0x01/0x02, `LEN` 0x0A) whose
//!   payload is one status flag followed by three 24-bit big-endian targets.
//! - **Fixed-frame**: exactly 14 bytes, `55 02 0A`, one distance field in
//!   bytes 4..7, XOR checksum trailer.
//!
//! Distances are always returned in meters, `raw * scale_m`.

use crate::error::{DecodeError, FramingError};
use crate::protocol::checksum::xor_checksum;
use crate::protocol::frame::{
    Frame, CMD_CONTINUOUS, DISTANCE_FRAME_SIZE, DISTANCE_RESPONSE_LENGTH, START_BYTE,
};

/// Bytes per encoded target
pub const TARGET_WIDTH: usize = 3;

/// One decoded rangefinder measurement
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSample {
    /// Target distances in meters, in device order
    pub targets: Vec<f64>,

    /// Status flag byte (bit 7 main target, bit 6 echo, bit 5 laser)
    pub flag: u8,

    /// Undecoded 24-bit target values
    pub raw_target_codes: Vec<u32>,
}

impl DistanceSample {
    /// First nonzero target, in meters
    pub fn primary(&self) -> Option<f64> {
        self.targets.iter().copied().find(|&d| d > 0.0)
    }
}

/// Decode a 24-bit big-endian value
fn be24(bytes: &[u8]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

/// Parse a multi-target distance response
///
/// # Arguments
///
/// * `frame` - A checksum-verified frame
/// * `scale_m` - Meters per raw count (0.1 for the documented device)
///
/// # Errors
///
/// - `UnexpectedCommand` if the command is not 0x01 or 0x02
/// - `WrongLength` if the declared length is not 0x0A
/// - `PayloadTooShort` if there is no flag byte
/// - `NoValidTarget` if every target is zero
///
/// # Examples
///
/// ```
/// use sight_console::protocol::encoder::encode;
/// use sight_console::rangefinder::distance::parse_distance_response;
///
/// let frame = encode(0x01, &[0x80, 0x00, 0x03, 0xE8, 0, 0, 0, 0, 0, 0]).unwrap();
/// let sample = parse_distance_response(&frame, 0.1).unwrap();
/// assert!((sample.primary().unwrap() - 100.0).abs() < 1e-9);
/// ```
pub fn parse_distance_response(frame: &Frame, scale_m: f64) -> Result<DistanceSample, DecodeError> {
    if !frame.is_distance_response() {
        return Err(DecodeError::UnexpectedCommand {
            command: frame.command,
            raw: frame.to_bytes(),
        });
    }

    if frame.length != DISTANCE_RESPONSE_LENGTH {
        return Err(DecodeError::WrongLength { length: frame.length });
    }

    let (&flag, body) = frame
        .payload
        .split_first()
        .ok_or(DecodeError::PayloadTooShort)?;

    // Trailing bytes that do not fill a whole target are ignored
    let raw_target_codes: Vec<u32> = body.chunks_exact(TARGET_WIDTH).map(be24).collect();
    let targets: Vec<f64> = raw_target_codes
        .iter()
        .map(|&raw| f64::from(raw) * scale_m)
        .collect();

    let sample = DistanceSample {
        targets,
        flag,
        raw_target_codes,
    };

    if sample.primary().is_none() {
        return Err(DecodeError::NoValidTarget);
    }

    Ok(sample)
}

/// Parse a fixed 14-byte distance frame
///
/// The fixed-frame variant has no multi-target body; the single distance is
/// reported as the only target.
pub fn parse_fixed_frame(bytes: &[u8], scale_m: f64) -> crate::error::Result<DistanceSample> {
    if bytes.len() != DISTANCE_FRAME_SIZE {
        return Err(DecodeError::FixedFrameLength { got: bytes.len() }.into());
    }

    if bytes[0] != START_BYTE || bytes[1] != CMD_CONTINUOUS {
        return Err(DecodeError::UnexpectedCommand {
            command: bytes[1],
            raw: bytes.to_vec(),
        }
        .into());
    }

    if bytes[2] != DISTANCE_RESPONSE_LENGTH {
        return Err(DecodeError::WrongLength { length: bytes[2] }.into());
    }

    let (body, trailer) = bytes.split_at(DISTANCE_FRAME_SIZE - 1);
    let expected = xor_checksum(body);
    if trailer[0] != expected {
        return Err(FramingError::BadChecksum {
            received: trailer[0],
            expected,
            raw: body.to_vec(),
        }
        .into());
    }

    let raw = be24(&bytes[4..7]);
    if raw == 0 {
        return Err(DecodeError::NoValidTarget.into());
    }

    Ok(DistanceSample {
        targets: vec![f64::from(raw) * scale_m],
        flag: bytes[3],
        raw_target_codes: vec![raw],
    })
}
