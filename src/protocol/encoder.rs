//! # Rangefinder Frame Encoder
//!
//! Builds request frames sent to the rangefinder.

use super::frame::*;
use crate::error::Result;

/// Encode a command and payload into a complete frame
///
/// # Arguments
///
/// * `command` - Command byte
/// * `payload` - Payload bytes (max 255)
///
/// # Returns
///
/// * `Result<Frame>` - Frame with start byte, length and checksum filled in
///
/// # Examples
///
/// ```
/// use sight_console::protocol::encoder::encode;
///
/// let frame = encode(0x01, &[0x00, 0x00]).unwrap();
/// assert_eq!(frame.to_bytes(), vec![0x55, 0x01, 0x02, 0x00, 0x00, 0x56]);
/// ```
pub fn encode(command: u8, payload: &[u8]) -> Result<Frame> {
    Frame::new(command, payload.to_vec())
}

/// Encode a single-shot measurement request
pub fn encode_single_shot() -> Vec<u8> {
    single_arg_request(CMD_SINGLE_SHOT, 0)
}

/// Encode a continuous measurement request
///
/// # Arguments
///
/// * `interval` - Measurement interval argument, big-endian on the wire
pub fn encode_continuous(interval: u16) -> Vec<u8> {
    single_arg_request(CMD_CONTINUOUS, interval)
}

/// Encode the single-target mode request
pub fn encode_single_target_mode() -> Vec<u8> {
    single_arg_request(CMD_SET_TARGET_MODE, 0)
}

/// Requests carry a two-byte big-endian argument, well under the payload limit
fn single_arg_request(command: u8, arg: u16) -> Vec<u8> {
    let [hi, lo] = arg.to_be_bytes();
    let checked = [START_BYTE, command, 0x02, hi, lo];
    let mut bytes = checked.to_vec();
    bytes.push(super::checksum::xor_checksum(&checked));
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_single_shot_matches_datasheet() {
        assert_eq!(encode_single_shot(), FRAME_SINGLE_SHOT.to_vec());
    }

    #[test]
    fn test_encode_continuous_matches_datasheet() {
        assert_eq!(encode_continuous(1000), FRAME_CONTINUOUS.to_vec());
    }

    #[test]
    fn test_encode_single_target_mode() {
        assert_eq!(encode_single_target_mode(), FRAME_SINGLE_TARGET_MODE.to_vec());
    }

    #[test]
    fn test_encode_sets_length_and_checksum() {
        let frame = encode(0x02, &[0x80, 0x00, 0x03, 0xE8]).unwrap();
        assert_eq!(frame.start_byte, START_BYTE);
        assert_eq!(frame.length, 4);
        let bytes = frame.to_bytes();
        let expected = bytes[..bytes.len() - 1].iter().fold(0u8, |a, b| a ^ b);
        assert_eq!(*bytes.last().unwrap(), expected);
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = encode(0x01, &[]).unwrap();
        assert_eq!(frame.to_bytes(), vec![0x55, 0x01, 0x00, 0x54]);
    }
}
