//! # XOR Checksum
//!
//! The rangefinder trailer byte is the XOR of every byte from the start byte
//! through the last payload byte.

/// Calculate the XOR checksum of a byte slice
///
/// # Examples
///
/// ```
/// use sight_console::protocol::checksum::xor_checksum;
///
/// assert_eq!(xor_checksum(&[0x55, 0x01, 0x02, 0x00, 0x00]), 0x56);
/// ```
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |chk, &b| chk ^ b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_empty() {
        assert_eq!(xor_checksum(&[]), 0x00);
    }

    #[test]
    fn test_checksum_documented_commands() {
        // Single-shot measurement request
        assert_eq!(xor_checksum(&[0x55, 0x01, 0x02, 0x00, 0x00]), 0x56);
        // Continuous measurement request
        assert_eq!(xor_checksum(&[0x55, 0x02, 0x02, 0x03, 0xE8]), 0xBE);
        // Single-target mode
        assert_eq!(xor_checksum(&[0x55, 0x22, 0x02, 0x00, 0x00]), 0x77);
    }

    #[test]
    fn test_checksum_of_frame_with_trailer_is_zero() {
        let mut data = vec![0x55, 0x01, 0x0A, 0x80, 0x00, 0x03, 0xE8, 0, 0, 0, 0, 0, 0];
        data.push(xor_checksum(&data));
        assert_eq!(xor_checksum(&data), 0x00);
    }

    #[test]
    fn test_checksum_changes_with_data() {
        let a = [0x55, 0x01, 0x02, 0x00, 0x04];
        let b = [0x55, 0x01, 0x02, 0x00, 0x05];
        assert_ne!(xor_checksum(&a), xor_checksum(&b));
    }
}
