//! # Angle Telemetry Decoder
//!
//! The turret reports elevation and azimuth in the last two payload bytes,
//! read as four decimal digits `E1 E0 A1 A0` (one per nibble).
//!
//! Each pair is combined as `high * 256 + low` and scaled by the configured
//! unit. This reproduces what the deployed console does, and it yields
//! implausible values (digits `3`,`1` decode to 769 degrees). The real wire
//! format has not been confirmed, so the scale is kept as observed rather
//! than guessed at.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::config::AngleConfig;

/// One elevation/azimuth reading in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AngleSample {
    pub elevation_degrees: f64,
    pub azimuth_degrees: f64,
}

/// Decode the trailing four digits of an angle frame
///
/// Returns `None` for payloads shorter than two bytes or containing a
/// non-decimal nibble.
///
/// # Examples
///
/// ```
/// use sight_console::can::angles::decode_angles;
///
/// let sample = decode_angles(&[0x00, 0x31, 0x25], 1.0).unwrap();
/// assert_eq!(sample.elevation_degrees, 769.0);
/// assert_eq!(sample.azimuth_degrees, 517.0);
/// ```
pub fn decode_angles(data: &[u8], unit_deg: f64) -> Option<AngleSample> {
    let [.., hi, lo] = data else {
        return None;
    };

    let digits = [hi >> 4, hi & 0x0F, lo >> 4, lo & 0x0F];
    if digits.iter().any(|&d| d > 9) {
        return None;
    }

    let pair = |high: u8, low: u8| f64::from(u16::from(high) * 256 + u16::from(low));
    Some(AngleSample {
        elevation_degrees: round2(pair(digits[0], digits[1]) * unit_deg),
        azimuth_degrees: round2(pair(digits[2], digits[3]) * unit_deg),
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rate-limited angle decoder
#[derive(Debug)]
pub struct AngleDecoder {
    unit_deg: f64,
    debounce: Duration,
    last_emit: Option<Instant>,
}

impl AngleDecoder {
    pub fn new(unit_deg: f64, debounce: Duration) -> Self {
        Self {
            unit_deg,
            debounce,
            last_emit: None,
        }
    }

    pub fn from_config(config: &AngleConfig) -> Self {
        Self::new(config.unit_deg, Duration::from_millis(config.debounce_ms))
    }

    /// Decode a frame, dropping it if inside the debounce window or malformed
    pub fn handle_frame(&mut self, data: &[u8], now: Instant) -> Option<AngleSample> {
        if let Some(last) = self.last_emit {
            if now.saturating_duration_since(last) < self.debounce {
                return None;
            }
        }

        let sample = decode_angles(data, self.unit_deg);
        match sample {
            Some(_) => self.last_emit = Some(now),
            None => trace!("Dropping malformed angle payload {:02X?}", data),
        }
        sample
    }
}

impl Default for AngleDecoder {
    fn default() -> Self {
        Self::from_config(&AngleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_observed_format() {
        let sample = decode_angles(&[0x12, 0x34, 0x35, 0x00], 1.0).unwrap();
        assert_eq!(sample.elevation_degrees, 3.0 * 256.0 + 5.0);
        assert_eq!(sample.azimuth_degrees, 0.0);
    }

    #[test]
    fn test_decode_applies_unit() {
        let sample = decode_angles(&[0x01, 0x02], 0.1).unwrap();
        assert_eq!(sample.elevation_degrees, 0.1);
        assert_eq!(sample.azimuth_degrees, 0.2);
    }

    #[test]
    fn test_non_numeric_payload_dropped() {
        assert!(decode_angles(&[0x3A, 0x00], 1.0).is_none());
        assert!(decode_angles(&[0x00, 0x0F], 1.0).is_none());
    }

    #[test]
    fn test_short_payload_dropped() {
        assert!(decode_angles(&[], 1.0).is_none());
        assert!(decode_angles(&[0x11], 1.0).is_none());
    }

    #[test]
    fn test_debounce_window() {
        let start = Instant::now();
        let mut decoder = AngleDecoder::default();

        assert!(decoder.handle_frame(&[0x11, 0x11], start).is_some());
        assert!(decoder.handle_frame(&[0x22, 0x22], start + Duration::from_millis(99)).is_none());
        let sample = decoder
            .handle_frame(&[0x22, 0x22], start + Duration::from_millis(100))
            .unwrap();
        assert_eq!(sample.elevation_degrees, 514.0);
    }

    #[test]
    fn test_malformed_frame_does_not_reset_debounce() {
        let start = Instant::now();
        let mut decoder = AngleDecoder::default();

        assert!(decoder.handle_frame(&[0xFF, 0xFF], start).is_none());
        assert!(decoder.handle_frame(&[0x00, 0x00], start + Duration::from_millis(1)).is_some());
    }
}
