//! # Rangefinder Frame Decoder
//!
//! Decodes frames either from a complete byte slice or incrementally from a
//! live serial port. Decoding never retries; retry policy belongs to the caller.
//!
//! Decoding steps:
//!
//! 1. Discard bytes until the start byte (timeout -> `TimeoutWaitingStart`)
//! 2. Read command + length (short -> `IncompleteHeader`)
//! 3. Read `length` payload bytes (short -> `IncompleteData`)
//! 4. Read checksum byte (absent -> `MissingChecksum`)
//! 5. Verify XOR checksum (mismatch -> `BadChecksum`)

use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::trace;

use super::checksum::xor_checksum;
use super::frame::*;
use crate::error::{FramingError, Result};
use crate::serial::port_trait::SerialPortIO;

/// Decode a frame from a byte slice
///
/// Leading garbage before the start byte is skipped. Bytes after the
/// checksum are ignored.
///
/// # Errors
///
/// Returns a [`FramingError`] describing the first step that failed.
///
/// # Examples
///
/// ```
/// use sight_console::protocol::decoder::decode_frame;
///
/// let frame = decode_frame(&[0xAA, 0x55, 0x01, 0x02, 0x00, 0x00, 0x56]).unwrap();
/// assert_eq!(frame.command, 0x01);
/// assert_eq!(frame.payload, vec![0x00, 0x00]);
/// ```
pub fn decode_frame(bytes: &[u8]) -> std::result::Result<Frame, FramingError> {
    let start = bytes
        .iter()
        .position(|&b| b == START_BYTE)
        .ok_or(FramingError::TimeoutWaitingStart)?;
    let rest = &bytes[start + 1..];

    if rest.len() < 2 {
        return Err(FramingError::IncompleteHeader { got: rest.len() });
    }
    let command = rest[0];
    let length = rest[1];
    let rest = &rest[2..];

    let expected = length as usize;
    if rest.len() < expected {
        return Err(FramingError::IncompleteData {
            expected,
            got: rest.len(),
        });
    }
    let payload = rest[..expected].to_vec();

    let received = *rest.get(expected).ok_or(FramingError::MissingChecksum)?;

    verify(command, length, payload, received)
}

/// Read one frame from a serial port
///
/// Each step gets its own `timeout` budget, mirroring a serial port
/// configured with a per-read timeout.
///
/// # Errors
///
/// - `ConsoleError::Framing` for malformed or incomplete frames
/// - `ConsoleError::Io` for transport failures
pub async fn read_frame<P>(port: &mut P, timeout: Duration) -> Result<Frame>
where
    P: SerialPortIO + ?Sized,
{
    wait_for_start(port, timeout).await?;

    let header = read_up_to(port, 2, timeout).await?;
    if header.len() < 2 {
        return Err(FramingError::IncompleteHeader { got: header.len() }.into());
    }
    let command = header[0];
    let length = header[1];

    let expected = length as usize;
    let payload = if expected > 0 {
        read_up_to(port, expected, timeout).await?
    } else {
        Vec::new()
    };
    if payload.len() < expected {
        return Err(FramingError::IncompleteData {
            expected,
            got: payload.len(),
        }
        .into());
    }

    let trailer = read_up_to(port, 1, timeout).await?;
    let received = *trailer.first().ok_or(FramingError::MissingChecksum)?;

    Ok(verify(command, length, payload, received)?)
}

/// Read up to `count` bytes, stopping early on timeout or end of stream
///
/// A short result is not an error; callers decide what a short read means.
pub async fn read_up_to<P>(port: &mut P, count: usize, timeout: Duration) -> Result<Vec<u8>>
where
    P: SerialPortIO + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut buf = vec![0u8; count];
    let mut filled = 0;

    while filled < count {
        match timeout_at(deadline, port.read(&mut buf[filled..])).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    buf.truncate(filled);
    Ok(buf)
}

async fn wait_for_start<P>(port: &mut P, timeout: Duration) -> Result<()>
where
    P: SerialPortIO + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut byte = [0u8; 1];
    let mut skipped = 0usize;

    loop {
        match timeout_at(deadline, port.read(&mut byte)).await {
            Ok(Ok(0)) | Err(_) => return Err(FramingError::TimeoutWaitingStart.into()),
            Ok(Ok(_)) if byte[0] == START_BYTE => {
                if skipped > 0 {
                    trace!("Resynchronised after skipping {} bytes", skipped);
                }
                return Ok(());
            }
            Ok(Ok(_)) => skipped += 1,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

fn verify(
    command: u8,
    length: u8,
    payload: Vec<u8>,
    received: u8,
) -> std::result::Result<Frame, FramingError> {
    let mut raw = Vec::with_capacity(3 + payload.len());
    raw.extend_from_slice(&[START_BYTE, command, length]);
    raw.extend_from_slice(&payload);

    let expected = xor_checksum(&raw);
    if received != expected {
        return Err(FramingError::BadChecksum {
            received,
            expected,
            raw,
        });
    }

    Ok(Frame {
        start_byte: START_BYTE,
        command,
        length,
        payload,
        checksum: received,
    })
}
