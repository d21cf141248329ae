//! # Serial Communication Module
//!
//! Handles the serial link to the laser rangefinder.
//!
//! This module handles:
//! - Opening the port 8N1 at the configured baud rate (default 115,200)
//! - Async read/write operations behind [`port_trait::SerialPortIO`]
//! - Trying fallback device paths in order

pub mod port_trait;

use std::io;

use async_trait::async_trait;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::error::{ConsoleError, Result};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Default rangefinder baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Rangefinder serial port handle
///
/// Owns the port exclusively; it is never shared between tasks.
pub struct RangefinderSerial {
    /// Serial port handle
    port: TokioSerialPort,
    /// Device path (e.g., /dev/ttyTHS0)
    device_path: String,
}

impl std::fmt::Debug for RangefinderSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangefinderSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl RangefinderSerial {
    /// Open the rangefinder port at `path`
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use sight_console::serial::RangefinderSerial;
    ///
    /// fn main() -> anyhow::Result<()> {
    ///     let serial = RangefinderSerial::open("/dev/ttyTHS0", 115_200)?;
    ///     println!("Connected to: {}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        Self::open_with_paths(&[path], baud_rate)
    }

    /// Open the first device path that succeeds
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try in order
    /// * `baud_rate` - Line speed
    pub fn open_with_paths(paths: &[&str], baud_rate: u32) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened rangefinder at {} @ {} baud", path, baud_rate);
                    return Ok(Self {
                        port: TokioSerialPort::new(port),
                        device_path: path.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(ConsoleError::PortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port 8N1, no flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ConsoleError::Transport(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

#[async_trait]
impl SerialPortIO for RangefinderSerial {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf).await
    }
}
