//! CAN bus abstraction so the decoders and publisher can run without hardware

use std::io;

use async_trait::async_trait;
use socketcan::{tokio::CanSocket, CanFrame, EmbeddedFrame, Id as CanId, StandardId};
use tracing::{debug, info};

use crate::error::{ConsoleError, Result};

/// Classic CAN payload limit
pub const MAX_CAN_DATA: usize = 8;

/// A data frame with a standard 11-bit identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCanFrame {
    pub id: u32,
    pub data: Vec<u8>,
}

impl RawCanFrame {
    pub fn new(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            data: data.to_vec(),
        }
    }
}

/// Trait for CAN bus I/O operations
#[async_trait]
pub trait CanBus: Send + Sync {
    /// Wait for the next data frame
    ///
    /// Remote and error frames are skipped.
    async fn recv(&self) -> io::Result<RawCanFrame>;

    /// Transmit one data frame
    async fn send(&self, frame: &RawCanFrame) -> io::Result<()>;
}

/// SocketCAN-backed bus
pub struct SocketCanBus {
    socket: CanSocket,
    interface: String,
}

impl SocketCanBus {
    /// Open a SocketCAN interface
    ///
    /// The interface must already be up; bitrate is configured outside the
    /// process (`ip link set can0 up type can bitrate 500000`).
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the interface cannot be opened
    pub fn open(interface: &str) -> Result<Self> {
        let socket = CanSocket::open(interface).map_err(|e| {
            ConsoleError::Transport(format!("Failed to open CAN interface {}: {}", interface, e))
        })?;
        info!("Opened CAN interface {}", interface);
        Ok(Self {
            socket,
            interface: interface.to_string(),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

#[async_trait]
impl CanBus for SocketCanBus {
    async fn recv(&self) -> io::Result<RawCanFrame> {
        loop {
            match self.socket.read_frame().await? {
                CanFrame::Data(frame) => {
                    let id = match frame.id() {
                        CanId::Standard(id) => u32::from(id.as_raw()),
                        CanId::Extended(id) => id.as_raw(),
                    };
                    return Ok(RawCanFrame::new(id, frame.data()));
                }
                CanFrame::Remote(frame) => debug!("Ignoring remote frame: {:?}", frame),
                CanFrame::Error(frame) => debug!("Ignoring error frame: {:?}", frame),
            }
        }
    }

    async fn send(&self, frame: &RawCanFrame) -> io::Result<()> {
        let id = u16::try_from(frame.id)
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("invalid CAN id 0x{:X}", frame.id))
            })?;
        let can_frame = CanFrame::new(id, &frame.data).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("CAN payload of {} bytes exceeds {}", frame.data.len(), MAX_CAN_DATA),
            )
        })?;
        self.socket.write_frame(can_frame).await
    }
}
