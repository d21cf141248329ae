//! Telemetry egress channels

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::record::TelemetryRecord;
use crate::can::bus::{CanBus, RawCanFrame};
use crate::error::{ConsoleError, Result};

/// One output channel for telemetry records
#[async_trait]
pub trait TelemetrySink: Send {
    /// Short channel name used in logs and errors
    fn channel(&self) -> &'static str;

    /// Send one record
    ///
    /// # Errors
    ///
    /// Returns `ConsoleError::Publish` naming this channel
    async fn publish(&mut self, record: &TelemetryRecord) -> Result<()>;
}

/// CAN arbitration IDs for the three telemetry values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryIds {
    pub distance: u32,
    pub elevation: u32,
    pub azimuth: u32,
}

/// Publishes each value as a little-endian `f32` on its own CAN id
pub struct CanTelemetrySink<B: CanBus> {
    bus: B,
    ids: TelemetryIds,
}

impl<B: CanBus> CanTelemetrySink<B> {
    pub fn new(bus: B, ids: TelemetryIds) -> Self {
        Self { bus, ids }
    }

    /// Build the three frames for a record
    pub fn frames(&self, record: &TelemetryRecord) -> [RawCanFrame; 3] {
        let frame = |id: u32, value: f64| RawCanFrame::new(id, &(value as f32).to_le_bytes());
        [
            frame(self.ids.distance, record.distance),
            frame(self.ids.elevation, record.elevation_angle),
            frame(self.ids.azimuth, record.azimuth_angle),
        ]
    }
}

#[async_trait]
impl<B: CanBus> TelemetrySink for CanTelemetrySink<B> {
    fn channel(&self) -> &'static str {
        "can"
    }

    async fn publish(&mut self, record: &TelemetryRecord) -> Result<()> {
        for frame in self.frames(record) {
            self.bus.send(&frame).await.map_err(|e| ConsoleError::Publish {
                channel: "can",
                reason: format!("id 0x{:X}: {}", frame.id, e),
            })?;
        }
        debug!(
            "CAN telemetry: distance={:.2} elevation={:.2} azimuth={:.2}",
            record.distance, record.elevation_angle, record.azimuth_angle
        );
        Ok(())
    }
}

/// Writes each record as one newline-terminated JSON object
///
/// If a publish is dropped part way through a line (the publisher timed it
/// out), the next record starts with an extra newline so the reader only
/// loses the cut line.
pub struct StreamTelemetrySink<W> {
    writer: W,
    interrupted: bool,
}

impl<W: AsyncWrite + Unpin + Send> StreamTelemetrySink<W> {
    /// Wrap an already connected stream
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            interrupted: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StreamTelemetrySink<TcpStream> {
    /// Connect to the ground station
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the connection fails or takes longer than
    /// `limit`
    pub async fn connect(address: &str, port: u16, limit: Duration) -> Result<Self> {
        let target = format!("{}:{}", address, port);
        let stream = connect_within(limit, &target, TcpStream::connect((address, port))).await?;
        info!("Telemetry stream connected to {}", target);
        Ok(Self::new(stream))
    }
}

/// Await a connection attempt for at most `limit`
pub async fn connect_within<T, F>(limit: Duration, target: &str, connect: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ConsoleError::Transport(format!(
            "TCP connect to {} failed: {}",
            target, e
        ))),
        Err(_) => Err(ConsoleError::Transport(format!(
            "TCP connect to {} timed out after {:?}",
            target, limit
        ))),
    }
}

/// Encode a record as a JSON line
pub fn encode_line(record: &TelemetryRecord) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');
    Ok(line)
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TelemetrySink for StreamTelemetrySink<W> {
    fn channel(&self) -> &'static str {
        "tcp"
    }

    async fn publish(&mut self, record: &TelemetryRecord) -> Result<()> {
        let mut line = encode_line(record)?;
        if self.interrupted {
            line.insert(0, b'\n');
        }
        let failed = |e: std::io::Error| ConsoleError::Publish {
            channel: "tcp",
            reason: e.to_string(),
        };
        self.interrupted = true;
        self.writer.write_all(&line).await.map_err(failed)?;
        self.writer.flush().await.map_err(failed)?;
        self.interrupted = false;
        debug!("TCP telemetry: {}", String::from_utf8_lossy(&line).trim_end());
        Ok(())
    }
}
