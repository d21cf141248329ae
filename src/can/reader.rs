//! CAN reader task: classifies inbound frames and runs the release sweep

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::angles::AngleDecoder;
use super::bus::{CanBus, RawCanFrame, SocketCanBus};
use super::buttons::{ButtonDecoder, ButtonTiming};
use crate::config::Config;
use crate::error::{ConsoleError, Result};
use crate::events::{ConsoleEvent, EventBus};

/// Reader timing
#[derive(Debug, Clone, Copy)]
pub struct ReaderTiming {
    /// Longest single wait for a frame
    pub recv_timeout: Duration,
    /// Minimum spacing between release sweeps
    pub sweep_interval: Duration,
    /// Pause after a bus error
    pub error_backoff: Duration,
}

/// Decodes button and angle frames from one CAN interface
pub struct CanReader<B: CanBus> {
    bus: B,
    button_id: u32,
    angle_id: u32,
    buttons: ButtonDecoder,
    angles: AngleDecoder,
    timing: ReaderTiming,
}

impl<B: CanBus> CanReader<B> {
    pub fn new(
        bus: B,
        button_id: u32,
        angle_id: u32,
        buttons: ButtonDecoder,
        angles: AngleDecoder,
        timing: ReaderTiming,
    ) -> Self {
        Self {
            bus,
            button_id,
            angle_id,
            buttons,
            angles,
            timing,
        }
    }

    /// Build a reader from configuration
    pub fn from_config(bus: B, config: &Config) -> Self {
        Self::new(
            bus,
            config.can.button_id,
            config.can.angle_id,
            ButtonDecoder::new(ButtonTiming::from(&config.buttons)),
            AngleDecoder::from_config(&config.angles),
            ReaderTiming {
                recv_timeout: Duration::from_millis(config.can.recv_timeout_ms),
                sweep_interval: Duration::from_millis(config.can.sweep_interval_ms),
                error_backoff: Duration::from_millis(config.can.error_backoff_ms),
            },
        )
    }

    /// Route one frame to the decoder for its identifier
    pub fn dispatch(&mut self, frame: &RawCanFrame, now: Instant) -> Option<ConsoleEvent> {
        if frame.id == self.button_id {
            self.buttons
                .handle_frame(&frame.data, now)
                .map(ConsoleEvent::Button)
        } else if frame.id == self.angle_id {
            self.angles
                .handle_frame(&frame.data, now)
                .map(ConsoleEvent::Angles)
        } else {
            debug!("Ignoring CAN id 0x{:X}", frame.id);
            None
        }
    }

    /// Run until cancelled
    ///
    /// Bus errors are reported and followed by a short back-off; they never
    /// end the loop.
    pub async fn run(mut self, events: EventBus, cancel: CancellationToken) -> B {
        let mut last_sweep = Instant::now();

        loop {
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = tokio::time::timeout(self.timing.recv_timeout, self.bus.recv()) => received,
            };

            match received {
                Ok(Ok(frame)) => {
                    if let Some(event) = self.dispatch(&frame, Instant::now()) {
                        events.publish(event);
                    }
                }
                Ok(Err(e)) => {
                    let err = ConsoleError::Io(e);
                    warn!("CAN receive failed: {}", err);
                    events.publish(ConsoleEvent::fault(&err));
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.timing.error_backoff) => {}
                    }
                }
                Err(_) => {}
            }

            let now = Instant::now();
            if now.saturating_duration_since(last_sweep) >= self.timing.sweep_interval {
                self.buttons.sweep(now);
                last_sweep = now;
            }
        }

        self.bus
    }
}

/// Open the configured interface and run the reader
///
/// # Errors
///
/// Returns the open failure after publishing it.
pub async fn run(config: Config, events: EventBus, cancel: CancellationToken) -> Result<()> {
    let bus = match SocketCanBus::open(&config.can.interface) {
        Ok(bus) => bus,
        Err(e) => {
            error!(
                "{} (check: sudo ip link set {} up type can bitrate {})",
                e, config.can.interface, config.can.bitrate
            );
            events.publish(ConsoleEvent::fault(&e));
            return Err(e);
        }
    };

    info!(
        "CAN reader on {} (buttons 0x{:X}, angles 0x{:X})",
        bus.interface(),
        config.can.button_id,
        config.can.angle_id
    );
    let bus = CanReader::from_config(bus, &config).run(events, cancel).await;
    info!("CAN reader on {} closed", bus.interface());
    Ok(())
}
