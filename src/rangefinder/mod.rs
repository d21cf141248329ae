//! # Rangefinder Link
//!
//! Drives the laser rangefinder over its serial port.
//!
//! The multi-target variant is trigger driven: a measurement happens only
//! when the operator fires the laser, and the link otherwise stays silent on
//! the wire. The fixed-frame variant polls continuously.
//!
//! State machine for one triggered measurement:
//!
//! ```text
//! Idle -> AwaitingTrigger -> FrameSent -> ParsingResponse -> Idle | Error
//! ```

pub mod distance;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{RangefinderProtocol, SerialConfig};
use crate::error::{ConsoleError, FramingError, Result};
use crate::events::{ConsoleEvent, EventBus};
use crate::protocol::decoder::{read_frame, read_up_to};
use crate::protocol::encoder::{encode_continuous, encode_single_shot, encode_single_target_mode};
use crate::protocol::frame::DISTANCE_FRAME_SIZE;
use crate::serial::port_trait::SerialPortIO;
use crate::serial::RangefinderSerial;
use distance::{parse_distance_response, parse_fixed_frame, DistanceSample};

/// Continuous-mode interval argument sent by the fixed-frame variant
pub const CONTINUOUS_INTERVAL_ARG: u16 = 0x03E8;

/// Whole-response deadline, in multiples of the per-read timeout
const RESPONSE_DEADLINE_FACTOR: u32 = 3;

/// Link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    AwaitingTrigger,
    FrameSent,
    ParsingResponse,
    Error,
}

/// Request a measurement from the rangefinder task
///
/// Triggers coalesce: firing while a measurement is already pending is a
/// no-op.
#[derive(Debug, Clone)]
pub struct RangefinderTrigger {
    tx: mpsc::Sender<()>,
}

impl RangefinderTrigger {
    /// Create a trigger handle and the receiver the link task consumes
    pub fn channel() -> (Self, mpsc::Receiver<()>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Fire the laser
    ///
    /// # Returns
    ///
    /// `true` if a new measurement was queued
    pub fn fire(&self) -> bool {
        self.tx.try_send(()).is_ok()
    }
}

/// Rangefinder protocol driver over any [`SerialPortIO`]
pub struct RangefinderLink<P: SerialPortIO> {
    port: P,
    state: LinkState,
    timeout: Duration,
    scale_m: f64,
}

impl<P: SerialPortIO> RangefinderLink<P> {
    /// Wrap an open port
    ///
    /// # Arguments
    ///
    /// * `port` - Open serial port, owned exclusively by the link
    /// * `timeout` - Per-read timeout
    /// * `scale_m` - Meters per raw distance count
    pub fn new(port: P, timeout: Duration, scale_m: f64) -> Self {
        Self {
            port,
            state: LinkState::Idle,
            timeout,
            scale_m,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Switch the device to single-target mode
    pub async fn configure_single_target(&mut self) -> Result<()> {
        self.port.write_all(&encode_single_target_mode()).await?;
        self.port.flush().await?;
        info!("Rangefinder set to single-target mode");
        Ok(())
    }

    /// Perform one triggered single-shot measurement
    ///
    /// # Errors
    ///
    /// - `Io` if the request cannot be written
    /// - `Framing` if the response is malformed or does not arrive in time
    /// - `Decode` if the response is not a usable distance
    ///
    /// The link stays usable after any error.
    pub async fn measure(&mut self) -> Result<DistanceSample> {
        let result = self.exchange().await;
        self.state = match result {
            Ok(_) => LinkState::Idle,
            Err(_) => LinkState::Error,
        };
        result
    }

    async fn exchange(&mut self) -> Result<DistanceSample> {
        self.port.write_all(&encode_single_shot()).await?;
        self.port.flush().await?;
        self.state = LinkState::FrameSent;
        debug!("Single-shot request sent");

        self.state = LinkState::ParsingResponse;
        let deadline = self.timeout * RESPONSE_DEADLINE_FACTOR;
        let frame = tokio::time::timeout(deadline, read_frame(&mut self.port, self.timeout))
            .await
            .map_err(|_| FramingError::TimeoutWaitingStart)??;

        debug!("Rangefinder frame: cmd=0x{:02X} len={}", frame.command, frame.length);
        Ok(parse_distance_response(&frame, self.scale_m)?)
    }

    /// Perform one poll of the fixed-frame variant
    ///
    /// Sends the continuous request and reads exactly one 14-byte response.
    pub async fn poll_fixed(&mut self) -> Result<DistanceSample> {
        let result = self.fixed_exchange().await;
        self.state = match result {
            Ok(_) => LinkState::Idle,
            Err(_) => LinkState::Error,
        };
        result
    }

    async fn fixed_exchange(&mut self) -> Result<DistanceSample> {
        self.port.write_all(&encode_continuous(CONTINUOUS_INTERVAL_ARG)).await?;
        self.port.flush().await?;
        self.state = LinkState::ParsingResponse;

        let bytes = read_up_to(&mut self.port, DISTANCE_FRAME_SIZE, self.timeout).await?;
        parse_fixed_frame(&bytes, self.scale_m)
    }

    /// Recover the port
    pub fn into_inner(self) -> P {
        self.port
    }
}

/// Whether an error came from the transport rather than the data
fn is_transport_fault(err: &ConsoleError) -> bool {
    matches!(err, ConsoleError::Io(_) | ConsoleError::Transport(_))
}

fn report(bus: &EventBus, err: &ConsoleError) {
    warn!("Rangefinder: {}", err);
    bus.publish(ConsoleEvent::fault(err));
}

/// Sleep for `backoff` unless cancelled first
///
/// # Returns
///
/// `false` if cancellation was requested
async fn back_off(backoff: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(backoff) => true,
    }
}

/// Trigger-driven measurement loop
///
/// Exits when cancelled or when every trigger handle has been dropped.
pub async fn run_triggered<P: SerialPortIO>(
    mut link: RangefinderLink<P>,
    mut triggers: mpsc::Receiver<()>,
    bus: EventBus,
    error_backoff: Duration,
    cancel: CancellationToken,
) -> P {
    loop {
        link.state = LinkState::AwaitingTrigger;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    debug!("All rangefinder triggers dropped");
                    break;
                }
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = link.measure() => result,
        };

        match result {
            Ok(sample) => {
                info!("Distance: {:?} m (targets {:?})", sample.primary(), sample.targets);
                bus.publish(ConsoleEvent::Distance(sample));
            }
            Err(e) => {
                report(&bus, &e);
                if is_transport_fault(&e) && !back_off(error_backoff, &cancel).await {
                    break;
                }
            }
        }
    }

    link.into_inner()
}

/// Continuous polling loop of the fixed-frame variant
pub async fn run_polling<P: SerialPortIO>(
    mut link: RangefinderLink<P>,
    poll_interval: Duration,
    bus: EventBus,
    error_backoff: Duration,
    cancel: CancellationToken,
) -> P {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = link.poll_fixed() => result,
        };

        match result {
            Ok(sample) => bus.publish(ConsoleEvent::Distance(sample)),
            Err(e) => {
                report(&bus, &e);
                if is_transport_fault(&e) && !back_off(error_backoff, &cancel).await {
                    break;
                }
            }
        }
    }

    link.into_inner()
}

/// Open the configured port and run the configured protocol variant
///
/// # Errors
///
/// Returns the open failure after publishing it; this is terminal for the
/// link.
pub async fn run(
    config: SerialConfig,
    triggers: mpsc::Receiver<()>,
    bus: EventBus,
    cancel: CancellationToken,
) -> Result<()> {
    let serial = match RangefinderSerial::open(&config.port, config.baud_rate) {
        Ok(serial) => serial,
        Err(e) => {
            error!("Rangefinder unavailable: {}", e);
            bus.publish(ConsoleEvent::fault(&e));
            return Err(e);
        }
    };

    let mut link = RangefinderLink::new(serial, config.timeout(), config.distance_scale_m);
    if config.single_target_mode {
        if let Err(e) = link.configure_single_target().await {
            report(&bus, &e);
        }
    }

    let backoff = Duration::from_millis(config.error_backoff_ms);
    let serial = match config.protocol {
        RangefinderProtocol::MultiTarget => {
            info!("Rangefinder link ready (multi-target, trigger driven)");
            run_triggered(link, triggers, bus, backoff, cancel).await
        }
        RangefinderProtocol::FixedFrame => {
            info!("Rangefinder link ready (fixed-frame, polling)");
            let poll = Duration::from_millis(config.poll_interval_ms);
            run_polling(link, poll, bus, backoff, cancel).await
        }
    };

    info!("Rangefinder link on {} closed", serial.device_path());
    Ok(())
}
