//! Fixed-cadence telemetry publisher

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::record::TelemetrySlot;
use super::sinks::TelemetrySink;
use crate::error::ConsoleError;
use crate::events::{ConsoleEvent, EventBus};

/// Result of one publish tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new since the last tick
    Idle,
    /// At least one channel accepted the record
    Published { failed: usize },
    /// Every channel failed; the record stays pending unless superseded
    AllFailed,
}

/// Drains the telemetry slot once per period onto every sink
pub struct TelemetryPublisher {
    slot: TelemetrySlot,
    sinks: Vec<Box<dyn TelemetrySink>>,
    period: Duration,
    send_timeout: Duration,
}

impl TelemetryPublisher {
    /// Each channel gets half a period per publish unless overridden with
    /// [`Self::with_send_timeout`]
    pub fn new(slot: TelemetrySlot, sinks: Vec<Box<dyn TelemetrySink>>, period: Duration) -> Self {
        Self {
            slot,
            sinks,
            period,
            send_timeout: period / 2,
        }
    }

    /// Bound how long one channel may take to accept a record
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Publish the pending record, if any
    ///
    /// Channels are independent: a failure on one is reported and the
    /// others are still attempted. A channel that does not finish within
    /// the send timeout counts as failed.
    pub async fn tick(&mut self, events: &EventBus) -> TickOutcome {
        let Some(taken) = self.slot.take() else {
            return TickOutcome::Idle;
        };

        let mut failed = 0;
        for sink in self.sinks.iter_mut() {
            let outcome = tokio::time::timeout(self.send_timeout, sink.publish(&taken.record))
                .await
                .unwrap_or_else(|_| {
                    Err(ConsoleError::Publish {
                        channel: sink.channel(),
                        reason: format!("timed out after {:?}", self.send_timeout),
                    })
                });
            if let Err(e) = outcome {
                warn!("Telemetry {} failed: {}", sink.channel(), e);
                events.publish(ConsoleEvent::fault(&e));
                failed += 1;
            }
        }

        if !self.sinks.is_empty() && failed == self.sinks.len() {
            self.slot.restore(taken);
            TickOutcome::AllFailed
        } else {
            TickOutcome::Published { failed }
        }
    }

    /// Run until cancelled
    ///
    /// The first publish happens one period after start.
    pub async fn run(mut self, events: EventBus, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let channels: Vec<&str> = self.sinks.iter().map(|s| s.channel()).collect();
        info!(
            "Telemetry publisher every {:?} on {:?} (send timeout {:?})",
            self.period, channels, self.send_timeout
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(&events).await;
                }
            }
        }

        info!("Telemetry publisher stopped");
    }
}
