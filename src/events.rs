//! # Console Events
//!
//! Typed events published by the I/O tasks. Delivery uses a
//! `tokio::sync::broadcast` channel so producers never wait on consumers and
//! any number of components may subscribe. A subscriber that falls behind
//! loses the oldest events (`RecvError::Lagged`) instead of stalling the
//! producer.

use tokio::sync::broadcast;

use crate::can::angles::AngleSample;
use crate::can::buttons::ButtonEvent;
use crate::error::FaultCategory;
use crate::rangefinder::distance::DistanceSample;

/// Default broadcast capacity
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Event emitted by a console component
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleEvent {
    /// Successful rangefinder measurement
    Distance(DistanceSample),

    /// Operator button action (first press or hold repeat)
    Button(ButtonEvent),

    /// Elevation/azimuth update from the turret
    Angles(AngleSample),

    /// A component hit an error worth telling the operator about
    Fault {
        category: FaultCategory,
        message: String,
    },
}

impl ConsoleEvent {
    /// Build a `Fault` event from any console error
    pub fn fault(err: &crate::error::ConsoleError) -> Self {
        ConsoleEvent::Fault {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// Cloneable publishing handle for [`ConsoleEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConsoleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event
    ///
    /// Never blocks. Having no subscribers is not an error.
    pub fn publish(&self, event: ConsoleEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribe to every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}
