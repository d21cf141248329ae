//! # Operator Notifications
//!
//! Faults arrive on the event bus at whatever rate the failing component
//! produces them. The operator sees at most one notification per fault
//! category per cool-down window; the rest are counted and folded into the
//! next notification for that category.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::error::FaultCategory;
use crate::events::ConsoleEvent;

/// A notification that passed the cool-down
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub category: FaultCategory,
    pub message: String,
    /// Faults of the same category suppressed since the previous notification
    pub suppressed: u32,
}

#[derive(Debug)]
struct CategoryState {
    last_shown: Instant,
    suppressed: u32,
}

/// Per-category rate limiter
#[derive(Debug)]
pub struct Notifier {
    cooldown: Duration,
    categories: HashMap<FaultCategory, CategoryState>,
}

impl Notifier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            categories: HashMap::new(),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(Duration::from_millis(config.cooldown_ms))
    }

    /// Offer a fault
    ///
    /// # Returns
    ///
    /// The notification to show, or `None` if the category is still cooling down
    pub fn offer(&mut self, category: FaultCategory, message: &str, now: Instant) -> Option<Notification> {
        match self.categories.get_mut(&category) {
            Some(state) if now.duration_since(state.last_shown) < self.cooldown => {
                state.suppressed += 1;
                None
            }
            Some(state) => {
                let suppressed = std::mem::take(&mut state.suppressed);
                state.last_shown = now;
                Some(Notification {
                    category,
                    message: message.to_string(),
                    suppressed,
                })
            }
            None => {
                self.categories.insert(
                    category,
                    CategoryState {
                        last_shown: now,
                        suppressed: 0,
                    },
                );
                Some(Notification {
                    category,
                    message: message.to_string(),
                    suppressed: 0,
                })
            }
        }
    }
}

/// Show fault notifications until cancelled
///
/// Notifications are rendered as `warn!` records under the `notify` target.
/// Returns the notifier when the bus closes or on cancel.
pub async fn run(
    mut notifier: Notifier,
    mut rx: broadcast::Receiver<ConsoleEvent>,
    cancel: CancellationToken,
) -> Notifier {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(ConsoleEvent::Fault { category, message }) => {
                if let Some(note) = notifier.offer(category, &message, Instant::now()) {
                    if note.suppressed > 0 {
                        warn!(target: "notify", "[{}] {} ({} similar suppressed)",
                            note.category.label(), note.message, note.suppressed);
                    } else {
                        warn!(target: "notify", "[{}] {}", note.category.label(), note.message);
                    }
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => debug!("Notifier lagged by {} events", n),
            Err(RecvError::Closed) => break,
        }
    }

    notifier
}
