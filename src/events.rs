//! Transfer event broadcast.
//!
//! Every service reports its state transitions (received, queued, exported,
//! quarantined, backoff) through a shared [`EventBus`]. Listeners such as a
//! status panel or a test harness subscribe and drain at their own pace;
//! emission never blocks a worker and a bus with no subscribers is a no-op.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// A single state-transition notification.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// Name of the service that emitted the event.
    pub service: String,
    /// Human-readable description, including the affected object's identity.
    pub message: String,
    /// When the transition happened.
    pub at: DateTime<Utc>,
}

impl TransferEvent {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Broadcast channel for [`TransferEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TransferEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// A bus whose slow subscribers may lag up to `capacity` events behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Returns immediately; a send error just means
    /// nobody is listening.
    pub fn emit(&self, service: &str, message: impl Into<String>) {
        let _ = self.sender.send(TransferEvent::new(service, message));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
