//! Broadcast channel for domain events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Round workers,
//! the failure manager and the scheduler publish [`RoundEvent`]s; the
//! broadcast hub pump and the persistence journal subscribe.

use tokio::sync::broadcast;

use super::RoundEvent;

/// Broadcast bus for [`RoundEvent`]s.
///
/// Publishing never blocks. When the ring buffer is full the oldest events
/// are dropped for lagging receivers, which observe
/// [`broadcast::error::RecvError::Lagged`].
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoundEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of receivers that received the event; `0` when
    /// nobody listens.
    pub fn publish(&self, event: RoundEvent) -> usize {
        let (kind, round_id) = (event.event_type_str(), event.round_id());
        let receivers = self.sender.send(event).unwrap_or(0);
        tracing::trace!(event_type = kind, %round_id, receivers, "event published");
        receivers
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
