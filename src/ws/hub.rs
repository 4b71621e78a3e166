//! Broadcast hub: fan-out of round state to live connections.
//!
//! Every connection owns a bounded ring (a `tokio::sync::broadcast`
//! channel with a single receiver). Sending never waits: a full ring
//! overwrites its oldest message and the connection observes the loss as
//! lag. A slow client therefore only ever hurts itself.
//!
//! Connections are indexed by id and by user, so settlement messages go
//! to every socket of the bettor and round snapshots to every subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use super::messages::ServerMessage;
use super::subscription::SubscriptionManager;
use crate::domain::{BetStatus, ConnectionId, EventBus, RoundEvent, RoundId, UserId};

#[derive(Debug)]
struct Connection {
    user_id: Option<UserId>,
    sender: broadcast::Sender<ServerMessage>,
    subscriptions: SubscriptionManager,
}

#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Owner of all live stream connections.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    registry: Arc<RwLock<Registry>>,
    buffer: usize,
}

impl BroadcastHub {
    /// Creates a hub whose connections buffer `buffer` messages each.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            buffer: buffer.max(1),
        }
    }

    /// Adds a connection, optionally bound to a user, and returns its id
    /// and message stream.
    pub async fn register(
        &self,
        user_id: Option<UserId>,
    ) -> (ConnectionId, broadcast::Receiver<ServerMessage>) {
        let id = ConnectionId::new();
        let (sender, receiver) = broadcast::channel(self.buffer);
        let mut registry = self.registry.write().await;
        registry.connections.insert(
            id,
            Connection {
                user_id,
                sender,
                subscriptions: SubscriptionManager::new(),
            },
        );
        if let Some(user_id) = user_id {
            registry.by_user.entry(user_id).or_default().insert(id);
        }
        tracing::debug!(connection_id = %id, user_id = ?user_id, "stream connection registered");
        (id, receiver)
    }

    /// Removes a connection and its user index entry.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut registry = self.registry.write().await;
        let Some(connection) = registry.connections.remove(&id) else {
            return;
        };
        if let Some(user_id) = connection.user_id
            && let Some(ids) = registry.by_user.get_mut(&user_id)
        {
            ids.remove(&id);
            if ids.is_empty() {
                registry.by_user.remove(&user_id);
            }
        }
        tracing::debug!(connection_id = %id, "stream connection removed");
    }

    /// Updates a connection's subscriptions and returns the resulting
    /// `(count, wildcard)`, or `None` for an unknown connection.
    pub async fn subscribe(
        &self,
        id: ConnectionId,
        round_ids: &[RoundId],
        wildcard: bool,
    ) -> Option<(usize, bool)> {
        let mut registry = self.registry.write().await;
        let subs = &mut registry.connections.get_mut(&id)?.subscriptions;
        subs.subscribe(round_ids, wildcard);
        Some((subs.count(), subs.is_subscribed_all()))
    }

    /// Removes subscriptions; same return value as [`Self::subscribe`].
    pub async fn unsubscribe(
        &self,
        id: ConnectionId,
        round_ids: &[RoundId],
        wildcard: bool,
    ) -> Option<(usize, bool)> {
        let mut registry = self.registry.write().await;
        let subs = &mut registry.connections.get_mut(&id)?.subscriptions;
        subs.unsubscribe(round_ids, wildcard);
        Some((subs.count(), subs.is_subscribed_all()))
    }

    /// Delivers a round message to every subscriber of its round. Returns
    /// how many connections it was queued on.
    pub async fn publish_round(&self, message: &ServerMessage) -> usize {
        let Some(round_id) = message.round_id() else {
            return 0;
        };
        let registry = self.registry.read().await;
        registry
            .connections
            .values()
            .filter(|c| c.subscriptions.matches(round_id))
            .filter(|c| c.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Delivers a message to every connection of `user_id`.
    pub async fn send_to_user(&self, user_id: UserId, message: &ServerMessage) -> usize {
        let registry = self.registry.read().await;
        let Some(ids) = registry.by_user.get(&user_id) else {
            return 0;
        };
        ids.iter()
            .filter_map(|id| registry.connections.get(id))
            .filter(|c| c.sender.send(message.clone()).is_ok())
            .count()
    }

    /// Delivers a message to one connection.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) -> bool {
        self.registry
            .read()
            .await
            .connections
            .get(&id)
            .is_some_and(|c| c.sender.send(message).is_ok())
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.connections.len()
    }

    /// Number of live connections of `user_id`.
    pub async fn user_connection_count(&self, user_id: UserId) -> usize {
        self.registry
            .read()
            .await
            .by_user
            .get(&user_id)
            .map_or(0, HashSet::len)
    }

    /// Spawns the task turning domain events into stream messages. It ends
    /// when the event bus closes.
    #[must_use]
    pub fn spawn_pump(&self, event_bus: &EventBus) -> JoinHandle<()> {
        let hub = self.clone();
        let mut events = event_bus.subscribe();
        tokio::spawn(async move {
            let mut outcomes = OutcomeMemo::default();
            loop {
                match events.recv().await {
                    Ok(event) => hub.dispatch(&event, &mut outcomes).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "broadcast pump lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("broadcast pump stopped");
        })
    }

    async fn dispatch(&self, event: &RoundEvent, outcomes: &mut OutcomeMemo) {
        match event {
            RoundEvent::RoundOpened { round }
            | RoundEvent::RoundStarted { round }
            | RoundEvent::RoundClosed { round }
            | RoundEvent::RoundCanceled { round } => {
                if let Some(outcome) = round.outcome {
                    outcomes.remember(round.id, outcome);
                }
                let message = ServerMessage::RoundState {
                    round_id: round.id,
                    current_value: round.current_value,
                    status: round.status,
                    outcome: round.outcome,
                };
                let _ = self.publish_round(&message).await;
            }
            RoundEvent::ValueUpdated {
                round_id,
                current_value,
                status,
                ..
            } => {
                let message = ServerMessage::RoundState {
                    round_id: *round_id,
                    current_value: *current_value,
                    status: *status,
                    outcome: None,
                };
                let _ = self.publish_round(&message).await;
            }
            RoundEvent::BetSettled { bet } | RoundEvent::BetRefunded { bet } => {
                let message = match bet.status {
                    BetStatus::Won => ServerMessage::Cashout {
                        round_id: bet.round_id,
                        bet_id: bet.id,
                        amount: bet.payout.unwrap_or(Decimal::ZERO),
                        multiplier: bet.cashout_multiplier,
                    },
                    BetStatus::Lost => ServerMessage::Crash {
                        round_id: bet.round_id,
                        bet_id: bet.id,
                        amount: bet.amount,
                        multiplier: outcomes.get(bet.round_id),
                    },
                    BetStatus::Canceled | BetStatus::Refunded => ServerMessage::Refund {
                        round_id: bet.round_id,
                        bet_id: bet.id,
                        amount: bet.amount,
                        multiplier: None,
                    },
                    BetStatus::Placed => return,
                };
                let _ = self.send_to_user(bet.user_id, &message).await;
            }
            RoundEvent::BetPlaced { .. }
            | RoundEvent::FailedBetRecorded { .. }
            | RoundEvent::FailedBetUpdated { .. } => {}
        }
    }
}

/// Crash points of the most recent rounds, for `crash` messages.
#[derive(Debug, Default)]
struct OutcomeMemo {
    recent: Vec<(RoundId, Decimal)>,
}

impl OutcomeMemo {
    const KEEP: usize = 8;

    fn remember(&mut self, round_id: RoundId, outcome: Decimal) {
        self.recent.retain(|(id, _)| *id != round_id);
        self.recent.push((round_id, outcome));
        if self.recent.len() > Self::KEEP {
            self.recent.remove(0);
        }
    }

    fn get(&self, round_id: RoundId) -> Option<Decimal> {
        self.recent
            .iter()
            .find(|(id, _)| *id == round_id)
            .map(|(_, outcome)| *outcome)
    }
}
