//! Per-connection subscription set.
//!
//! Tracks which rounds a WebSocket client follows and provides
//! server-side filtering of round-state messages.

use std::collections::HashSet;

use crate::domain::RoundId;

/// Rounds followed by one connection.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionManager {
    /// Followed rounds. Ignored while `subscribe_all` is set.
    round_ids: HashSet<RoundId>,
    /// Wildcard `"*"`: follow every round, including future ones.
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds rounds; `wildcard` follows every round.
    pub fn subscribe(&mut self, ids: &[RoundId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = true;
        }
        self.round_ids.extend(ids.iter().copied());
    }

    /// Removes rounds; `wildcard` drops the wildcard.
    pub fn unsubscribe(&mut self, ids: &[RoundId], wildcard: bool) {
        if wildcard {
            self.subscribe_all = false;
        }
        for id in ids {
            self.round_ids.remove(id);
        }
    }

    /// Returns `true` if messages about `round_id` should be delivered.
    #[must_use]
    pub fn matches(&self, round_id: RoundId) -> bool {
        self.subscribe_all || self.round_ids.contains(&round_id)
    }

    /// Number of explicitly followed rounds.
    #[must_use]
    pub fn count(&self) -> usize {
        self.round_ids.len()
    }

    /// Returns `true` while the wildcard is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matches_nothing() {
        assert!(!SubscriptionManager::new().matches(RoundId::new()));
    }

    #[test]
    fn specific_round() {
        let mut subs = SubscriptionManager::new();
        let id = RoundId::new();
        subs.subscribe(&[id], false);
        assert!(subs.matches(id));
        assert!(!subs.matches(RoundId::new()));
        subs.unsubscribe(&[id], false);
        assert!(!subs.matches(id));
    }

    #[test]
    fn wildcard_follows_future_rounds() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe(&[], true);
        assert!(subs.matches(RoundId::new()));
        subs.unsubscribe(&[], true);
        assert!(!subs.matches(RoundId::new()));
        assert_eq!(subs.count(), 0);
    }
}
