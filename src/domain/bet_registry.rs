//! Per-round index of bets.
//!
//! A [`BetRegistry`] belongs to exactly one round and is owned by that
//! round's worker task, so it needs no interior locking: every call is
//! already serialized by the worker's command queue.

use std::collections::HashMap;

use rust_decimal::Decimal;

use super::bet::{Bet, BetStatus, BetTransitionError};
use super::{BetId, RoundId, UserId};

/// Errors raised while indexing or settling bets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The bet targets a different round.
    #[error("bet {bet_id} belongs to round {bet_round}, not {round_id}")]
    WrongRound {
        /// Offending bet.
        bet_id: BetId,
        /// Round on the bet.
        bet_round: RoundId,
        /// Round this registry indexes.
        round_id: RoundId,
    },

    /// The user already used this idempotency key in this round.
    #[error("client transaction id already used by bet {0}")]
    DuplicateClientTx(BetId),

    /// The user already holds an unresolved bet in this round.
    #[error("user already has active bet {0} in this round")]
    ActiveBetExists(BetId),

    /// No bet with this id in the round.
    #[error("bet {0} not found in round")]
    NotFound(BetId),

    /// Forward-only status rule violated.
    #[error(transparent)]
    Transition(#[from] BetTransitionError),
}

/// Index of one round's bets by id, by user and by idempotency key.
#[derive(Debug)]
pub struct BetRegistry {
    round_id: RoundId,
    allow_multiple: bool,
    bets: HashMap<BetId, Bet>,
    order: Vec<BetId>,
    by_user: HashMap<UserId, Vec<BetId>>,
    by_client_tx: HashMap<(UserId, String), BetId>,
}

impl BetRegistry {
    /// Creates an empty registry for `round_id`.
    ///
    /// With `allow_multiple` unset a user holds at most one active bet.
    #[must_use]
    pub fn new(round_id: RoundId, allow_multiple: bool) -> Self {
        Self {
            round_id,
            allow_multiple,
            bets: HashMap::new(),
            order: Vec::new(),
            by_user: HashMap::new(),
            by_client_tx: HashMap::new(),
        }
    }

    /// Round this registry indexes.
    #[must_use]
    pub const fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Checks whether `bet` could be added without mutating anything.
    ///
    /// # Errors
    ///
    /// See [`BetRegistry::add`].
    pub fn check(&self, bet: &Bet) -> Result<(), RegistryError> {
        if bet.round_id != self.round_id {
            return Err(RegistryError::WrongRound {
                bet_id: bet.id,
                bet_round: bet.round_id,
                round_id: self.round_id,
            });
        }
        if let Some(existing) = self
            .by_client_tx
            .get(&(bet.user_id, bet.client_tx_id.clone()))
        {
            return Err(RegistryError::DuplicateClientTx(*existing));
        }
        if !self.allow_multiple
            && let Some(active) = self.get(bet.user_id)
        {
            return Err(RegistryError::ActiveBetExists(active.id));
        }
        Ok(())
    }

    /// Indexes a newly placed bet.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::WrongRound`], [`RegistryError::DuplicateClientTx`]
    /// or [`RegistryError::ActiveBetExists`].
    pub fn add(&mut self, bet: Bet) -> Result<&Bet, RegistryError> {
        self.check(&bet)?;
        let id = bet.id;
        self.by_client_tx
            .insert((bet.user_id, bet.client_tx_id.clone()), id);
        self.by_user.entry(bet.user_id).or_default().push(id);
        self.order.push(id);
        self.bets.insert(id, bet);
        self.bets.get(&id).ok_or(RegistryError::NotFound(id))
    }

    /// Returns the user's first unresolved bet.
    #[must_use]
    pub fn get(&self, user_id: UserId) -> Option<&Bet> {
        self.by_user
            .get(&user_id)?
            .iter()
            .filter_map(|id| self.bets.get(id))
            .find(|b| b.status == BetStatus::Placed)
    }

    /// Returns a bet by id.
    #[must_use]
    pub fn get_by_id(&self, bet_id: BetId) -> Option<&Bet> {
        self.bets.get(&bet_id)
    }

    /// Returns the bet previously placed under `client_tx_id` by `user_id`.
    #[must_use]
    pub fn find_by_client_tx(&self, user_id: UserId, client_tx_id: &str) -> Option<&Bet> {
        self.by_client_tx
            .get(&(user_id, client_tx_id.to_string()))
            .and_then(|id| self.bets.get(id))
    }

    /// Every bet of `user_id` in placement order.
    #[must_use]
    pub fn bets_of(&self, user_id: UserId) -> Vec<&Bet> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.iter().filter_map(|id| self.bets.get(id)).collect())
            .unwrap_or_default()
    }

    /// Unresolved bets in placement order.
    #[must_use]
    pub fn list_active(&self) -> Vec<Bet> {
        self.order
            .iter()
            .filter_map(|id| self.bets.get(id))
            .filter(|b| b.status == BetStatus::Placed)
            .cloned()
            .collect()
    }

    /// Every bet in placement order.
    pub fn iter(&self) -> impl Iterator<Item = &Bet> {
        self.order.iter().filter_map(|id| self.bets.get(id))
    }

    /// Moves a bet to a final status.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::Transition`].
    pub fn mark_settled(
        &mut self,
        bet_id: BetId,
        status: BetStatus,
        payout: Option<Decimal>,
        multiplier: Option<Decimal>,
    ) -> Result<&Bet, RegistryError> {
        let bet = self
            .bets
            .get_mut(&bet_id)
            .ok_or(RegistryError::NotFound(bet_id))?;
        bet.settle(status, payout, multiplier)?;
        Ok(bet)
    }

    /// Number of bets ever placed in the round.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no bet was placed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sum of unresolved stakes.
    #[must_use]
    pub fn active_stake(&self) -> Decimal {
        self.bets
            .values()
            .filter(|b| b.status == BetStatus::Placed)
            .map(|b| b.amount)
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::money::Currency;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        let Ok(c) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        c
    }

    fn bet(round: RoundId, user: UserId, key: &str) -> Bet {
        Bet::place(round, user, usd(), dec!(10), key.to_string(), None)
    }

    #[test]
    fn add_and_get() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, false);
        assert!(reg.add(bet(round, user, "a1")).is_ok());
        let Some(found) = reg.get(user) else {
            panic!("bet not indexed");
        };
        assert_eq!(found.client_tx_id, "a1");
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.active_stake(), dec!(10));
    }

    #[test]
    fn rejects_other_round() {
        let mut reg = BetRegistry::new(RoundId::new(), false);
        let result = reg.add(bet(RoundId::new(), UserId::new(), "a1"));
        assert!(matches!(result, Err(RegistryError::WrongRound { .. })));
    }

    #[test]
    fn rejects_reused_key() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, true);
        let _ = reg.add(bet(round, user, "a1"));
        let result = reg.add(bet(round, user, "a1"));
        assert!(matches!(result, Err(RegistryError::DuplicateClientTx(_))));
    }

    #[test]
    fn same_key_from_other_user_is_fine() {
        let round = RoundId::new();
        let mut reg = BetRegistry::new(round, false);
        assert!(reg.add(bet(round, UserId::new(), "a1")).is_ok());
        assert!(reg.add(bet(round, UserId::new(), "a1")).is_ok());
    }

    #[test]
    fn one_active_bet_per_user_by_default() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, false);
        let _ = reg.add(bet(round, user, "a1"));
        let result = reg.add(bet(round, user, "a2"));
        assert!(matches!(result, Err(RegistryError::ActiveBetExists(_))));
    }

    #[test]
    fn multiple_bets_when_allowed() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, true);
        let _ = reg.add(bet(round, user, "a1"));
        assert!(reg.add(bet(round, user, "a2")).is_ok());
        assert_eq!(reg.bets_of(user).len(), 2);
    }

    #[test]
    fn mark_settled_removes_from_active() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, false);
        let Ok(id) = reg.add(bet(round, user, "a1")).map(|b| b.id) else {
            panic!("add failed");
        };
        assert!(reg.mark_settled(id, BetStatus::Lost, None, None).is_ok());
        assert!(reg.list_active().is_empty());
        assert!(reg.get(user).is_none());
        assert!(reg.mark_settled(id, BetStatus::Won, None, None).is_err());
        assert!(matches!(
            reg.mark_settled(BetId::new(), BetStatus::Lost, None, None),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn settled_user_can_bet_again() {
        let round = RoundId::new();
        let user = UserId::new();
        let mut reg = BetRegistry::new(round, false);
        let Ok(id) = reg.add(bet(round, user, "a1")).map(|b| b.id) else {
            panic!("add failed");
        };
        let _ = reg.mark_settled(id, BetStatus::Canceled, None, None);
        assert!(reg.add(bet(round, user, "a2")).is_ok());
        assert_eq!(
            reg.find_by_client_tx(user, "a1").map(|b| b.status),
            Some(BetStatus::Canceled)
        );
    }
}
