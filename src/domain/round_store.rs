//! Concurrent snapshot store for rounds and their bets.
//!
//! [`RoundStore`] keeps every round ever opened together with its bets.
//! While a round is live its worker is the only writer and pushes a fresh
//! snapshot after each change; once the round is terminal the store becomes
//! the authority and remediation writes go straight to it. Each round entry
//! is individually protected by a [`tokio::sync::RwLock`], so history reads
//! never contend with unrelated rounds.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::bet::{Bet, BetStatus};
use super::round::Round;
use super::{BetId, RoundId, UserId};
use crate::error::EngineError;

/// One round and its bets in placement order.
#[derive(Debug, Clone)]
pub struct RoundRecord {
    /// Latest round snapshot.
    pub round: Round,
    /// Latest bet snapshots.
    pub bets: Vec<Bet>,
}

/// Central store for round and bet history.
///
/// # Concurrency
///
/// - Readers of the same round proceed concurrently.
/// - Writes to different rounds are concurrent.
/// - Writes to the same round are serialized.
#[derive(Debug)]
pub struct RoundStore {
    rounds: RwLock<HashMap<RoundId, Arc<RwLock<RoundRecord>>>>,
    bet_index: RwLock<HashMap<BetId, RoundId>>,
}

impl RoundStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rounds: RwLock::new(HashMap::new()),
            bet_index: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a new round.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] if the round already exists.
    pub async fn insert(&self, round: Round) -> Result<RoundId, EngineError> {
        let round_id = round.id;
        let mut map = self.rounds.write().await;
        if map.contains_key(&round_id) {
            return Err(EngineError::InvalidRequest(format!(
                "round {round_id} already exists"
            )));
        }
        map.insert(
            round_id,
            Arc::new(RwLock::new(RoundRecord {
                round,
                bets: Vec::new(),
            })),
        );
        Ok(round_id)
    }

    /// Replaces the round snapshot, inserting the round if unknown.
    pub async fn upsert_round(&self, round: Round) {
        let existing = self.rounds.read().await.get(&round.id).map(Arc::clone);
        if let Some(record) = existing {
            record.write().await.round = round;
            return;
        }
        let mut map = self.rounds.write().await;
        let record = map.entry(round.id).or_insert_with(|| {
            Arc::new(RwLock::new(RoundRecord {
                round: round.clone(),
                bets: Vec::new(),
            }))
        });
        let record = Arc::clone(record);
        drop(map);
        record.write().await.round = round;
    }

    /// Replaces or appends a bet snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoundNotFound`] if the bet's round is unknown.
    pub async fn upsert_bet(&self, bet: Bet) -> Result<(), EngineError> {
        let record = self.get(bet.round_id).await?;
        let bet_id = bet.id;
        let round_id = bet.round_id;
        {
            let mut record = record.write().await;
            match record.bets.iter_mut().find(|b| b.id == bet_id) {
                Some(slot) => *slot = bet,
                None => record.bets.push(bet),
            }
        }
        self.bet_index.write().await.insert(bet_id, round_id);
        Ok(())
    }

    /// Returns the per-round lock.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoundNotFound`] if no round has this id.
    pub async fn get(&self, round_id: RoundId) -> Result<Arc<RwLock<RoundRecord>>, EngineError> {
        self.rounds
            .read()
            .await
            .get(&round_id)
            .map(Arc::clone)
            .ok_or(EngineError::RoundNotFound(round_id))
    }

    /// Returns the round snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoundNotFound`] if no round has this id.
    pub async fn round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        Ok(self.get(round_id).await?.read().await.round.clone())
    }

    /// Returns a round's bets in placement order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoundNotFound`] if no round has this id.
    pub async fn bets(&self, round_id: RoundId) -> Result<Vec<Bet>, EngineError> {
        Ok(self.get(round_id).await?.read().await.bets.clone())
    }

    /// Returns a bet snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BetNotFound`] if the bet is unknown.
    pub async fn bet(&self, bet_id: BetId) -> Result<Bet, EngineError> {
        let round_id = self
            .bet_index
            .read()
            .await
            .get(&bet_id)
            .copied()
            .ok_or_else(|| EngineError::BetNotFound(bet_id.to_string()))?;
        let record = self.get(round_id).await?;
        let record = record.read().await;
        record
            .bets
            .iter()
            .find(|b| b.id == bet_id)
            .cloned()
            .ok_or_else(|| EngineError::BetNotFound(bet_id.to_string()))
    }

    /// Moves a stored bet to a final status. Repeating the same transition
    /// is a no-op that returns the stored bet.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BetNotFound`] if the bet is unknown and
    /// [`EngineError::InvalidRequest`] if it already reached another final
    /// status.
    pub async fn settle_bet(
        &self,
        bet_id: BetId,
        status: BetStatus,
        payout: Option<Decimal>,
    ) -> Result<Bet, EngineError> {
        let bet = self.bet(bet_id).await?;
        let record = self.get(bet.round_id).await?;
        let mut record = record.write().await;
        let slot = record
            .bets
            .iter_mut()
            .find(|b| b.id == bet_id)
            .ok_or_else(|| EngineError::BetNotFound(bet_id.to_string()))?;
        if slot.status == status {
            return Ok(slot.clone());
        }
        slot.settle(status, payout, None)
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        Ok(slot.clone())
    }

    /// Returns one page of rounds, newest first, with the total count.
    pub async fn list(&self, offset: usize, limit: usize) -> (Vec<Round>, usize) {
        let mut rounds = self.snapshot_rounds().await;
        rounds.sort_by(|a, b| b.number.cmp(&a.number));
        let total = rounds.len();
        (rounds.into_iter().skip(offset).take(limit).collect(), total)
    }

    /// Returns the round with the highest number.
    pub async fn latest(&self) -> Option<Round> {
        self.snapshot_rounds()
            .await
            .into_iter()
            .max_by_key(|r| r.number)
    }

    /// Returns one page of a user's bets, newest first, with the total count.
    pub async fn user_bets(&self, user_id: UserId, offset: usize, limit: usize) -> (Vec<Bet>, usize) {
        let records: Vec<_> = self.rounds.read().await.values().map(Arc::clone).collect();
        let mut bets = Vec::new();
        for record in records {
            let record = record.read().await;
            bets.extend(record.bets.iter().filter(|b| b.user_id == user_id).cloned());
        }
        bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
        let total = bets.len();
        (bets.into_iter().skip(offset).take(limit).collect(), total)
    }

    /// Returns terminal rounds that still hold `Placed` bets, with those
    /// bets.
    pub async fn stranded(&self) -> Vec<(Round, Vec<Bet>)> {
        let records: Vec<_> = self.rounds.read().await.values().map(Arc::clone).collect();
        let mut stranded = Vec::new();
        for record in records {
            let record = record.read().await;
            if !record.round.status.is_terminal() {
                continue;
            }
            let placed: Vec<Bet> = record
                .bets
                .iter()
                .filter(|b| b.status == BetStatus::Placed)
                .cloned()
                .collect();
            if !placed.is_empty() {
                stranded.push((record.round.clone(), placed));
            }
        }
        stranded
    }

    /// Returns the number of rounds in the store.
    pub async fn len(&self) -> usize {
        self.rounds.read().await.len()
    }

    /// Returns `true` if the store holds no rounds.
    pub async fn is_empty(&self) -> bool {
        self.rounds.read().await.is_empty()
    }

    async fn snapshot_rounds(&self) -> Vec<Round> {
        let records: Vec<_> = self.rounds.read().await.values().map(Arc::clone).collect();
        let mut rounds = Vec::with_capacity(records.len());
        for record in records {
            rounds.push(record.read().await.round.clone());
        }
        rounds
    }
}

impl Default for RoundStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Currency;
    use rust_decimal_macros::dec;

    fn round(number: u64) -> Round {
        Round::open(RoundId::new(), number, "hash".to_string())
    }

    fn bet(round_id: RoundId, user_id: UserId) -> Bet {
        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        Bet::place(round_id, user_id, usd, dec!(10), "tx".to_string(), None)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = RoundStore::new();
        let r = round(1);
        let id = r.id;
        assert!(store.insert(r.clone()).await.is_ok());
        assert!(store.insert(r).await.is_err());
        let Ok(fetched) = store.round(id).await else {
            panic!("round missing");
        };
        assert_eq!(fetched.number, 1);
    }

    #[tokio::test]
    async fn get_nonexistent_returns_error() {
        let store = RoundStore::new();
        assert!(matches!(
            store.round(RoundId::new()).await,
            Err(EngineError::RoundNotFound(_))
        ));
    }

    #[tokio::test]
    async fn bets_are_upserted() {
        let store = RoundStore::new();
        let r = round(1);
        let _ = store.insert(r.clone()).await;
        let mut b = bet(r.id, UserId::new());
        assert!(store.upsert_bet(b.clone()).await.is_ok());

        let _ = b.settle(BetStatus::Lost, None, None);
        assert!(store.upsert_bet(b.clone()).await.is_ok());

        let Ok(bets) = store.bets(r.id).await else {
            panic!("round missing");
        };
        assert_eq!(bets.len(), 1);
        assert_eq!(bets.first().map(|b| b.status), Some(BetStatus::Lost));
        let Ok(found) = store.bet(b.id).await else {
            panic!("bet missing");
        };
        assert_eq!(found.status, BetStatus::Lost);
    }

    #[tokio::test]
    async fn bet_on_unknown_round_is_rejected() {
        let store = RoundStore::new();
        let b = bet(RoundId::new(), UserId::new());
        assert!(store.upsert_bet(b).await.is_err());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paged() {
        let store = RoundStore::new();
        for n in 1..=5 {
            store.upsert_round(round(n)).await;
        }
        let (page, total) = store.list(1, 2).await;
        assert_eq!(total, 5);
        let numbers: Vec<u64> = page.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![4, 3]);
        assert_eq!(store.latest().await.map(|r| r.number), Some(5));
    }

    #[tokio::test]
    async fn settle_bet_is_idempotent() {
        let store = RoundStore::new();
        let r = round(1);
        let _ = store.insert(r.clone()).await;
        let b = bet(r.id, UserId::new());
        let _ = store.upsert_bet(b.clone()).await;

        let first = store.settle_bet(b.id, BetStatus::Refunded, None).await;
        assert!(first.is_ok());
        let again = store.settle_bet(b.id, BetStatus::Refunded, None).await;
        assert!(again.is_ok());
        assert!(store.settle_bet(b.id, BetStatus::Won, None).await.is_err());
    }

    #[tokio::test]
    async fn stranded_lists_placed_bets_of_terminal_rounds() {
        let store = RoundStore::new();
        let mut r = round(1);
        let _ = store.insert(r.clone()).await;
        let _ = store.upsert_bet(bet(r.id, UserId::new())).await;
        assert!(store.stranded().await.is_empty());

        let _ = r.cancel("worker lost", None);
        store.upsert_round(r).await;
        let stranded = store.stranded().await;
        assert_eq!(stranded.len(), 1);
        assert_eq!(stranded.first().map(|(_, bets)| bets.len()), Some(1));
    }

    #[tokio::test]
    async fn user_bets_filters_by_user() {
        let store = RoundStore::new();
        let r = round(1);
        let _ = store.insert(r.clone()).await;
        let user = UserId::new();
        let _ = store.upsert_bet(bet(r.id, user)).await;
        let _ = store.upsert_bet(bet(r.id, UserId::new())).await;

        let (bets, total) = store.user_bets(user, 0, 10).await;
        assert_eq!(total, 1);
        assert_eq!(bets.first().map(|b| b.user_id), Some(user));
        assert!(!store.is_empty().await);
        assert_eq!(store.len().await, 1);
    }
}
