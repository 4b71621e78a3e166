//! Startup recovery from the persistence layer.
//!
//! Rebuilds the ledger from its stored entries, reloads round and bet
//! history and the failure records, then re-runs failure detection. A
//! round that was still running when the process stopped has no worker
//! any more: it is canceled and its unresolved bets are handed to the
//! failure manager, which returns the stakes.

use super::round_engine::RoundEngine;
use crate::domain::{Bet, Currency, FailedBet, Round, RoundEvent, UserId};
use crate::error::EngineError;
use crate::ledger::LedgerEntry;
use crate::persistence::PostgresPersistence;

/// Reason recorded on rounds interrupted by a restart.
const INTERRUPTED: &str = "engine restarted";

/// Everything read back from storage.
#[derive(Debug, Clone, Default)]
pub struct StoredState {
    /// Ledger entries in per-account sequence order.
    pub entries: Vec<LedgerEntry>,
    /// Rounds, oldest first.
    pub rounds: Vec<Round>,
    /// Bets, oldest first.
    pub bets: Vec<Bet>,
    /// Failure records.
    pub failed_bets: Vec<FailedBet>,
    /// Suspended accounts.
    pub suspensions: Vec<(UserId, Currency)>,
}

/// What recovery did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Ledger entries replayed.
    pub entries: usize,
    /// Rounds reloaded.
    pub rounds: usize,
    /// Bets reloaded.
    pub bets: usize,
    /// Rounds canceled because they were still running.
    pub interrupted: usize,
    /// New failure records created.
    pub orphans: usize,
}

/// Loads the stored state and applies it to `engine`.
///
/// # Errors
///
/// Returns [`EngineError::PersistenceError`] when loading fails and
/// [`EngineError::Internal`] when the stored ledger does not replay.
pub async fn recover(
    persistence: &PostgresPersistence,
    engine: &RoundEngine,
) -> Result<RecoveryReport, EngineError> {
    let state = StoredState {
        entries: persistence.load_entries().await?,
        rounds: persistence.load_rounds().await?,
        bets: persistence.load_bets().await?,
        failed_bets: persistence.load_failed_bets().await?,
        suspensions: persistence.load_suspensions().await?,
    };
    restore(engine, state).await
}

/// Applies a stored state to a fresh engine.
///
/// # Errors
///
/// Returns [`EngineError::Internal`] when a ledger entry does not replay
/// and [`EngineError::RoundNotFound`] for a bet of an unknown round.
pub async fn restore(engine: &RoundEngine, state: StoredState) -> Result<RecoveryReport, EngineError> {
    let mut report = RecoveryReport {
        entries: state.entries.len(),
        rounds: state.rounds.len(),
        bets: state.bets.len(),
        ..RecoveryReport::default()
    };

    let ledger = engine.ledger();
    for entry in state.entries {
        ledger.restore(entry).await?;
    }
    for (user_id, currency) in &state.suspensions {
        let _ = ledger.set_suspended(*user_id, currency, true).await;
    }

    let store = engine.store();
    let mut interrupted = Vec::new();
    let mut last_number = 0;
    for round in state.rounds {
        last_number = last_number.max(round.number);
        if !round.status.is_terminal() {
            interrupted.push(round.id);
        }
        store.upsert_round(round).await;
    }
    for bet in state.bets {
        store.upsert_bet(bet).await?;
    }
    engine.resume_numbering(last_number);

    let failures = engine.failures();
    for failed in state.failed_bets {
        failures.restore(failed).await;
    }

    for round_id in interrupted {
        let mut round = store.round(round_id).await?;
        round.cancel(INTERRUPTED, None)?;
        store.upsert_round(round.clone()).await;
        let _ = engine.event_bus().publish(RoundEvent::RoundCanceled { round });
        report.interrupted += 1;
        tracing::warn!(%round_id, "round interrupted by restart; canceled");
    }
    report.orphans = failures.sweep_orphans().await;

    tracing::info!(
        entries = report.entries,
        rounds = report.rounds,
        bets = report.bets,
        interrupted = report.interrupted,
        orphans = report.orphans,
        "state recovered"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{EventBus, FixedOutcome, OperationType, RoundStore, StaticCurrencies};
    use crate::ledger::{Ledger, Posting};
    use crate::service::{EngineDeps, FailureManager, GameRules, PlaceBetRequest};
    use rust_decimal_macros::dec;

    fn engine() -> RoundEngine {
        let ledger = Arc::new(Ledger::new());
        let store = Arc::new(RoundStore::new());
        let event_bus = EventBus::new(1024);
        let failures = Arc::new(FailureManager::new(
            Arc::clone(&ledger),
            Arc::clone(&store),
            event_bus.clone(),
        ));
        RoundEngine::new(
            EngineDeps {
                ledger,
                store,
                event_bus,
                failures,
                generator: Arc::new(FixedOutcome(dec!(2))),
                currencies: Arc::new(StaticCurrencies::new(["USD"])),
                server_seed: "recovery".to_string(),
            },
            GameRules::default(),
        )
    }

    #[tokio::test]
    async fn running_round_is_canceled_and_stakes_returned() {
        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        let before = engine();
        let user = UserId::new();
        let _ = before
            .ledger()
            .credit(Posting::new(user, usd.clone(), dec!(100), OperationType::Deposit, "dep"))
            .await;
        let Ok(round) = before.open_round().await else {
            panic!("open failed");
        };
        let request = PlaceBetRequest {
            user_id: user,
            currency: usd.clone(),
            amount: dec!(25),
            client_tx_id: "k1".to_string(),
            auto_cashout: None,
        };
        let Ok(bet) = before.place_bet(round.id, request).await else {
            panic!("bet failed");
        };

        let (entries, _) = before.ledger().entries(user, Some(&usd), 0, 100).await;
        let mut entries = entries;
        entries.reverse();
        let state = StoredState {
            entries,
            rounds: vec![round.clone()],
            bets: vec![bet.clone()],
            failed_bets: Vec::new(),
            suspensions: Vec::new(),
        };

        let after = engine();
        let Ok(report) = restore(&after, state).await else {
            panic!("restore failed");
        };
        assert_eq!(report.entries, 2);
        assert_eq!(report.interrupted, 1);
        assert_eq!(report.orphans, 1);

        let balance = after.ledger().get_balance(user, &usd).await;
        assert_eq!(balance.reserved, dec!(25));
        assert_eq!(after.failures().auto_refund_pending().await, 1);
        let balance = after.ledger().get_balance(user, &usd).await;
        assert_eq!(balance.available, dec!(100));

        let Ok(next) = after.open_round().await else {
            panic!("open after restore failed");
        };
        assert_eq!(next.number, round.number + 1);
    }

    #[tokio::test]
    async fn suspensions_survive_restore() {
        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        let user = UserId::new();
        let state = StoredState {
            suspensions: vec![(user, usd.clone())],
            ..StoredState::default()
        };
        let after = engine();
        assert!(restore(&after, state).await.is_ok());
        assert!(after.ledger().get_balance(user, &usd).await.suspended);
    }
}
