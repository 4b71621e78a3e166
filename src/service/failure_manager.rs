//! Failure/refund manager: remediation of bets that could not settle.
//!
//! A bet lands here when its round closed or was canceled but its ledger
//! settlement raised an error, or when its round worker vanished. The stake
//! is still reserved; a refund releases it with a `refund` entry keyed by
//! the bet's transaction id, so repeating a refund can never credit twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::domain::{
    AdminId, Bet, BetId, BetStatus, EventBus, FailedBet, FailedBetStatus, OperationType,
    RoundEvent, RoundId, RoundStore, UserId,
};
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerEntry, LedgerError, Posting};

/// Filter for [`FailureManager::list_failed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailedBetFilter {
    /// Restrict to one status; `None` lists all.
    pub status: Option<FailedBetStatus>,
    /// Restrict to one round.
    pub round_id: Option<RoundId>,
    /// Restrict to one player.
    pub user_id: Option<UserId>,
}

impl FailedBetFilter {
    fn matches(&self, failed: &FailedBet) -> bool {
        self.status.is_none_or(|s| s == failed.status)
            && self.round_id.is_none_or(|r| r == failed.round_id)
            && self.user_id.is_none_or(|u| u == failed.user_id)
    }
}

/// Outcome of refunding one failed bet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refund {
    /// The failure record after the refund.
    pub failed: FailedBet,
    /// The `refund` ledger entry.
    pub entry: LedgerEntry,
    /// `true` when the bet had already been refunded and nothing changed.
    pub already_refunded: bool,
}

/// Records failed bets and drives them to `Refunded`.
#[derive(Debug)]
pub struct FailureManager {
    ledger: Arc<Ledger>,
    store: Arc<RoundStore>,
    event_bus: EventBus,
    records: RwLock<HashMap<BetId, FailedBet>>,
}

impl FailureManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new(ledger: Arc<Ledger>, store: Arc<RoundStore>, event_bus: EventBus) -> Self {
        Self {
            ledger,
            store,
            event_bus,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Records `bet` as failed. Recording the same bet again returns the
    /// existing record unchanged.
    pub async fn record(&self, bet: &Bet, reason: &str) -> FailedBet {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&bet.id) {
            return existing.clone();
        }
        let failed = FailedBet::pending(bet, reason);
        records.insert(bet.id, failed.clone());
        drop(records);

        tracing::warn!(
            bet_id = %bet.id,
            round_id = %bet.round_id,
            user_id = %bet.user_id,
            amount = %bet.amount,
            reason,
            "bet recorded as failed"
        );
        let _ = self.event_bus.publish(RoundEvent::FailedBetRecorded {
            failed: failed.clone(),
        });
        failed
    }

    /// Re-inserts a stored record at startup.
    pub async fn restore(&self, failed: FailedBet) {
        self.records.write().await.insert(failed.bet_id, failed);
    }

    /// Returns the record of a bet.
    pub async fn get(&self, bet_id: BetId) -> Option<FailedBet> {
        self.records.read().await.get(&bet_id).cloned()
    }

    /// Returns one page of matching records, oldest first, with the total
    /// count.
    pub async fn list_failed(
        &self,
        filter: FailedBetFilter,
        offset: usize,
        limit: usize,
    ) -> (Vec<FailedBet>, usize) {
        let mut matching: Vec<FailedBet> = self
            .records
            .read()
            .await
            .values()
            .filter(|f| filter.matches(f))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let total = matching.len();
        (matching.into_iter().skip(offset).take(limit).collect(), total)
    }

    /// Number of records awaiting a refund.
    pub async fn pending_count(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|f| f.status == FailedBetStatus::Pending)
            .count()
    }

    /// Refunds every failed bet of `user_id` in `round_id` on behalf of an
    /// operator. Bets already refunded are reported with
    /// `already_refunded` set and their original entry; no second entry is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::FailedBetNotFound`] when the user has no
    /// failed bet in the round, or the ledger error of the first refund
    /// that could not be applied.
    pub async fn manual_refund(
        &self,
        round_id: RoundId,
        user_id: UserId,
        admin_id: AdminId,
    ) -> Result<Vec<Refund>, EngineError> {
        let filter = FailedBetFilter {
            status: None,
            round_id: Some(round_id),
            user_id: Some(user_id),
        };
        let (targets, _) = self.list_failed(filter, 0, usize::MAX).await;
        if targets.is_empty() {
            return Err(EngineError::FailedBetNotFound(format!(
                "round {round_id}, user {user_id}"
            )));
        }

        let mut refunds = Vec::with_capacity(targets.len());
        for failed in targets {
            refunds.push(self.refund(&failed, Some(admin_id)).await?);
        }
        tracing::info!(%round_id, %user_id, %admin_id, count = refunds.len(), "manual refund");
        Ok(refunds)
    }

    /// Refunds every pending record with a system attribution. Failures
    /// are logged and left pending for the next attempt.
    pub async fn auto_refund_pending(&self) -> usize {
        let filter = FailedBetFilter {
            status: Some(FailedBetStatus::Pending),
            ..FailedBetFilter::default()
        };
        let (pending, _) = self.list_failed(filter, 0, usize::MAX).await;
        let mut refunded = 0;
        for failed in pending {
            match self.refund(&failed, None).await {
                Ok(refund) if !refund.already_refunded => refunded += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        bet_id = %failed.bet_id,
                        round_id = %failed.round_id,
                        error = %e,
                        "automatic refund failed; will retry"
                    );
                }
            }
        }
        refunded
    }

    /// Records bets still `Placed` in terminal rounds. Returns how many
    /// new records were created.
    pub async fn sweep_orphans(&self) -> usize {
        let mut created = 0;
        for (round, bets) in self.store.stranded().await {
            for bet in bets {
                if self.get(bet.id).await.is_none() {
                    let reason = format!("bet left unsettled after round {}", round.status);
                    let _ = self.record(&bet, &reason).await;
                    created += 1;
                }
            }
        }
        created
    }

    /// Spawns the retry loop: sweep orphans, then refund pending records,
    /// every `every`.
    pub fn spawn_retry_loop(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let orphans = self.sweep_orphans().await;
                let refunded = self.auto_refund_pending().await;
                if orphans > 0 || refunded > 0 {
                    tracing::info!(orphans, refunded, "refund sweep finished");
                }
            }
        })
    }

    async fn refund(
        &self,
        failed: &FailedBet,
        admin_id: Option<AdminId>,
    ) -> Result<Refund, EngineError> {
        let mut posting = Posting::new(
            failed.user_id,
            failed.currency.clone(),
            failed.amount,
            OperationType::Refund,
            Bet::transaction_id_for(failed.bet_id),
        );
        if let Some(admin_id) = admin_id {
            posting = posting.admin(admin_id);
        }

        if let Ok(bet) = self.store.bet(failed.bet_id).await
            && !matches!(bet.status, BetStatus::Placed | BetStatus::Refunded)
        {
            return Err(EngineError::InvalidRequest(format!(
                "bet {} already settled as {}",
                bet.id, bet.status
            )));
        }

        let (entry, fresh) = match self.ledger.release(posting).await {
            Ok(entry) => (entry, true),
            Err(LedgerError::DuplicateTransaction { original }) => (*original, false),
            Err(e) => return Err(e.into()),
        };

        let updated = {
            let mut records = self.records.write().await;
            let record = records.get_mut(&failed.bet_id).ok_or_else(|| {
                EngineError::FailedBetNotFound(failed.bet_id.to_string())
            })?;
            let changed = record.mark_refunded(entry.id, admin_id);
            (record.clone(), changed)
        };
        let (failed, changed) = updated;

        if changed {
            if fresh {
                tracing::info!(
                    bet_id = %failed.bet_id,
                    entry_id = %entry.id,
                    amount = %failed.amount,
                    manual = failed.manual,
                    "failed bet refunded"
                );
            }
            match self
                .store
                .settle_bet(failed.bet_id, BetStatus::Refunded, None)
                .await
            {
                Ok(bet) => {
                    let _ = self.event_bus.publish(RoundEvent::BetRefunded { bet });
                }
                Err(e) => {
                    tracing::warn!(bet_id = %failed.bet_id, error = %e, "refunded bet not in store");
                }
            }
            let _ = self.event_bus.publish(RoundEvent::FailedBetUpdated {
                failed: failed.clone(),
            });
        }

        Ok(Refund {
            failed,
            entry,
            already_refunded: !changed,
        })
    }
}
