//! Record of a bet whose round could not settle it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::bet::Bet;
use super::money::Currency;
use super::{AdminId, BetId, EntryId, FailedBetId, RoundId, UserId};

/// Remediation state of a [`FailedBet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailedBetStatus {
    /// Stake still reserved; waiting for a refund.
    Pending,
    /// Stake returned to the player.
    Refunded,
}

/// Audit record of an unsettled bet. Append-only: the only mutation is the
/// single `Pending -> Refunded` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBet {
    /// Record identifier.
    pub id: FailedBetId,
    /// Bet that failed to settle.
    pub bet_id: BetId,
    /// Round of the bet.
    pub round_id: RoundId,
    /// Owner of the bet.
    pub user_id: UserId,
    /// Stake currency.
    pub currency: Currency,
    /// Stake to return.
    pub amount: Decimal,
    /// Why settlement failed.
    pub reason: String,
    /// Whether the refund was issued by an operator.
    pub manual: bool,
    /// Remediation state.
    pub status: FailedBetStatus,
    /// Ledger entry that returned the stake.
    pub refund_entry_id: Option<EntryId>,
    /// Operator who issued a manual refund.
    pub admin_id: Option<AdminId>,
    /// When the failure was recorded.
    pub created_at: DateTime<Utc>,
    /// When the stake was returned.
    pub refunded_at: Option<DateTime<Utc>>,
}

impl FailedBet {
    /// Creates a pending record for `bet`.
    #[must_use]
    pub fn pending(bet: &Bet, reason: impl Into<String>) -> Self {
        Self {
            id: FailedBetId::new(),
            bet_id: bet.id,
            round_id: bet.round_id,
            user_id: bet.user_id,
            currency: bet.currency.clone(),
            amount: bet.amount,
            reason: reason.into(),
            manual: false,
            status: FailedBetStatus::Pending,
            refund_entry_id: None,
            admin_id: None,
            created_at: Utc::now(),
            refunded_at: None,
        }
    }

    /// Marks the record refunded by `entry_id`. Returns `false` if it was
    /// already refunded.
    pub fn mark_refunded(&mut self, entry_id: EntryId, admin_id: Option<AdminId>) -> bool {
        if self.status == FailedBetStatus::Refunded {
            return false;
        }
        self.status = FailedBetStatus::Refunded;
        self.refund_entry_id = Some(entry_id);
        self.manual = admin_id.is_some();
        self.admin_id = admin_id;
        self.refunded_at = Some(Utc::now());
        true
    }
}
