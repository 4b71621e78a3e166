//! Operator DTOs: failed bets, refunds, fund adjustments and suspensions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{
    AdminId, BetId, Component, Currency, EntryId, FailedBet, FailedBetId, FailedBetStatus, RoundId,
    UserId,
};
use crate::error::EngineError;
use crate::ledger::LedgerEntry;
use crate::service::{FailedBetFilter, Refund};

/// Filter for `GET /admin/failed-bets`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FailedBetQuery {
    /// `pending` (default), `refunded` or `all`.
    pub status: Option<String>,
    /// Restrict to one round.
    #[param(value_type = Option<String>)]
    pub round_id: Option<RoundId>,
    /// Restrict to one user.
    #[param(value_type = Option<String>)]
    pub user_id: Option<UserId>,
}

impl FailedBetQuery {
    /// Converts the query into a manager filter.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRequest`] for an unknown status.
    pub fn filter(&self) -> Result<FailedBetFilter, EngineError> {
        let status = match self.status.as_deref() {
            None | Some("pending") => Some(FailedBetStatus::Pending),
            Some("refunded") => Some(FailedBetStatus::Refunded),
            Some("all") => None,
            Some(other) => {
                return Err(EngineError::InvalidRequest(format!(
                    "unknown failed-bet status {other:?}"
                )));
            }
        };
        Ok(FailedBetFilter {
            status,
            round_id: self.round_id,
            user_id: self.user_id,
        })
    }
}

/// Failed-bet record as exposed to operators.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FailedBetDto {
    /// Record identifier.
    pub id: FailedBetId,
    /// Bet that could not be settled.
    pub bet_id: BetId,
    /// Round of the bet.
    pub round_id: RoundId,
    /// Owner.
    pub user_id: UserId,
    /// Stake currency.
    pub currency: Currency,
    /// Stake to return.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Why settlement failed.
    pub reason: String,
    /// Whether an operator refunded it.
    pub manual: bool,
    /// Refund status.
    pub status: FailedBetStatus,
    /// Entry that returned the stake.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub refund_entry_id: Option<EntryId>,
    /// Operator that refunded it.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub admin_id: Option<AdminId>,
    /// Detection time.
    pub created_at: DateTime<Utc>,
    /// Refund time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<FailedBet> for FailedBetDto {
    fn from(f: FailedBet) -> Self {
        Self {
            id: f.id,
            bet_id: f.bet_id,
            round_id: f.round_id,
            user_id: f.user_id,
            currency: f.currency,
            amount: f.amount,
            reason: f.reason,
            manual: f.manual,
            status: f.status,
            refund_entry_id: f.refund_entry_id,
            admin_id: f.admin_id,
            created_at: f.created_at,
            refunded_at: f.refunded_at,
        }
    }
}

/// Paginated failed-bet list.
#[derive(Debug, Serialize, ToSchema)]
pub struct FailedBetListResponse {
    /// Records on this page, newest first.
    pub data: Vec<FailedBetDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Request body for `POST /admin/failed-bets/refund`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ManualRefundRequest {
    /// Round of the failed bets.
    pub round_id: RoundId,
    /// Owner of the failed bets.
    pub user_id: UserId,
}

/// One refunded failed bet.
#[derive(Debug, Serialize, ToSchema)]
pub struct RefundDto {
    /// Record after the refund.
    pub failed_bet: FailedBetDto,
    /// Entry that returned the stake.
    pub entry: LedgerEntry,
    /// `true` when the stake had been returned before this request.
    pub already_refunded: bool,
}

impl From<Refund> for RefundDto {
    fn from(r: Refund) -> Self {
        Self {
            failed_bet: r.failed.into(),
            entry: r.entry,
            already_refunded: r.already_refunded,
        }
    }
}

/// Response for `POST /admin/failed-bets/refund`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ManualRefundResponse {
    /// One item per failed bet of the user in the round.
    pub refunds: Vec<RefundDto>,
}

/// Direction of a manual fund adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FundDirection {
    /// Credit the account.
    Add,
    /// Debit the account.
    Remove,
}

/// Request body for `POST /admin/funds`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AdjustFundsRequest {
    /// Account owner.
    pub user_id: UserId,
    /// Account currency.
    #[schema(example = "USD")]
    pub currency: String,
    /// Positive amount to move.
    #[schema(value_type = String, example = "50.00")]
    pub amount: Decimal,
    /// Add or remove.
    pub direction: FundDirection,
    /// Idempotency key for the adjustment.
    pub transaction_id: String,
    /// Balance component; the currency default when omitted.
    #[serde(default)]
    pub component: Option<Component>,
}

/// Request body for the suspension endpoint.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SuspensionRequest {
    /// Block (`true`) or unblock (`false`) the account.
    pub suspended: bool,
}
