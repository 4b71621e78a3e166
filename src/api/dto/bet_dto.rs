//! Bet request/response DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::common_dto::PaginationMeta;
use crate::domain::{Bet, BetId, BetStatus, Currency, RoundId, UserId};
use crate::ledger::LedgerEntry;
use crate::service::Settlement;

/// Request body for `POST /rounds/{id}/bets`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceBetBody {
    /// Stake currency code.
    #[schema(example = "USD")]
    pub currency: String,
    /// Stake amount.
    #[schema(value_type = String, example = "10.00")]
    pub amount: Decimal,
    /// Idempotency key chosen by the client.
    pub client_tx_id: String,
    /// Cash out automatically when the live value reaches this target.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "2.00")]
    pub auto_cashout: Option<Decimal>,
}

/// Query for `DELETE /rounds/{id}/bets`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CancelBetParams {
    /// Bet to withdraw; defaults to the caller's active bet.
    #[param(value_type = Option<String>)]
    pub bet_id: Option<BetId>,
}

/// Request body for `POST /rounds/{id}/cashout`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CashoutBody {
    /// Bet to cash out; defaults to the caller's active bet.
    #[serde(default)]
    pub bet_id: Option<BetId>,
    /// Multiplier to lock in; must not exceed the live value.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub multiplier: Option<Decimal>,
}

/// Bet as exposed over HTTP.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BetDto {
    /// Bet identifier.
    pub id: BetId,
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Owner.
    pub user_id: UserId,
    /// Stake currency.
    pub currency: Currency,
    /// Stake.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Client idempotency key.
    pub client_tx_id: String,
    /// Automatic cash-out target.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub auto_cashout: Option<Decimal>,
    /// Settlement status.
    pub status: BetStatus,
    /// Amount credited on a win.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub payout: Option<Decimal>,
    /// Multiplier the bet was cashed out at.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub cashout_multiplier: Option<Decimal>,
    /// Placement time.
    pub placed_at: DateTime<Utc>,
    /// Settlement time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl From<Bet> for BetDto {
    fn from(b: Bet) -> Self {
        Self {
            id: b.id,
            round_id: b.round_id,
            user_id: b.user_id,
            currency: b.currency,
            amount: b.amount,
            client_tx_id: b.client_tx_id,
            auto_cashout: b.auto_cashout,
            status: b.status,
            payout: b.payout,
            cashout_multiplier: b.cashout_multiplier,
            placed_at: b.placed_at,
            settled_at: b.settled_at,
        }
    }
}

/// Result of a cash-out.
#[derive(Debug, Serialize, ToSchema)]
pub struct CashoutResponse {
    /// The bet, now won.
    pub bet: BetDto,
    /// Amount credited.
    #[schema(value_type = String)]
    pub payout: Decimal,
    /// Multiplier applied.
    #[schema(value_type = String)]
    pub multiplier: Decimal,
    /// Ledger entry of the payout.
    pub entry: LedgerEntry,
}

impl From<Settlement> for CashoutResponse {
    fn from(s: Settlement) -> Self {
        Self {
            bet: s.bet.into(),
            payout: s.payout,
            multiplier: s.multiplier,
            entry: s.entry,
        }
    }
}

/// Paginated bet history.
#[derive(Debug, Serialize, ToSchema)]
pub struct BetListResponse {
    /// Bets on this page, newest first.
    pub data: Vec<BetDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}
