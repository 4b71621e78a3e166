//! Database rows and their conversion to domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::domain::{Bet, Currency, FailedBet, Round};
use crate::error::EngineError;
use crate::ledger::LedgerEntry;

/// A row of the `rounds` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RoundRow {
    /// Round id.
    pub id: Uuid,
    /// Round counter.
    pub number: i64,
    /// Status code (`open`, `in_progress`, ...).
    pub status: String,
    /// Live or final value.
    pub current_value: Decimal,
    /// Crash multiplier.
    pub outcome: Option<Decimal>,
    /// Seed commitment.
    pub seed_hash: String,
    /// Revealed seed.
    pub seed: Option<String>,
    /// Cancellation reason.
    pub cancel_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal time.
    pub closed_at: Option<DateTime<Utc>>,
}

/// A row of the `bets` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BetRow {
    /// Bet id.
    pub id: Uuid,
    /// Round id.
    pub round_id: Uuid,
    /// Player.
    pub user_id: Uuid,
    /// Currency code.
    pub currency: String,
    /// Stake.
    pub amount: Decimal,
    /// Idempotency key.
    pub client_tx_id: String,
    /// Auto cash-out target.
    pub auto_cashout: Option<Decimal>,
    /// Status code.
    pub status: String,
    /// Credited payout.
    pub payout: Option<Decimal>,
    /// Cash-out multiplier.
    pub cashout_multiplier: Option<Decimal>,
    /// Placement time.
    pub placed_at: DateTime<Utc>,
    /// Settlement time.
    pub settled_at: Option<DateTime<Utc>>,
}

/// A row of the append-only `ledger_entries` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    /// Entry id.
    pub id: Uuid,
    /// Account holder.
    pub user_id: Uuid,
    /// Currency code.
    pub currency: String,
    /// Per-account sequence.
    pub sequence: i64,
    /// Component code.
    pub component: String,
    /// Group code.
    pub operation_group: String,
    /// Type code.
    pub operation_type: String,
    /// Delta of `amount`.
    pub change_amount: Decimal,
    /// Delta of `reserved`.
    pub reserved_change: Decimal,
    /// `amount` after the entry.
    pub balance_after: Decimal,
    /// `reserved` after the entry.
    pub reserved_after: Decimal,
    /// Originating transaction.
    pub transaction_id: String,
    /// Attributed operator.
    pub admin_id: Option<Uuid>,
    /// Status code.
    pub status: String,
    /// Application time.
    pub created_at: DateTime<Utc>,
}

/// A row of the `failed_bets` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedBetRow {
    /// Record id.
    pub id: Uuid,
    /// Failed bet.
    pub bet_id: Uuid,
    /// Round of the bet.
    pub round_id: Uuid,
    /// Owner.
    pub user_id: Uuid,
    /// Currency code.
    pub currency: String,
    /// Stake to return.
    pub amount: Decimal,
    /// Failure reason.
    pub reason: String,
    /// Operator-issued refund.
    pub manual: bool,
    /// Status code.
    pub status: String,
    /// Refund entry.
    pub refund_entry_id: Option<Uuid>,
    /// Refunding operator.
    pub admin_id: Option<Uuid>,
    /// Record time.
    pub created_at: DateTime<Utc>,
    /// Refund time.
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Serializes a unit enum to its snake_case code.
pub(crate) fn code_of<T: Serialize>(value: &T) -> Result<String, EngineError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(code)) => Ok(code),
        Ok(other) => Err(EngineError::PersistenceError(format!(
            "expected a string code, got {other}"
        ))),
        Err(e) => Err(EngineError::PersistenceError(e.to_string())),
    }
}

fn parse_code<T: DeserializeOwned>(code: &str) -> Result<T, EngineError> {
    serde_json::from_value(serde_json::Value::String(code.to_string()))
        .map_err(|e| EngineError::PersistenceError(format!("bad stored code {code:?}: {e}")))
}

fn parse_currency(code: &str) -> Result<Currency, EngineError> {
    Currency::parse(code).map_err(|e| EngineError::PersistenceError(e.to_string()))
}

fn to_u64(value: i64, column: &str) -> Result<u64, EngineError> {
    u64::try_from(value)
        .map_err(|_| EngineError::PersistenceError(format!("negative {column}: {value}")))
}

impl TryFrom<RoundRow> for Round {
    type Error = EngineError;

    fn try_from(row: RoundRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            number: to_u64(row.number, "round number")?,
            status: parse_code(&row.status)?,
            current_value: row.current_value,
            outcome: row.outcome,
            seed_hash: row.seed_hash,
            seed: row.seed,
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            started_at: row.started_at,
            closed_at: row.closed_at,
        })
    }
}

impl TryFrom<BetRow> for Bet {
    type Error = EngineError;

    fn try_from(row: BetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            round_id: row.round_id.into(),
            user_id: row.user_id.into(),
            currency: parse_currency(&row.currency)?,
            amount: row.amount,
            client_tx_id: row.client_tx_id,
            auto_cashout: row.auto_cashout,
            status: parse_code(&row.status)?,
            payout: row.payout,
            cashout_multiplier: row.cashout_multiplier,
            placed_at: row.placed_at,
            settled_at: row.settled_at,
        })
    }
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = EngineError;

    fn try_from(row: LedgerEntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            sequence: to_u64(row.sequence, "entry sequence")?,
            user_id: row.user_id.into(),
            currency: parse_currency(&row.currency)?,
            component: parse_code(&row.component)?,
            operation_group: parse_code(&row.operation_group)?,
            operation_type: parse_code(&row.operation_type)?,
            change_amount: row.change_amount,
            reserved_change: row.reserved_change,
            balance_after: row.balance_after,
            reserved_after: row.reserved_after,
            transaction_id: row.transaction_id,
            admin_id: row.admin_id.map(Into::into),
            status: parse_code(&row.status)?,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<FailedBetRow> for FailedBet {
    type Error = EngineError;

    fn try_from(row: FailedBetRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            bet_id: row.bet_id.into(),
            round_id: row.round_id.into(),
            user_id: row.user_id.into(),
            currency: parse_currency(&row.currency)?,
            amount: row.amount,
            reason: row.reason,
            manual: row.manual,
            status: parse_code(&row.status)?,
            refund_entry_id: row.refund_entry_id.map(Into::into),
            admin_id: row.admin_id.map(Into::into),
            created_at: row.created_at,
            refunded_at: row.refunded_at,
        })
    }
}
