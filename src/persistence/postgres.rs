//! PostgreSQL implementation of the persistence layer.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use super::models::{BetRow, FailedBetRow, LedgerEntryRow, RoundRow, code_of};
use crate::config::EngineConfig;
use crate::domain::{Bet, Currency, FailedBet, Round, RoundEvent, UserId};
use crate::error::EngineError;
use crate::ledger::LedgerEntry;

/// PostgreSQL-backed store for rounds, bets, ledger entries, failed bets
/// and the domain event journal.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Creates a new persistence layer with the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects with the pool settings of `config` and applies the
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] when the database is
    /// unreachable or a migration fails.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(
                config.database_connect_timeout_secs,
            ))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::PersistenceError(e.to_string()))?;
        tracing::info!("database connected and migrated");
        Ok(Self::new(pool))
    }

    /// Inserts or updates a round snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn upsert_round(&self, round: &Round) -> Result<(), EngineError> {
        let number = i64::try_from(round.number)
            .map_err(|_| EngineError::PersistenceError(format!("round number {}", round.number)))?;
        sqlx::query(
            "INSERT INTO rounds (id, number, status, current_value, outcome, seed_hash, seed, \
             cancel_reason, created_at, started_at, closed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, \
             current_value = EXCLUDED.current_value, outcome = EXCLUDED.outcome, \
             seed = EXCLUDED.seed, cancel_reason = EXCLUDED.cancel_reason, \
             started_at = EXCLUDED.started_at, closed_at = EXCLUDED.closed_at",
        )
        .bind(Uuid::from(round.id))
        .bind(number)
        .bind(round.status.as_str())
        .bind(round.current_value)
        .bind(round.outcome)
        .bind(&round.seed_hash)
        .bind(&round.seed)
        .bind(&round.cancel_reason)
        .bind(round.created_at)
        .bind(round.started_at)
        .bind(round.closed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or updates a bet snapshot.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn upsert_bet(&self, bet: &Bet) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO bets (id, round_id, user_id, currency, amount, client_tx_id, \
             auto_cashout, status, payout, cashout_multiplier, placed_at, settled_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, \
             payout = EXCLUDED.payout, cashout_multiplier = EXCLUDED.cashout_multiplier, \
             settled_at = EXCLUDED.settled_at",
        )
        .bind(Uuid::from(bet.id))
        .bind(Uuid::from(bet.round_id))
        .bind(Uuid::from(bet.user_id))
        .bind(bet.currency.as_str())
        .bind(bet.amount)
        .bind(&bet.client_tx_id)
        .bind(bet.auto_cashout)
        .bind(bet.status.as_str())
        .bind(bet.payout)
        .bind(bet.cashout_multiplier)
        .bind(bet.placed_at)
        .bind(bet.settled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a ledger entry. Replaying an already stored entry is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), EngineError> {
        let sequence = i64::try_from(entry.sequence)
            .map_err(|_| EngineError::PersistenceError(format!("sequence {}", entry.sequence)))?;
        sqlx::query(
            "INSERT INTO ledger_entries (id, user_id, currency, sequence, component, \
             operation_group, operation_type, change_amount, reserved_change, balance_after, \
             reserved_after, transaction_id, admin_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(Uuid::from(entry.id))
        .bind(Uuid::from(entry.user_id))
        .bind(entry.currency.as_str())
        .bind(sequence)
        .bind(entry.component.as_str())
        .bind(entry.operation_group.as_str())
        .bind(entry.operation_type.as_str())
        .bind(entry.change_amount)
        .bind(entry.reserved_change)
        .bind(entry.balance_after)
        .bind(entry.reserved_after)
        .bind(&entry.transaction_id)
        .bind(entry.admin_id.map(Uuid::from))
        .bind(code_of(&entry.status)?)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts a failure record or applies its refund.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn upsert_failed_bet(&self, failed: &FailedBet) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO failed_bets (id, bet_id, round_id, user_id, currency, amount, reason, \
             manual, status, refund_entry_id, admin_id, created_at, refunded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (bet_id) DO UPDATE SET manual = EXCLUDED.manual, \
             status = EXCLUDED.status, refund_entry_id = EXCLUDED.refund_entry_id, \
             admin_id = EXCLUDED.admin_id, refunded_at = EXCLUDED.refunded_at",
        )
        .bind(Uuid::from(failed.id))
        .bind(Uuid::from(failed.bet_id))
        .bind(Uuid::from(failed.round_id))
        .bind(Uuid::from(failed.user_id))
        .bind(failed.currency.as_str())
        .bind(failed.amount)
        .bind(&failed.reason)
        .bind(failed.manual)
        .bind(code_of(&failed.status)?)
        .bind(failed.refund_entry_id.map(Uuid::from))
        .bind(failed.admin_id.map(Uuid::from))
        .bind(failed.created_at)
        .bind(failed.refunded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends a domain event to the journal.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn save_event(&self, event: &RoundEvent) -> Result<i64, EngineError> {
        let payload = serde_json::to_value(event)
            .map_err(|e| EngineError::PersistenceError(e.to_string()))?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO round_events (round_id, event_type, payload) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(Uuid::from(event.round_id()))
        .bind(event.event_type_str())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Loads every ledger entry in per-account sequence order.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure or
    /// an unreadable row.
    pub async fn load_entries(&self) -> Result<Vec<LedgerEntry>, EngineError> {
        sqlx::query_as::<_, LedgerEntryRow>(
            "SELECT * FROM ledger_entries ORDER BY user_id, currency, sequence",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    /// Loads every round, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure or
    /// an unreadable row.
    pub async fn load_rounds(&self) -> Result<Vec<Round>, EngineError> {
        sqlx::query_as::<_, RoundRow>("SELECT * FROM rounds ORDER BY number")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Round::try_from)
            .collect()
    }

    /// Loads every bet, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure or
    /// an unreadable row.
    pub async fn load_bets(&self) -> Result<Vec<Bet>, EngineError> {
        sqlx::query_as::<_, BetRow>("SELECT * FROM bets ORDER BY placed_at")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Bet::try_from)
            .collect()
    }

    /// Loads every failure record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure or
    /// an unreadable row.
    pub async fn load_failed_bets(&self) -> Result<Vec<FailedBet>, EngineError> {
        sqlx::query_as::<_, FailedBetRow>("SELECT * FROM failed_bets ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(FailedBet::try_from)
            .collect()
    }

    /// Stores the compliance block of an account.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure.
    pub async fn save_suspension(
        &self,
        user_id: UserId,
        currency: &Currency,
        suspended: bool,
    ) -> Result<(), EngineError> {
        sqlx::query(
            "INSERT INTO account_suspensions (user_id, currency, suspended, updated_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (user_id, currency) DO UPDATE SET suspended = EXCLUDED.suspended, \
             updated_at = NOW()",
        )
        .bind(Uuid::from(user_id))
        .bind(currency.as_str())
        .bind(suspended)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Loads every suspended account.
    ///
    /// # Errors
    ///
    /// Returns a [`EngineError::PersistenceError`] on database failure or
    /// an unreadable row.
    pub async fn load_suspensions(&self) -> Result<Vec<(UserId, Currency)>, EngineError> {
        sqlx::query_as::<_, (Uuid, String)>(
            "SELECT user_id, currency FROM account_suspensions WHERE suspended",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(user_id, code)| {
            Currency::parse(&code)
                .map(|currency| (UserId::from(user_id), currency))
                .map_err(|e| EngineError::PersistenceError(e.to_string()))
        })
        .collect()
    }

    /// Returns `true` when the database answers a trivial query.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
