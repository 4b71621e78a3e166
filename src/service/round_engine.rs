//! Round engine: the entry point for every round and bet operation.
//!
//! The engine owns the handle of the single live round. Mutating calls are
//! forwarded into that round's worker queue; reads are served from the
//! [`RoundStore`]. Once a round is terminal its worker exits and requests
//! for it are answered from the stored snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::failure_manager::FailureManager;
use super::round_worker::{self, Command, RoundHandle, WorkerContext, WorkerGone};
use crate::domain::{
    Bet, BetId, BetStatus, Currency, CurrencyDirectory, EventBus, OutcomeGenerator, Round,
    RoundEvent, RoundId, RoundSeed, RoundStatus, RoundStore, UserId,
};
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerEntry};

/// Reason recorded on rounds whose worker disappeared.
const WORKER_LOST: &str = "round worker lost";

/// Game rules enforced by every round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameRules {
    /// Smallest accepted stake.
    pub min_bet: Decimal,
    /// Largest accepted stake.
    pub max_bet: Decimal,
    /// Whether a user may hold several active bets in one round.
    pub allow_multiple_bets: bool,
    /// Whether a round without bets is canceled at start.
    pub cancel_empty_rounds: bool,
    /// Relative growth of the live value per tick.
    pub tick_step: Decimal,
    /// How long a round may stay open before it is canceled.
    #[serde(with = "duration_secs")]
    pub max_open_duration: Duration,
    /// How long a round may stay in progress before it is forced closed.
    #[serde(with = "duration_secs")]
    pub max_round_duration: Duration,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            min_bet: Decimal::ONE,
            max_bet: Decimal::new(1000, 0),
            allow_multiple_bets: false,
            cancel_empty_rounds: true,
            tick_step: Decimal::new(1, 2),
            max_open_duration: Duration::from_secs(300),
            max_round_duration: Duration::from_secs(120),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Stake request forwarded to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceBetRequest {
    /// Authenticated player.
    pub user_id: UserId,
    /// Stake currency.
    pub currency: Currency,
    /// Stake amount.
    pub amount: Decimal,
    /// Caller-supplied idempotency key.
    pub client_tx_id: String,
    /// Optional automatic cash-out target.
    pub auto_cashout: Option<Decimal>,
}

/// Player action evaluated against the live round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolveAction {
    /// Take the stake times the live value (or `multiplier`, when given and
    /// not above the live value).
    CashOut {
        /// Bet to cash out; defaults to the user's active bet.
        bet_id: Option<BetId>,
        /// Requested multiplier.
        multiplier: Option<Decimal>,
    },
}

/// Result of a successful cash-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// The bet, now `Won`.
    pub bet: Bet,
    /// Amount credited.
    pub payout: Decimal,
    /// Multiplier applied.
    pub multiplier: Decimal,
    /// The `bet_cashout` ledger entry.
    pub entry: LedgerEntry,
}

/// Result of closing a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSummary {
    /// The closed round.
    pub round: Round,
    /// Bets settled as won during the close.
    pub won: usize,
    /// Bets settled as lost.
    pub lost: usize,
    /// Bets handed to the failure manager.
    pub failed: usize,
}

/// Result of canceling a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelSummary {
    /// The canceled round.
    pub round: Round,
    /// Stakes returned.
    pub refunded: usize,
    /// Bets handed to the failure manager.
    pub failed: usize,
}

/// Collaborators of the engine.
#[derive(Debug, Clone)]
pub struct EngineDeps {
    /// Balance ledger.
    pub ledger: Arc<Ledger>,
    /// Round and bet history.
    pub store: Arc<RoundStore>,
    /// Domain event fan-out.
    pub event_bus: EventBus,
    /// Failed-bet remediation.
    pub failures: Arc<FailureManager>,
    /// Outcome source.
    pub generator: Arc<dyn OutcomeGenerator>,
    /// Supported currencies.
    pub currencies: Arc<dyn CurrencyDirectory>,
    /// Server secret mixed into every round seed.
    pub server_seed: String,
}

#[derive(Debug)]
struct LiveRound {
    handle: RoundHandle,
    task: JoinHandle<()>,
}

/// Entry point for round and bet operations.
///
/// Cheap to clone; clones share the same live round.
#[derive(Debug, Clone)]
pub struct RoundEngine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    ctx: WorkerContext,
    server_seed: String,
    live: Mutex<Option<LiveRound>>,
    last_number: AtomicU64,
}

impl RoundEngine {
    /// Creates an engine with no round.
    #[must_use]
    pub fn new(deps: EngineDeps, rules: GameRules) -> Self {
        let ctx = WorkerContext {
            ledger: deps.ledger,
            store: deps.store,
            event_bus: deps.event_bus,
            failures: deps.failures,
            generator: deps.generator,
            currencies: deps.currencies,
            rules,
        };
        Self {
            inner: Arc::new(EngineInner {
                ctx,
                server_seed: deps.server_seed,
                live: Mutex::new(None),
                last_number: AtomicU64::new(0),
            }),
        }
    }

    /// Game rules in force.
    #[must_use]
    pub fn rules(&self) -> &GameRules {
        &self.inner.ctx.rules
    }

    /// The balance ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.inner.ctx.ledger
    }

    /// The round and bet history store.
    #[must_use]
    pub fn store(&self) -> &Arc<RoundStore> {
        &self.inner.ctx.store
    }

    /// The failure manager.
    #[must_use]
    pub fn failures(&self) -> &Arc<FailureManager> {
        &self.inner.ctx.failures
    }

    /// The event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.ctx.event_bus
    }

    /// The currency directory.
    #[must_use]
    pub fn currencies(&self) -> &Arc<dyn CurrencyDirectory> {
        &self.inner.ctx.currencies
    }

    /// Makes the next round number follow `number`, after a restart.
    pub fn resume_numbering(&self, number: u64) {
        self.inner.last_number.fetch_max(number, Ordering::SeqCst);
    }

    /// Opens a new round.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RoundAlreadyOpen`] while another round is not
    /// terminal.
    pub async fn open_round(&self) -> Result<Round, EngineError> {
        let mut live = self.inner.live.lock().await;
        if let Some(current) = live.as_ref() {
            if current.handle.is_dead() {
                let round_id = current.handle.round_id();
                *live = None;
                drop(live);
                let _ = self.reap(round_id).await;
                live = self.inner.live.lock().await;
            } else if !current.handle.status().is_terminal() {
                return Err(EngineError::RoundAlreadyOpen(current.handle.round_id()));
            }
        }

        let number = self.inner.last_number.fetch_add(1, Ordering::SeqCst) + 1;
        let seed = RoundSeed::new(self.inner.server_seed.clone(), number);
        let round = Round::open(RoundId::new(), number, seed.commitment());
        self.store().insert(round.clone()).await?;

        let (handle, task) = round_worker::spawn(round.clone(), seed, self.inner.ctx.clone());
        *live = Some(LiveRound { handle, task });
        drop(live);

        tracing::info!(round_id = %round.id, number, seed_hash = %round.seed_hash, "round opened");
        let _ = self.event_bus().publish(RoundEvent::RoundOpened {
            round: round.clone(),
        });
        Ok(round)
    }

    /// Stops accepting bets and starts the value rising. With no bets and
    /// `cancel_empty_rounds` set, the round is canceled instead.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotOpen`] unless the round is open, and
    /// [`EngineError::Outcome`] when the generator fails (the round is then
    /// canceled and every stake released).
    pub async fn start_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.dispatch(round_id, |reply| Command::Start { reply }).await
    }

    /// Places a bet on an open round.
    ///
    /// Repeating a request with the same `client_tx_id` and parameters
    /// returns the original bet without touching the ledger, also after the
    /// round started or ended.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotOpen`], [`EngineError::InsufficientFunds`],
    /// [`EngineError::DuplicateBet`] and the validation errors.
    pub async fn place_bet(
        &self,
        round_id: RoundId,
        request: PlaceBetRequest,
    ) -> Result<Bet, EngineError> {
        let retry = request.clone();
        let result = self
            .dispatch(round_id, |reply| Command::PlaceBet { request, reply })
            .await;
        let ended = matches!(
            &result,
            Err(EngineError::RoundNotOpen { status, .. }) if status.is_terminal()
        );
        if !ended {
            return result;
        }
        // The worker is gone; a retried key is answered from the store.
        let bets = self.store().bets(round_id).await?;
        let original = bets
            .iter()
            .find(|b| b.user_id == retry.user_id && b.client_tx_id == retry.client_tx_id);
        match original {
            Some(existing) => round_worker::replay_placement(existing, &retry),
            None => result,
        }
    }

    /// Withdraws a bet while the round is still open.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotOpen`], [`EngineError::BetNotFound`] or
    /// [`EngineError::BetAlreadySettled`].
    pub async fn cancel_bet(
        &self,
        round_id: RoundId,
        user_id: UserId,
        bet_id: Option<BetId>,
    ) -> Result<Bet, EngineError> {
        self.dispatch(round_id, |reply| Command::CancelBet {
            user_id,
            bet_id,
            reply,
        })
        .await
    }

    /// Moves the live value one tick toward the outcome and returns the
    /// round snapshot. Reaching the outcome closes the round.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotInProgress`] before start and
    /// [`EngineError::RoundAlreadyClosed`] after the outcome is fixed.
    pub async fn advance(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.dispatch(round_id, |reply| Command::Advance { reply })
            .await
    }

    /// Evaluates a player action against the live round.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundAlreadyClosed`] once the outcome is fixed,
    /// [`EngineError::RoundNotInProgress`] before start,
    /// [`EngineError::BetNotFound`] or [`EngineError::BetAlreadySettled`].
    pub async fn resolve(
        &self,
        round_id: RoundId,
        user_id: UserId,
        action: ResolveAction,
    ) -> Result<Settlement, EngineError> {
        self.dispatch(round_id, |reply| Command::Resolve {
            user_id,
            action,
            reply,
        })
        .await
    }

    /// Fixes the outcome (the generated one when `outcome` is `None`) and
    /// settles every unresolved bet.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotInProgress`] before start and
    /// [`EngineError::RoundAlreadyClosed`] when already terminal.
    pub async fn close_round(
        &self,
        round_id: RoundId,
        outcome: Option<Decimal>,
    ) -> Result<CloseSummary, EngineError> {
        self.dispatch(round_id, |reply| Command::Close { outcome, reply })
            .await
    }

    /// Cancels the round and releases every unresolved stake.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundAlreadyClosed`] when already terminal.
    pub async fn cancel_round(
        &self,
        round_id: RoundId,
        reason: &str,
    ) -> Result<CancelSummary, EngineError> {
        let reason = reason.to_string();
        self.dispatch(round_id, |reply| Command::Cancel { reason, reply })
            .await
    }

    /// Returns a round snapshot.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotFound`] for an unknown id.
    pub async fn get_round(&self, round_id: RoundId) -> Result<Round, EngineError> {
        self.store().round(round_id).await
    }

    /// Returns a round's bets.
    ///
    /// # Errors
    ///
    /// [`EngineError::RoundNotFound`] for an unknown id.
    pub async fn round_bets(&self, round_id: RoundId) -> Result<Vec<Bet>, EngineError> {
        self.store().bets(round_id).await
    }

    /// Returns one page of rounds, newest first, with the total count.
    pub async fn list_rounds(&self, offset: usize, limit: usize) -> (Vec<Round>, usize) {
        self.store().list(offset, limit).await
    }

    /// Returns the live round, or the most recent one when none is live.
    pub async fn current_round(&self) -> Option<Round> {
        let live_id = self
            .inner
            .live
            .lock()
            .await
            .as_ref()
            .map(|l| l.handle.round_id());
        match live_id {
            Some(id) => self.store().round(id).await.ok(),
            None => self.store().latest().await,
        }
    }

    /// Returns one page of a user's bets, newest first, with the total.
    pub async fn user_bets(&self, user_id: UserId, offset: usize, limit: usize) -> (Vec<Bet>, usize) {
        self.store().user_bets(user_id, offset, limit).await
    }

    /// Checks the live round's worker and reaps it if it died. Returns the
    /// reaped round id.
    pub async fn reap_dead(&self) -> Option<RoundId> {
        let round_id = {
            let mut live = self.inner.live.lock().await;
            let dead = live.as_ref().filter(|l| l.handle.is_dead())?.handle.round_id();
            *live = None;
            dead
        };
        let _ = self.reap(round_id).await;
        Some(round_id)
    }

    /// Cancels the live round, if any, for shutdown.
    pub async fn shutdown(&self) {
        let live = self.inner.live.lock().await.take();
        if let Some(live) = live {
            let round_id = live.handle.round_id();
            let reason = "engine shutting down".to_string();
            match live
                .handle
                .request(|reply| Command::Cancel { reason, reply })
                .await
            {
                Ok(Ok(_)) | Ok(Err(EngineError::RoundAlreadyClosed(_))) => {}
                Ok(Err(e)) => tracing::warn!(%round_id, error = %e, "shutdown cancel failed"),
                Err(WorkerGone(_)) => {
                    let _ = self.reap(round_id).await;
                }
            }
            let _ = live.task.await;
        }
    }

    async fn dispatch<T>(
        &self,
        round_id: RoundId,
        make: impl FnOnce(round_worker::Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let handle = self
            .inner
            .live
            .lock()
            .await
            .as_ref()
            .filter(|l| l.handle.round_id() == round_id)
            .map(|l| l.handle.clone());

        let command = match handle {
            Some(handle) => match handle.request(make).await {
                Ok(result) => return result,
                Err(WorkerGone(_)) if !handle.status().is_terminal() => {
                    let _ = self.reap_dead().await;
                    return Err(EngineError::RoundUnavailable(round_id));
                }
                Err(WorkerGone(Some(command))) => command,
                Err(WorkerGone(None)) => return Err(EngineError::RoundAlreadyClosed(round_id)),
            },
            None => {
                let (reply, _) = tokio::sync::oneshot::channel();
                make(reply)
            }
        };

        // The worker has exited: answer from the stored snapshot.
        let round = self.store().round(round_id).await?;
        if !round.status.is_terminal() {
            return Err(EngineError::RoundUnavailable(round_id));
        }
        Err(command.rejection(&round))
    }

    /// Marks a round whose worker died as canceled and hands its unresolved
    /// bets to the failure manager. Stakes stay reserved until refunded.
    /// Returns how many bets it newly handed over.
    async fn reap(&self, round_id: RoundId) -> usize {
        let Ok(mut round) = self.store().round(round_id).await else {
            return 0;
        };
        if !round.status.is_terminal() {
            if let Err(e) = round.cancel(WORKER_LOST, None) {
                tracing::error!(%round_id, error = %e, "could not cancel reaped round");
                return 0;
            }
            self.store().upsert_round(round.clone()).await;
            let _ = self
                .event_bus()
                .publish(RoundEvent::RoundCanceled { round });
        }

        let bets = self.store().bets(round_id).await.unwrap_or_default();
        let mut recorded = 0;
        for bet in bets.iter().filter(|b| b.status == BetStatus::Placed) {
            if self.failures().get(bet.id).await.is_some() {
                continue;
            }
            let _ = self.failures().record(bet, WORKER_LOST).await;
            recorded += 1;
        }
        tracing::error!(%round_id, recorded, "round worker lost; round canceled");
        recorded
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{FixedOutcome, OperationType, StaticCurrencies};
    use crate::ledger::Posting;
    use rust_decimal_macros::dec;

    fn usd() -> Currency {
        let Ok(c) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        c
    }

    fn engine_with(outcome: Decimal, rules: GameRules) -> RoundEngine {
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
                generator: Arc::new(FixedOutcome(outcome)),
                currencies: Arc::new(StaticCurrencies::new(["USD", "P"])),
                server_seed: "test-seed".to_string(),
            },
            rules,
        )
    }

    async fn funded_user(engine: &RoundEngine, amount: Decimal) -> UserId {
        let user = UserId::new();
        let deposit = Posting::new(user, usd(), amount, OperationType::Deposit, format!("dep-{user}"));
        let Ok(_) = engine.ledger().credit(deposit).await else {
            panic!("deposit failed");
        };
        user
    }

    fn stake(user_id: UserId, amount: Decimal, key: &str) -> PlaceBetRequest {
        PlaceBetRequest {
            user_id,
            currency: usd(),
            amount,
            client_tx_id: key.to_string(),
            auto_cashout: None,
        }
    }

    #[tokio::test]
    async fn only_one_round_at_a_time() {
        let engine = engine_with(dec!(2), GameRules::default());
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        assert_eq!(round.number, 1);
        assert_eq!(round.seed_hash, RoundSeed::new("test-seed", 1).commitment());
        assert!(matches!(
            engine.open_round().await,
            Err(EngineError::RoundAlreadyOpen(id)) if id == round.id
        ));

        let Ok(summary) = engine.cancel_round(round.id, "test").await else {
            panic!("cancel failed");
        };
        assert_eq!(summary.round.status, RoundStatus::Canceled);
        let Ok(next) = engine.open_round().await else {
            panic!("second open failed");
        };
        assert_eq!(next.number, 2);
    }

    #[tokio::test]
    async fn empty_round_is_canceled_at_start() {
        let engine = engine_with(dec!(2), GameRules::default());
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let Ok(started) = engine.start_round(round.id).await else {
            panic!("start failed");
        };
        assert_eq!(started.status, RoundStatus::Canceled);
        assert_eq!(started.cancel_reason.as_deref(), Some("no bets placed"));
    }

    #[tokio::test]
    async fn advance_rises_until_the_outcome() {
        let engine = engine_with(dec!(1.05), GameRules::default());
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let _ = engine.place_bet(round.id, stake(user, dec!(10), "a1")).await;
        let _ = engine.start_round(round.id).await;

        let mut last = Decimal::ONE;
        let mut ticks = 0;
        loop {
            let Ok(snapshot) = engine.advance(round.id).await else {
                panic!("advance failed");
            };
            assert!(snapshot.current_value > last);
            last = snapshot.current_value;
            ticks += 1;
            if snapshot.status == RoundStatus::Closed {
                assert_eq!(snapshot.outcome, Some(dec!(1.05)));
                break;
            }
            assert!(ticks < 10, "round never closed");
        }
        assert_eq!(ticks, 5);
        assert!(matches!(
            engine.advance(round.id).await,
            Err(EngineError::RoundAlreadyClosed(_))
        ));
        let Ok(bets) = engine.round_bets(round.id).await else {
            panic!("round missing");
        };
        assert_eq!(bets.first().map(|b| b.status), Some(BetStatus::Lost));
    }

    #[tokio::test]
    async fn auto_cashout_fires_during_advance() {
        let engine = engine_with(dec!(3), GameRules::default());
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let mut request = stake(user, dec!(10), "a1");
        request.auto_cashout = Some(dec!(1.03));
        let _ = engine.place_bet(round.id, request).await;
        let _ = engine.start_round(round.id).await;
        for _ in 0..3 {
            let _ = engine.advance(round.id).await;
        }

        let Ok(bets) = engine.round_bets(round.id).await else {
            panic!("round missing");
        };
        let Some(bet) = bets.first() else {
            panic!("bet missing");
        };
        assert_eq!(bet.status, BetStatus::Won);
        assert_eq!(bet.payout, Some(dec!(10.3)));
        assert_eq!(engine.ledger().get_balance(user, &usd()).await.amount, dec!(100.3));
    }

    #[tokio::test]
    async fn cancel_bet_releases_the_stake() {
        let engine = engine_with(dec!(2), GameRules::default());
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let _ = engine.place_bet(round.id, stake(user, dec!(10), "a1")).await;
        let Ok(bet) = engine.cancel_bet(round.id, user, None).await else {
            panic!("cancel failed");
        };
        assert_eq!(bet.status, BetStatus::Canceled);
        assert_eq!(engine.ledger().get_balance(user, &usd()).await.available, dec!(100));
        assert!(matches!(
            engine.cancel_bet(round.id, user, Some(bet.id)).await,
            Err(EngineError::BetAlreadySettled(_))
        ));
    }

    #[tokio::test]
    async fn stake_limits_and_currency_are_enforced() {
        let engine = engine_with(dec!(2), GameRules::default());
        let user = funded_user(&engine, dec!(5000)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        assert!(matches!(
            engine.place_bet(round.id, stake(user, dec!(0.5), "a")).await,
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            engine.place_bet(round.id, stake(user, dec!(2000), "b")).await,
            Err(EngineError::InvalidAmount(_))
        ));
        let Ok(eur) = Currency::parse("EUR") else {
            panic!("valid currency");
        };
        let mut request = stake(user, dec!(10), "c");
        request.currency = eur;
        assert!(matches!(
            engine.place_bet(round.id, request).await,
            Err(EngineError::UnknownCurrency(_))
        ));
    }

    #[tokio::test]
    async fn requests_for_unknown_rounds_fail() {
        let engine = engine_with(dec!(2), GameRules::default());
        let missing = RoundId::new();
        assert!(matches!(
            engine.advance(missing).await,
            Err(EngineError::RoundNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn dead_worker_is_reaped() {
        let engine = engine_with(dec!(2), GameRules::default());
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let Ok(bet) = engine.place_bet(round.id, stake(user, dec!(10), "a1")).await else {
            panic!("bet failed");
        };

        {
            let live = engine.inner.live.lock().await;
            if let Some(live) = live.as_ref() {
                live.task.abort();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(engine.reap_dead().await, Some(round.id));
        let Ok(stored) = engine.get_round(round.id).await else {
            panic!("round missing");
        };
        assert_eq!(stored.status, RoundStatus::Canceled);
        assert!(engine.failures().get(bet.id).await.is_some());
        assert_eq!(engine.reap(round.id).await, 0);

        // Funds stay reserved until the refund runs.
        assert_eq!(engine.ledger().get_balance(user, &usd()).await.reserved, dec!(10));
        assert_eq!(engine.failures().auto_refund_pending().await, 1);
        assert_eq!(engine.ledger().get_balance(user, &usd()).await.available, dec!(100));

        assert!(engine.open_round().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unstarted_round_is_canceled_after_the_bet_window() {
        let rules = GameRules {
            max_open_duration: Duration::from_secs(5),
            ..GameRules::default()
        };
        let engine = engine_with(dec!(2), rules);
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let Ok(bet) = engine.place_bet(round.id, stake(user, dec!(10), "a1")).await else {
            panic!("bet failed");
        };
        assert_eq!(engine.ledger().get_balance(user, &usd()).await.reserved, dec!(10));

        tokio::time::sleep(Duration::from_secs(6)).await;

        let Ok(stored) = engine.get_round(round.id).await else {
            panic!("round missing");
        };
        assert_eq!(stored.status, RoundStatus::Canceled);
        let Ok(bets) = engine.round_bets(round.id).await else {
            panic!("round missing");
        };
        assert_eq!(bets.first().map(|b| (b.id, b.status)), Some((bet.id, BetStatus::Canceled)));
        let balance = engine.ledger().get_balance(user, &usd()).await;
        assert_eq!(balance.reserved, dec!(0));
        assert_eq!(balance.available, dec!(100));
        assert!(matches!(
            engine.place_bet(round.id, stake(user, dec!(10), "a2")).await,
            Err(EngineError::RoundNotOpen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_round_is_forced_closed() {
        let rules = GameRules {
            max_round_duration: Duration::from_secs(5),
            ..GameRules::default()
        };
        let engine = engine_with(dec!(50), rules);
        let user = funded_user(&engine, dec!(100)).await;
        let Ok(round) = engine.open_round().await else {
            panic!("open failed");
        };
        let _ = engine.place_bet(round.id, stake(user, dec!(10), "a1")).await;
        let _ = engine.start_round(round.id).await;
        let _ = engine.advance(round.id).await;

        tokio::time::sleep(Duration::from_secs(6)).await;

        let Ok(stored) = engine.get_round(round.id).await else {
            panic!("round missing");
        };
        assert_eq!(stored.status, RoundStatus::Closed);
        assert_eq!(stored.outcome, Some(dec!(1.01)));
    }
}
