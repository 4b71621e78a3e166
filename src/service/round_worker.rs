//! The serialized execution context of one round.
//!
//! Each round runs as its own tokio task owning the [`Round`], its
//! [`BetRegistry`] and the outcome. Every external request reaches it as a
//! [`Command`] on an mpsc queue and is answered over a oneshot channel, so
//! bet placement, cash-outs, ticks and the outcome-fixing transition are
//! applied in one total order. A cash-out queued before the close is
//! evaluated against a live round; one queued after it finds the round
//! closed.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::failure_manager::FailureManager;
use super::round_engine::{
    CancelSummary, CloseSummary, GameRules, PlaceBetRequest, ResolveAction, Settlement,
};
use crate::domain::{
    Bet, BetId, BetRegistry, BetStatus, CurrencyDirectory, EventBus, OperationType,
    OutcomeGenerator, RegistryError, Round, RoundEvent, RoundId, RoundSeed, RoundStatus,
    RoundStore, UserId, payout_for, validate_amount,
};
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerEntry, LedgerError, Posting};

/// Depth of a round's command queue.
const COMMAND_QUEUE_DEPTH: usize = 1024;

/// Smallest increment of the live value.
const VALUE_TICK: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// A request serialized into a round's queue.
#[derive(Debug)]
pub(crate) enum Command {
    PlaceBet {
        request: PlaceBetRequest,
        reply: Reply<Bet>,
    },
    CancelBet {
        user_id: UserId,
        bet_id: Option<BetId>,
        reply: Reply<Bet>,
    },
    Start {
        reply: Reply<Round>,
    },
    Advance {
        reply: Reply<Round>,
    },
    Resolve {
        user_id: UserId,
        action: ResolveAction,
        reply: Reply<Settlement>,
    },
    Close {
        outcome: Option<Decimal>,
        reply: Reply<CloseSummary>,
    },
    Cancel {
        reason: String,
        reply: Reply<CancelSummary>,
    },
}

impl Command {
    /// Error owed to a command addressed to a terminal round.
    pub(crate) fn rejection(&self, round: &Round) -> EngineError {
        match self {
            Self::PlaceBet { .. } | Self::CancelBet { .. } | Self::Start { .. } => {
                EngineError::RoundNotOpen {
                    round_id: round.id,
                    status: round.status,
                }
            }
            Self::Advance { .. }
            | Self::Resolve { .. }
            | Self::Close { .. }
            | Self::Cancel { .. } => EngineError::RoundAlreadyClosed(round.id),
        }
    }

    /// Answers a command that arrived after the round became terminal.
    fn reject(self, round: &Round) {
        let err = self.rejection(round);
        let _ = match self {
            Self::PlaceBet { reply, .. } | Self::CancelBet { reply, .. } => reply.send(Err(err)).is_ok(),
            Self::Start { reply } | Self::Advance { reply } => reply.send(Err(err)).is_ok(),
            Self::Resolve { reply, .. } => reply.send(Err(err)).is_ok(),
            Self::Close { reply, .. } => reply.send(Err(err)).is_ok(),
            Self::Cancel { reply, .. } => reply.send(Err(err)).is_ok(),
        };
    }
}

/// Answers a placement whose `client_tx_id` already produced `existing`:
/// the same parameters get the bet back, different ones are a conflict.
pub(crate) fn replay_placement(
    existing: &Bet,
    request: &PlaceBetRequest,
) -> Result<Bet, EngineError> {
    if existing.currency == request.currency
        && existing.amount == request.amount
        && existing.auto_cashout == request.auto_cashout
    {
        return Ok(existing.clone());
    }
    Err(EngineError::DuplicateBet(existing.id))
}

/// Collaborators shared by every round worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) ledger: Arc<Ledger>,
    pub(crate) store: Arc<RoundStore>,
    pub(crate) event_bus: EventBus,
    pub(crate) failures: Arc<FailureManager>,
    pub(crate) generator: Arc<dyn OutcomeGenerator>,
    pub(crate) currencies: Arc<dyn CurrencyDirectory>,
    pub(crate) rules: GameRules,
}

/// The worker task stopped before answering. Carries the command back when
/// it never reached the queue.
#[derive(Debug)]
pub(crate) struct WorkerGone(pub(crate) Option<Command>);

/// Handle to a live round worker.
#[derive(Debug, Clone)]
pub struct RoundHandle {
    round_id: RoundId,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<RoundStatus>,
}

impl RoundHandle {
    /// Round driven by this worker.
    #[must_use]
    pub const fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Last status published by the worker.
    #[must_use]
    pub fn status(&self) -> RoundStatus {
        *self.status.borrow()
    }

    /// `true` when the worker task ended without reaching a terminal
    /// status.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.commands.is_closed() && !self.status().is_terminal()
    }

    /// Queues a command and waits for its answer.
    pub(crate) async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<Result<T, EngineError>, WorkerGone> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|unsent| WorkerGone(Some(unsent.0)))?;
        answer.await.map_err(|_| WorkerGone(None))
    }
}

/// Starts the worker for a freshly opened round.
pub(crate) fn spawn(
    round: Round,
    seed: RoundSeed,
    ctx: WorkerContext,
) -> (RoundHandle, JoinHandle<()>) {
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (status_tx, status) = watch::channel(round.status);
    let handle = RoundHandle {
        round_id: round.id,
        commands,
        status,
    };
    let registry = BetRegistry::new(round.id, ctx.rules.allow_multiple_bets);
    let worker = RoundWorker {
        round,
        seed,
        crash_point: None,
        registry,
        ctx,
        status_tx,
        opened: Instant::now(),
        started: None,
    };
    let task = tokio::spawn(worker.run(queue));
    (handle, task)
}

struct RoundWorker {
    round: Round,
    seed: RoundSeed,
    crash_point: Option<Decimal>,
    registry: BetRegistry,
    ctx: WorkerContext,
    status_tx: watch::Sender<RoundStatus>,
    opened: Instant,
    started: Option<Instant>,
}

impl RoundWorker {
    async fn run(mut self, mut queue: mpsc::Receiver<Command>) {
        let round_id = self.round.id;
        tracing::debug!(%round_id, number = self.round.number, "round worker started");

        while !self.round.status.is_terminal() {
            let deadline = self.deadline();
            tokio::select! {
                command = queue.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        let _ = self.cancel("engine shut down").await;
                    }
                },
                () = tokio::time::sleep_until(deadline) => self.expire().await,
            }
        }

        queue.close();
        while let Some(command) = queue.recv().await {
            command.reject(&self.round);
        }
        tracing::debug!(%round_id, status = %self.round.status, "round worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::PlaceBet { request, reply } => {
                let _ = reply.send(self.place_bet(request).await);
            }
            Command::CancelBet {
                user_id,
                bet_id,
                reply,
            } => {
                let _ = reply.send(self.cancel_bet(user_id, bet_id).await);
            }
            Command::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            Command::Advance { reply } => {
                let _ = reply.send(self.advance().await);
            }
            Command::Resolve {
                user_id,
                action,
                reply,
            } => {
                let _ = reply.send(self.resolve(user_id, action).await);
            }
            Command::Close { outcome, reply } => {
                let _ = reply.send(self.close(outcome).await);
            }
            Command::Cancel { reason, reply } => {
                let _ = reply.send(self.cancel(&reason).await);
            }
        }
    }

    fn deadline(&self) -> Instant {
        match (self.round.status, self.started) {
            (RoundStatus::InProgress, Some(started)) => started + self.ctx.rules.max_round_duration,
            (RoundStatus::Open, _) => self.opened + self.ctx.rules.max_open_duration,
            _ => Instant::now() + Duration::from_secs(3600),
        }
    }

    /// Fires when the current state outlived its maximum duration.
    async fn expire(&mut self) {
        let round_id = self.round.id;
        match self.round.status {
            RoundStatus::Open => {
                tracing::warn!(%round_id, "round never started; canceling");
                let _ = self.cancel("bet window expired without start").await;
            }
            RoundStatus::InProgress => {
                let safety = self.round.current_value;
                tracing::warn!(%round_id, outcome = %safety, "round exceeded its maximum duration; forcing close");
                let _ = self.finish_close(safety).await;
            }
            RoundStatus::Closed | RoundStatus::Canceled => {}
        }
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.round.status == RoundStatus::Open {
            return Ok(());
        }
        Err(EngineError::RoundNotOpen {
            round_id: self.round.id,
            status: self.round.status,
        })
    }

    fn ensure_in_progress(&self) -> Result<(), EngineError> {
        match self.round.status {
            RoundStatus::InProgress => Ok(()),
            RoundStatus::Open => Err(EngineError::RoundNotInProgress {
                round_id: self.round.id,
                status: self.round.status,
            }),
            RoundStatus::Closed | RoundStatus::Canceled => {
                Err(EngineError::RoundAlreadyClosed(self.round.id))
            }
        }
    }

    async fn place_bet(&mut self, request: PlaceBetRequest) -> Result<Bet, EngineError> {
        // A retried key gets its bet back whatever the round did since.
        if let Some(existing) = self
            .registry
            .find_by_client_tx(request.user_id, &request.client_tx_id)
        {
            return replay_placement(existing, &request);
        }
        self.ensure_open()?;
        let rules = &self.ctx.rules;

        if !self.ctx.currencies.is_supported(&request.currency) {
            return Err(EngineError::UnknownCurrency(request.currency.to_string()));
        }
        validate_amount(request.amount).map_err(EngineError::InvalidAmount)?;
        if request.amount < rules.min_bet || request.amount > rules.max_bet {
            return Err(EngineError::InvalidAmount(format!(
                "stake {} outside [{}, {}]",
                request.amount, rules.min_bet, rules.max_bet
            )));
        }
        if let Some(target) = request.auto_cashout
            && target <= Decimal::ONE
        {
            return Err(EngineError::InvalidRequest(format!(
                "auto cash-out target {target} must exceed 1.00"
            )));
        }
        if request.client_tx_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "client_tx_id must not be empty".to_string(),
            ));
        }

        let bet = Bet::place(
            self.round.id,
            request.user_id,
            request.currency,
            request.amount,
            request.client_tx_id,
            request.auto_cashout,
        );
        self.registry.check(&bet).map_err(registry_error)?;
        self.ctx.ledger.reserve(stake_posting(&bet)).await?;
        let bet = self.registry.add(bet).map_err(registry_error)?.clone();

        tracing::info!(
            round_id = %bet.round_id,
            bet_id = %bet.id,
            user_id = %bet.user_id,
            currency = %bet.currency,
            amount = %bet.amount,
            "bet placed"
        );
        self.persist_bet(&bet).await;
        let _ = self
            .ctx
            .event_bus
            .publish(RoundEvent::BetPlaced { bet: bet.clone() });
        Ok(bet)
    }

    async fn cancel_bet(
        &mut self,
        user_id: UserId,
        bet_id: Option<BetId>,
    ) -> Result<Bet, EngineError> {
        self.ensure_open()?;
        let bet = self.find_active(user_id, bet_id)?;
        self.release_stake(&bet).await?;
        let bet = self
            .registry
            .mark_settled(bet.id, BetStatus::Canceled, None, None)
            .map_err(registry_error)?
            .clone();
        tracing::info!(round_id = %bet.round_id, bet_id = %bet.id, "bet withdrawn");
        self.persist_bet(&bet).await;
        let _ = self
            .ctx
            .event_bus
            .publish(RoundEvent::BetSettled { bet: bet.clone() });
        Ok(bet)
    }

    async fn start(&mut self) -> Result<Round, EngineError> {
        self.ensure_open()?;

        if self.registry.list_active().is_empty() && self.ctx.rules.cancel_empty_rounds {
            self.cancel("no bets placed").await?;
            return Ok(self.round.clone());
        }

        let outcome = match self.ctx.generator.generate(&self.seed) {
            Ok(value) if value >= Decimal::ONE => value,
            Ok(value) => {
                let reason = format!("outcome generator returned {value}");
                return Err(self.abort_start(reason).await);
            }
            Err(e) => return Err(self.abort_start(e.to_string()).await),
        };

        self.round.start()?;
        self.crash_point = Some(outcome);
        self.started = Some(Instant::now());
        self.status_changed();
        tracing::info!(
            round_id = %self.round.id,
            number = self.round.number,
            bets = self.registry.list_active().len(),
            "round started"
        );
        self.persist_round().await;
        let _ = self.ctx.event_bus.publish(RoundEvent::RoundStarted {
            round: self.round.clone(),
        });
        Ok(self.round.clone())
    }

    /// Cancels the round after an outcome failure and returns the error to
    /// report.
    async fn abort_start(&mut self, reason: String) -> EngineError {
        tracing::error!(round_id = %self.round.id, %reason, "outcome unavailable; canceling round");
        if let Err(e) = self
            .cancel(&format!("outcome generator failed: {reason}"))
            .await
        {
            tracing::error!(round_id = %self.round.id, error = %e, "cancel after outcome failure failed");
        }
        EngineError::Outcome(reason)
    }

    async fn advance(&mut self) -> Result<Round, EngineError> {
        self.ensure_in_progress()?;

        if self
            .started
            .is_some_and(|s| s.elapsed() >= self.ctx.rules.max_round_duration)
        {
            let safety = self.round.current_value;
            tracing::warn!(round_id = %self.round.id, outcome = %safety, "maximum duration reached; forcing close");
            self.finish_close(safety).await?;
            return Ok(self.round.clone());
        }

        let current = self.round.current_value;
        let crash = self.crash_point.unwrap_or(current);
        let grown = current
            .checked_mul(Decimal::ONE + self.ctx.rules.tick_step)
            .map_or(crash, |v| v.round_dp(2));
        let next = grown.max(current + VALUE_TICK).min(crash);
        self.round.current_value = next;

        let _ = self.ctx.event_bus.publish(RoundEvent::ValueUpdated {
            round_id: self.round.id,
            current_value: next,
            status: self.round.status,
            timestamp: chrono::Utc::now(),
        });
        self.run_auto_cashouts(next).await;

        if next >= crash {
            self.finish_close(crash).await?;
        } else {
            self.persist_round().await;
        }
        Ok(self.round.clone())
    }

    async fn run_auto_cashouts(&mut self, value: Decimal) {
        let due: Vec<(Bet, Decimal)> = self
            .registry
            .list_active()
            .into_iter()
            .filter_map(|bet| match bet.auto_cashout {
                Some(target) if target <= value => Some((bet, target)),
                _ => None,
            })
            .collect();
        for (bet, target) in due {
            if let Err(e) = self.settle_win(&bet, target).await {
                tracing::warn!(bet_id = %bet.id, error = %e, "auto cash-out failed; settling at close");
            }
        }
    }

    async fn resolve(
        &mut self,
        user_id: UserId,
        action: ResolveAction,
    ) -> Result<Settlement, EngineError> {
        self.ensure_in_progress()?;
        let ResolveAction::CashOut { bet_id, multiplier } = action;
        let bet = self.find_active(user_id, bet_id)?;

        let live = self.round.current_value;
        let multiplier = match multiplier {
            None => live,
            Some(m) if m < Decimal::ONE || m > live => {
                return Err(EngineError::InvalidRequest(format!(
                    "cash-out multiplier {m} outside [1.00, {live}]"
                )));
            }
            Some(m) => m,
        };
        self.settle_win(&bet, multiplier).await
    }

    async fn close(&mut self, outcome: Option<Decimal>) -> Result<CloseSummary, EngineError> {
        self.ensure_in_progress()?;
        let outcome = outcome
            .or(self.crash_point)
            .unwrap_or(self.round.current_value);
        if outcome < Decimal::ONE {
            return Err(EngineError::InvalidRequest(format!(
                "outcome {outcome} below 1.00"
            )));
        }
        self.finish_close(outcome).await
    }

    /// Fixes the outcome, then settles every unresolved bet. A bet whose
    /// settlement fails is handed to the failure manager and the loop goes
    /// on.
    async fn finish_close(&mut self, outcome: Decimal) -> Result<CloseSummary, EngineError> {
        self.round.close(outcome, self.seed.reveal())?;
        self.status_changed();
        let _ = self.ctx.event_bus.publish(RoundEvent::RoundClosed {
            round: self.round.clone(),
        });

        let (mut won, mut lost, mut failed) = (0, 0, 0);
        for bet in self.registry.list_active() {
            let result = match bet.auto_cashout {
                Some(target) if target <= outcome => self.settle_win(&bet, target).await.map(|_| true),
                _ => self.settle_lost(&bet).await.map(|()| false),
            };
            match result {
                Ok(true) => won += 1,
                Ok(false) => lost += 1,
                Err(e) => {
                    failed += 1;
                    let _ = self.ctx.failures.record(&bet, &e.to_string()).await;
                }
            }
        }

        self.persist_round().await;
        tracing::info!(
            round_id = %self.round.id,
            number = self.round.number,
            %outcome,
            won,
            lost,
            failed,
            "round closed"
        );
        Ok(CloseSummary {
            round: self.round.clone(),
            won,
            lost,
            failed,
        })
    }

    async fn cancel(&mut self, reason: &str) -> Result<CancelSummary, EngineError> {
        self.round.cancel(reason, Some(self.seed.reveal()))?;
        self.status_changed();
        let _ = self.ctx.event_bus.publish(RoundEvent::RoundCanceled {
            round: self.round.clone(),
        });

        let (mut refunded, mut failed) = (0, 0);
        for bet in self.registry.list_active() {
            match self.refund_canceled(&bet).await {
                Ok(()) => refunded += 1,
                Err(e) => {
                    failed += 1;
                    let _ = self.ctx.failures.record(&bet, &e.to_string()).await;
                }
            }
        }

        self.persist_round().await;
        tracing::info!(round_id = %self.round.id, reason, refunded, failed, "round canceled");
        Ok(CancelSummary {
            round: self.round.clone(),
            refunded,
            failed,
        })
    }

    async fn settle_win(&mut self, bet: &Bet, multiplier: Decimal) -> Result<Settlement, EngineError> {
        let payout = payout_for(bet.amount, multiplier)
            .ok_or_else(|| EngineError::Internal(format!("payout overflow for bet {}", bet.id)))?;
        let entry = match self.ctx.ledger.settle_win(&stake_posting(bet), payout).await {
            Ok(settlement) => settlement.payout,
            Err(LedgerError::DuplicateTransaction { original }) => *original,
            Err(e) => return Err(e.into()),
        };
        let bet = self
            .registry
            .mark_settled(bet.id, BetStatus::Won, Some(payout), Some(multiplier))
            .map_err(registry_error)?
            .clone();
        tracing::info!(
            round_id = %bet.round_id,
            bet_id = %bet.id,
            %multiplier,
            %payout,
            "bet cashed out"
        );
        self.persist_bet(&bet).await;
        let _ = self
            .ctx
            .event_bus
            .publish(RoundEvent::BetSettled { bet: bet.clone() });
        Ok(Settlement {
            bet,
            payout,
            multiplier,
            entry,
        })
    }

    async fn settle_lost(&mut self, bet: &Bet) -> Result<(), EngineError> {
        let posting = stake_posting(bet).with_type(OperationType::BetLost);
        let _entry: LedgerEntry = match self.ctx.ledger.capture(posting).await {
            Ok(entry) => entry,
            Err(LedgerError::DuplicateTransaction { original }) => *original,
            Err(e) => return Err(e.into()),
        };
        let bet = self
            .registry
            .mark_settled(bet.id, BetStatus::Lost, Some(Decimal::ZERO), None)
            .map_err(registry_error)?
            .clone();
        self.persist_bet(&bet).await;
        let _ = self.ctx.event_bus.publish(RoundEvent::BetSettled { bet });
        Ok(())
    }

    async fn refund_canceled(&mut self, bet: &Bet) -> Result<(), EngineError> {
        self.release_stake(bet).await?;
        let bet = self
            .registry
            .mark_settled(bet.id, BetStatus::Canceled, None, None)
            .map_err(registry_error)?
            .clone();
        self.persist_bet(&bet).await;
        let _ = self.ctx.event_bus.publish(RoundEvent::BetSettled { bet });
        Ok(())
    }

    async fn release_stake(&self, bet: &Bet) -> Result<(), EngineError> {
        let posting = stake_posting(bet).with_type(OperationType::BetCanceled);
        match self.ctx.ledger.release(posting).await {
            Ok(_) | Err(LedgerError::DuplicateTransaction { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn find_active(&self, user_id: UserId, bet_id: Option<BetId>) -> Result<Bet, EngineError> {
        let bet = match bet_id {
            Some(id) => self
                .registry
                .get_by_id(id)
                .filter(|b| b.user_id == user_id)
                .ok_or_else(|| EngineError::BetNotFound(id.to_string()))?,
            None => self.registry.get(user_id).ok_or_else(|| {
                EngineError::BetNotFound(format!(
                    "no active bet for user {user_id} in round {}",
                    self.round.id
                ))
            })?,
        };
        if bet.status.is_final() {
            return Err(EngineError::BetAlreadySettled(bet.id));
        }
        Ok(bet.clone())
    }

    fn status_changed(&self) {
        self.status_tx.send_replace(self.round.status);
    }

    async fn persist_round(&self) {
        self.ctx.store.upsert_round(self.round.clone()).await;
    }

    async fn persist_bet(&self, bet: &Bet) {
        if let Err(e) = self.ctx.store.upsert_bet(bet.clone()).await {
            tracing::error!(bet_id = %bet.id, error = %e, "bet snapshot not stored");
        }
    }
}

/// The reservation a bet holds, as a `place_bet` posting.
fn stake_posting(bet: &Bet) -> Posting {
    Posting::new(
        bet.user_id,
        bet.currency.clone(),
        bet.amount,
        OperationType::PlaceBet,
        bet.transaction_id(),
    )
}

fn registry_error(err: RegistryError) -> EngineError {
    match err {
        RegistryError::DuplicateClientTx(id) | RegistryError::ActiveBetExists(id) => {
            EngineError::DuplicateBet(id)
        }
        RegistryError::NotFound(id) => EngineError::BetNotFound(id.to_string()),
        RegistryError::Transition(e) => e.into(),
        RegistryError::WrongRound { .. } => EngineError::Internal(err.to_string()),
    }
}
