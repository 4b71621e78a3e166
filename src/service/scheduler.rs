//! Round autopilot.
//!
//! Drives the engine through open, bet window, start, ticks and an
//! intermission, forever, until the shutdown signal flips.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::round_engine::RoundEngine;
use crate::domain::RoundStatus;
use crate::error::EngineError;

/// Timings of the autopilot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTimings {
    /// How long a round accepts bets.
    pub bet_window: Duration,
    /// Interval between two value updates.
    pub tick_interval: Duration,
    /// Pause between two rounds.
    pub intermission: Duration,
}

/// Drives rounds automatically.
#[derive(Debug)]
pub struct RoundScheduler {
    engine: RoundEngine,
    timings: SchedulerTimings,
    shutdown: watch::Receiver<bool>,
}

impl RoundScheduler {
    /// Creates a scheduler that stops once `shutdown` turns `true`.
    #[must_use]
    pub fn new(engine: RoundEngine, timings: SchedulerTimings, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            engine,
            timings,
            shutdown,
        }
    }

    /// Spawns the scheduler loop.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::info!(
            bet_window_ms = self.timings.bet_window.as_millis(),
            tick_ms = self.timings.tick_interval.as_millis(),
            "round autopilot started"
        );
        while !*self.shutdown.borrow() {
            if let Err(e) = self.play_round().await {
                tracing::warn!(error = %e, "autopilot round aborted");
            }
            if self.pause(self.timings.intermission).await {
                break;
            }
        }
        tracing::info!("round autopilot stopped");
    }

    async fn play_round(&mut self) -> Result<(), EngineError> {
        if self.engine.reap_dead().await.is_some() {
            tracing::warn!("autopilot reaped a dead round");
        }
        let round = match self.engine.open_round().await {
            Ok(round) => round,
            Err(EngineError::RoundAlreadyOpen(id)) => self.engine.get_round(id).await?,
            Err(e) => return Err(e),
        };

        if round.status == RoundStatus::Open {
            if self.pause(self.timings.bet_window).await {
                return Ok(());
            }
            let started = self.engine.start_round(round.id).await?;
            if started.status.is_terminal() {
                return Ok(());
            }
        }

        let mut ticker = tokio::time::interval(self.timings.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => return Ok(()),
            }
            match self.engine.advance(round.id).await {
                Ok(snapshot) if snapshot.status.is_terminal() => return Ok(()),
                Ok(_) => {}
                Err(EngineError::RoundAlreadyClosed(_)) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Sleeps for `period`; returns `true` when shutdown was requested.
    async fn pause(&mut self, period: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(period) => *self.shutdown.borrow(),
            _ = self.shutdown.changed() => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{
        Currency, EventBus, FixedOutcome, OperationType, RoundStore, StaticCurrencies, UserId,
    };
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
                generator: Arc::new(FixedOutcome(dec!(1.03))),
                currencies: Arc::new(StaticCurrencies::new(["USD"])),
                server_seed: "autopilot".to_string(),
            },
            GameRules::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn autopilot_plays_rounds_until_shutdown() {
        let engine = engine();
        let (stop, shutdown) = watch::channel(false);
        let timings = SchedulerTimings {
            bet_window: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
            intermission: Duration::from_secs(2),
        };
        let task = RoundScheduler::new(engine.clone(), timings, shutdown).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let Some(first) = engine.current_round().await else {
            panic!("no round opened");
        };
        assert_eq!(first.status, RoundStatus::Open);

        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        let user = UserId::new();
        let _ = engine
            .ledger()
            .credit(Posting::new(user, usd.clone(), dec!(50), OperationType::Deposit, "dep"))
            .await;
        let request = PlaceBetRequest {
            user_id: user,
            currency: usd,
            amount: dec!(10),
            client_tx_id: "k1".to_string(),
            auto_cashout: None,
        };
        assert!(engine.place_bet(first.id, request).await.is_ok());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let Ok(closed) = engine.get_round(first.id).await else {
            panic!("round missing");
        };
        assert_eq!(closed.status, RoundStatus::Closed);
        assert_eq!(closed.outcome, Some(dec!(1.03)));

        let _ = stop.send(true);
        let _ = task.await;
        assert!(engine.list_rounds(0, 10).await.1 >= 2);
    }
}
