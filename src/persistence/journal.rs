//! Background task mirroring the in-memory state into PostgreSQL.
//!
//! Ledger entries arrive through the queue the ledger hands out in
//! [`Ledger::attach_journal`]. The queue is bounded, so a slow database
//! holds ledger mutations back instead of dropping entries, and a failed
//! write is retried until it lands. Round events come from the
//! [`EventBus`]; live value ticks are not journaled since the round
//! snapshot written at each transition carries the value.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::postgres::PostgresPersistence;
use crate::domain::{EventBus, RoundEvent};
use crate::error::EngineError;
use crate::ledger::{Ledger, LedgerEntry};

const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_MAX: Duration = Duration::from_secs(10);

/// Spawns the journal task.
///
/// The task runs until `stop` flips to `true`, then writes every entry
/// still queued before it exits. Send the stop signal only after the
/// engine has stopped mutating the ledger.
///
/// # Errors
///
/// Returns [`EngineError::Internal`] if the ledger already has a journal.
pub fn spawn_journal(
    persistence: PostgresPersistence,
    event_bus: &EventBus,
    ledger: &Ledger,
    stop: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, EngineError> {
    let entries = ledger
        .attach_journal()
        .ok_or_else(|| EngineError::Internal("ledger already has a journal".to_string()))?;
    let events = event_bus.subscribe();
    Ok(tokio::spawn(run(persistence, events, entries, stop)))
}

async fn run(
    persistence: PostgresPersistence,
    mut events: broadcast::Receiver<RoundEvent>,
    mut entries: mpsc::Receiver<LedgerEntry>,
    mut stop: watch::Receiver<bool>,
) {
    let mut events_open = true;
    loop {
        tokio::select! {
            biased;
            entry = entries.recv() => match entry {
                Some(entry) => append_entry(&persistence, &entry).await,
                None => break,
            },
            event = events.recv(), if events_open => match event {
                Ok(event) => write_event(&persistence, &event).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::error!(missed, "journal lagged behind the event bus");
                }
                Err(RecvError::Closed) => events_open = false,
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    entries.close();
    let mut drained = 0_usize;
    while let Some(entry) = entries.recv().await {
        append_entry(&persistence, &entry).await;
        drained += 1;
    }
    while let Ok(event) = events.try_recv() {
        write_event(&persistence, &event).await;
    }
    tracing::info!(drained, "journal stopped");
}

async fn append_entry(persistence: &PostgresPersistence, entry: &LedgerEntry) {
    retry("ledger entry", || persistence.append_entry(entry)).await;
}

async fn write_event(persistence: &PostgresPersistence, event: &RoundEvent) {
    if matches!(event, RoundEvent::ValueUpdated { .. }) {
        return;
    }
    retry(event.event_type_str(), || store_event(persistence, event)).await;
}

/// Runs `write` until it succeeds, backing off exponentially between
/// attempts.
async fn retry<F, Fut>(what: &str, mut write: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), EngineError>>,
{
    let mut delay = RETRY_BASE;
    let mut attempt = 1_u32;
    loop {
        match write().await {
            Ok(()) => return,
            Err(e) => {
                tracing::error!(what, attempt, error = %e, "journal write failed; retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(RETRY_MAX);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

async fn store_event(
    persistence: &PostgresPersistence,
    event: &RoundEvent,
) -> Result<(), EngineError> {
    match event {
        RoundEvent::ValueUpdated { .. } => return Ok(()),
        RoundEvent::RoundOpened { round }
        | RoundEvent::RoundStarted { round }
        | RoundEvent::RoundClosed { round }
        | RoundEvent::RoundCanceled { round } => persistence.upsert_round(round).await?,
        RoundEvent::BetPlaced { bet }
        | RoundEvent::BetSettled { bet }
        | RoundEvent::BetRefunded { bet } => persistence.upsert_bet(bet).await?,
        RoundEvent::FailedBetRecorded { failed } | RoundEvent::FailedBetUpdated { failed } => {
            persistence.upsert_failed_bet(failed).await?;
        }
    }
    persistence.save_event(event).await?;
    Ok(())
}
