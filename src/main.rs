//! wager-gateway server entry point.
//!
//! Wires the engine, optional PostgreSQL journal and recovery, background
//! tasks, and the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use wager_gateway::app::{build_app, build_engine, scheduler_timings};
use wager_gateway::app_state::AppState;
use wager_gateway::config::{EngineConfig, LogFormat};
use wager_gateway::persistence::{PostgresPersistence, spawn_journal};
use wager_gateway::service::{RoundScheduler, recover};
use wager_gateway::ws::BroadcastHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = EngineConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, "starting wager-gateway");

    // Build engine
    let engine = build_engine(&config);

    // Journal and recovery
    let (journal_stop, journal_stop_rx) = watch::channel(false);
    let (persistence, journal) = if config.persistence_enabled {
        let db = PostgresPersistence::connect(&config)
            .await
            .context("connecting to the database")?;
        let journal = spawn_journal(
            db.clone(),
            engine.event_bus(),
            engine.ledger(),
            journal_stop_rx,
        )
        .context("starting the journal")?;
        let report = recover(&db, &engine).await.context("recovering stored state")?;
        tracing::info!(?report, "stored state recovered");
        (Some(db), Some(journal))
    } else {
        tracing::warn!("persistence disabled; state lives in memory only");
        (None, None)
    };

    // Background tasks
    let hub = BroadcastHub::new(config.connection_buffer);
    let _pump = hub.spawn_pump(engine.event_bus());
    let refunds = Arc::clone(engine.failures())
        .spawn_retry_loop(Duration::from_secs(config.refund_retry_secs.max(1)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = config.round_autopilot.then(|| {
        RoundScheduler::new(engine.clone(), scheduler_timings(&config), shutdown_rx).spawn()
    });

    // Build application state and router
    let app_state = AppState {
        engine: engine.clone(),
        hub,
        persistence,
    };
    let app = build_app(app_state, Duration::from_secs(config.request_timeout_secs));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the autopilot first so it does not open a round after the
    // engine cancels the live one.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = scheduler {
        let _ = handle.await;
    }
    engine.shutdown().await;
    refunds.abort();

    // Flush queued ledger entries once nothing mutates the ledger anymore.
    let _ = journal_stop.send(true);
    if let Some(handle) = journal {
        let _ = handle.await;
    }
    tracing::info!("wager-gateway stopped");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
