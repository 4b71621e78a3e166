//! Application assembly: engine wiring and the HTTP router.
//!
//! Shared by the binary and the integration tests so both run the exact
//! same stack.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::domain::{EventBus, HashCrashGenerator, OutcomeGenerator, RoundStore};
use crate::ledger::Ledger;
use crate::service::{EngineDeps, FailureManager, RoundEngine, SchedulerTimings};
use crate::ws::handler::ws_handler;

/// Builds the in-memory engine described by `config`, with the seeded
/// crash generator.
#[must_use]
pub fn build_engine(config: &EngineConfig) -> RoundEngine {
    let generator: Arc<dyn OutcomeGenerator> = Arc::new(HashCrashGenerator::new(
        config.house_edge_bps,
        config.max_multiplier,
    ));
    build_engine_with(config, generator)
}

/// Same as [`build_engine`] with an explicit outcome generator.
#[must_use]
pub fn build_engine_with(
    config: &EngineConfig,
    generator: Arc<dyn OutcomeGenerator>,
) -> RoundEngine {
    let ledger = Arc::new(Ledger::new());
    let store = Arc::new(RoundStore::new());
    let event_bus = EventBus::new(config.event_bus_capacity);
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
            generator,
            currencies: Arc::new(config.currencies()),
            server_seed: config.server_seed.clone(),
        },
        config.game_rules(),
    )
}

/// Autopilot pacing from `config`.
#[must_use]
pub fn scheduler_timings(config: &EngineConfig) -> SchedulerTimings {
    SchedulerTimings {
        bet_window: Duration::from_secs(config.bet_window_secs),
        tick_interval: Duration::from_millis(config.tick_interval_ms),
        intermission: Duration::from_secs(config.intermission_secs),
    }
}

/// Builds the full router: REST API, `/ws` and the middleware stack.
pub fn build_app(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
