//! System endpoints: health check and game configuration.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::domain::{Currency, CurrencyDirectory};

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    /// `up`, `down` or `disabled`.
    database: String,
    live_round: bool,
    pending_failed_bets: usize,
    stream_connections: usize,
}

/// `GET /health`: service health status.
///
/// Reports `degraded` with a 503 when persistence is enabled but the
/// database does not answer.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health, version, current timestamp and a few engine gauges.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.persistence {
        None => "disabled",
        Some(db) if db.ping().await => "up",
        Some(_) => "down",
    };
    let (status, code) = if database == "down" {
        ("degraded", StatusCode::SERVICE_UNAVAILABLE)
    } else {
        ("healthy", StatusCode::OK)
    };
    let live_round = state
        .engine
        .current_round()
        .await
        .is_some_and(|r| !r.status.is_terminal());
    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: database.to_string(),
            live_round,
            pending_failed_bets: state.engine.failures().pending_count().await,
            stream_connections: state.hub.connection_count().await,
        }),
    )
}

/// Game rules and currencies.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameConfigResponse {
    #[schema(value_type = String)]
    min_bet: Decimal,
    #[schema(value_type = String)]
    max_bet: Decimal,
    allow_multiple_bets: bool,
    cancel_empty_rounds: bool,
    #[schema(value_type = String)]
    tick_step: Decimal,
    open_timeout_secs: u64,
    max_round_secs: u64,
    currencies: Vec<Currency>,
}

/// `GET /config/game`: rules every round enforces.
#[utoipa::path(
    get,
    path = "/config/game",
    tag = "System",
    summary = "Game configuration",
    responses(
        (status = 200, description = "Rules and supported currencies", body = GameConfigResponse),
    )
)]
pub async fn game_config_handler(State(state): State<AppState>) -> impl IntoResponse {
    let rules = state.engine.rules();
    Json(GameConfigResponse {
        min_bet: rules.min_bet,
        max_bet: rules.max_bet,
        allow_multiple_bets: rules.allow_multiple_bets,
        cancel_empty_rounds: rules.cancel_empty_rounds,
        tick_step: rules.tick_step,
        open_timeout_secs: rules.max_open_duration.as_secs(),
        max_round_secs: rules.max_round_duration.as_secs(),
        currencies: state.engine.currencies().supported(),
    })
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/config/game", get(game_config_handler))
}
