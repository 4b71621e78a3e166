//! Shared application state injected into all Axum handlers.

use crate::persistence::PostgresPersistence;
use crate::service::RoundEngine;
use crate::ws::BroadcastHub;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Round engine, and through it the ledger, store and failure manager.
    pub engine: RoundEngine,
    /// Stream fan-out for WebSocket connections.
    pub hub: BroadcastHub,
    /// Database mirror, when persistence is enabled.
    pub persistence: Option<PostgresPersistence>,
}
