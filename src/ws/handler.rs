//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use super::connection::run_connection;
use crate::api::identity::UserIdentity;
use crate::app_state::AppState;
use crate::domain::UserId;

/// Query parameters of `/ws`, for clients that cannot set headers.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    /// Player to receive settlement messages for.
    pub user_id: Option<UserId>,
}

/// `GET /ws`: upgrade to the round stream. Connections that carry a user
/// (header or query) also receive that user's settlement messages.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: Option<UserIdentity>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let user_id = user.map(|UserIdentity(id)| id).or(params.user_id);
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| run_connection(socket, hub, user_id))
}
