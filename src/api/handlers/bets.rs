//! Player bet history.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{BetDto, BetListResponse, PaginationParams};
use crate::api::identity::UserIdentity;
use crate::app_state::AppState;
use crate::error::ErrorResponse;

/// `GET /bets`: the caller's bets across rounds, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/bets",
    tag = "Bets",
    summary = "Bet history",
    params(
        ("x-user-id" = String, Header, description = "Player id"),
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Paginated bet list", body = BetListResponse),
        (status = 401, description = "Missing player id", body = ErrorResponse),
    )
)]
pub async fn list_bets(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Query(page): Query<PaginationParams>,
) -> impl IntoResponse {
    let (bets, total) = state
        .engine
        .user_bets(user_id, page.offset(), page.limit())
        .await;
    Json(BetListResponse {
        data: bets.into_iter().map(BetDto::from).collect(),
        pagination: page.meta(total),
    })
}

/// Bet history routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/bets", get(list_bets))
}
