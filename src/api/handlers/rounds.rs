//! Round handlers: lifecycle control, history and player actions.
//!
//! Lifecycle endpoints are operator actions (`x-admin-id`); betting and
//! cash-out act for the player in `x-user-id`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use super::parse_currency;
use crate::api::dto::{
    BetDto, CancelBetParams, CancelRoundRequest, CancelRoundResponse, CashoutBody,
    CashoutResponse, CloseRoundRequest, CloseRoundResponse, PaginationParams, PlaceBetBody,
    RoundDetailResponse, RoundDto, RoundListResponse,
};
use crate::api::identity::{AdminIdentity, UserIdentity};
use crate::app_state::AppState;
use crate::domain::RoundId;
use crate::error::{EngineError, ErrorResponse};
use crate::service::{PlaceBetRequest, ResolveAction};

/// `POST /rounds`: Open a new round.
///
/// # Errors
///
/// Returns [`EngineError::RoundAlreadyOpen`] while another round is live.
#[utoipa::path(
    post,
    path = "/api/v1/rounds",
    tag = "Rounds",
    summary = "Open a round",
    description = "Opens the next round for betting and publishes its seed commitment. Only one round may be live at a time.",
    params(("x-admin-id" = String, Header, description = "Operator id")),
    responses(
        (status = 201, description = "Round opened", body = RoundDto),
        (status = 409, description = "Another round is live", body = ErrorResponse),
    )
)]
pub async fn open_round(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
) -> Result<impl IntoResponse, EngineError> {
    let round = state.engine.open_round().await?;
    tracing::info!(round_id = %round.id, %admin_id, "round opened by operator");
    Ok((StatusCode::CREATED, Json(RoundDto::from(round))))
}

/// `GET /rounds`: Paginated round history.
#[utoipa::path(
    get,
    path = "/api/v1/rounds",
    tag = "Rounds",
    summary = "List rounds",
    description = "Returns rounds newest first.",
    params(PaginationParams),
    responses(
        (status = 200, description = "Paginated round list", body = RoundListResponse),
    )
)]
pub async fn list_rounds(
    State(state): State<AppState>,
    Query(page): Query<PaginationParams>,
) -> impl IntoResponse {
    let (rounds, total) = state.engine.list_rounds(page.offset(), page.limit()).await;
    Json(RoundListResponse {
        data: rounds.into_iter().map(RoundDto::from).collect(),
        pagination: page.meta(total),
    })
}

/// `GET /rounds/current`: The live round, or the latest one.
///
/// # Errors
///
/// Returns [`EngineError::NoRound`] before the first round is opened.
#[utoipa::path(
    get,
    path = "/api/v1/rounds/current",
    tag = "Rounds",
    summary = "Current round",
    responses(
        (status = 200, description = "Live or latest round", body = RoundDto),
        (status = 404, description = "No round yet", body = ErrorResponse),
    )
)]
pub async fn current_round(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, EngineError> {
    let round = state
        .engine
        .current_round()
        .await
        .ok_or(EngineError::NoRound)?;
    Ok(Json(RoundDto::from(round)))
}

/// `GET /rounds/{id}`: Round snapshot with its bets.
///
/// # Errors
///
/// Returns [`EngineError::RoundNotFound`] for an unknown id.
#[utoipa::path(
    get,
    path = "/api/v1/rounds/{id}",
    tag = "Rounds",
    summary = "Get round",
    params(("id" = String, Path, description = "Round id")),
    responses(
        (status = 200, description = "Round and bets", body = RoundDetailResponse),
        (status = 404, description = "Round not found", body = ErrorResponse),
    )
)]
pub async fn get_round(
    State(state): State<AppState>,
    Path(id): Path<RoundId>,
) -> Result<impl IntoResponse, EngineError> {
    let round = state.engine.get_round(id).await?;
    let bets = state.engine.round_bets(id).await?;
    Ok(Json(RoundDetailResponse {
        round: round.into(),
        bets: bets.into_iter().map(BetDto::from).collect(),
    }))
}

/// `POST /rounds/{id}/start`: Close betting and start the rise.
///
/// # Errors
///
/// Returns [`EngineError::RoundNotOpen`] when the round is not open.
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/start",
    tag = "Rounds",
    summary = "Start round",
    description = "Moves an open round in progress. An empty round is canceled instead when empty-round cancellation is enabled.",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-admin-id" = String, Header, description = "Operator id"),
    ),
    responses(
        (status = 200, description = "Round after start", body = RoundDto),
        (status = 409, description = "Round is not open", body = ErrorResponse),
    )
)]
pub async fn start_round(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Path(id): Path<RoundId>,
) -> Result<impl IntoResponse, EngineError> {
    let round = state.engine.start_round(id).await?;
    Ok(Json(RoundDto::from(round)))
}

/// `POST /rounds/{id}/advance`: Advance the live value one tick.
///
/// # Errors
///
/// Returns [`EngineError::RoundNotInProgress`] or
/// [`EngineError::RoundAlreadyClosed`].
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/advance",
    tag = "Rounds",
    summary = "Advance round",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-admin-id" = String, Header, description = "Operator id"),
    ),
    responses(
        (status = 200, description = "Round after the tick", body = RoundDto),
        (status = 409, description = "Round is not in progress", body = ErrorResponse),
    )
)]
pub async fn advance_round(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Path(id): Path<RoundId>,
) -> Result<impl IntoResponse, EngineError> {
    let round = state.engine.advance(id).await?;
    Ok(Json(RoundDto::from(round)))
}

/// `POST /rounds/{id}/close`: Fix the outcome and settle every bet.
///
/// # Errors
///
/// Returns [`EngineError::RoundNotInProgress`] or
/// [`EngineError::RoundAlreadyClosed`].
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/close",
    tag = "Rounds",
    summary = "Close round",
    description = "Closes the round with the given outcome (or the generated one) and settles every unresolved bet.",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-admin-id" = String, Header, description = "Operator id"),
    ),
    request_body = CloseRoundRequest,
    responses(
        (status = 200, description = "Settlement summary", body = CloseRoundResponse),
        (status = 409, description = "Round cannot be closed", body = ErrorResponse),
    )
)]
pub async fn close_round(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Path(id): Path<RoundId>,
    body: Option<Json<CloseRoundRequest>>,
) -> Result<impl IntoResponse, EngineError> {
    let outcome = body.and_then(|Json(b)| b.outcome);
    let summary = state.engine.close_round(id, outcome).await?;
    Ok(Json(CloseRoundResponse::from(summary)))
}

/// `POST /rounds/{id}/cancel`: Cancel the round and release every stake.
///
/// # Errors
///
/// Returns [`EngineError::RoundAlreadyClosed`] when already terminal.
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/cancel",
    tag = "Rounds",
    summary = "Cancel round",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-admin-id" = String, Header, description = "Operator id"),
    ),
    request_body = CancelRoundRequest,
    responses(
        (status = 200, description = "Cancellation summary", body = CancelRoundResponse),
        (status = 409, description = "Round already terminal", body = ErrorResponse),
    )
)]
pub async fn cancel_round(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Path(id): Path<RoundId>,
    body: Option<Json<CancelRoundRequest>>,
) -> Result<impl IntoResponse, EngineError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| format!("canceled by operator {admin_id}"));
    let summary = state.engine.cancel_round(id, &reason).await?;
    Ok(Json(CancelRoundResponse::from(summary)))
}

/// `POST /rounds/{id}/bets`: Place a bet.
///
/// # Errors
///
/// Returns validation errors, [`EngineError::RoundNotOpen`],
/// [`EngineError::InsufficientFunds`] or [`EngineError::DuplicateBet`].
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/bets",
    tag = "Bets",
    summary = "Place bet",
    description = "Reserves the stake and registers the bet. Repeating a `client_tx_id` returns the original bet.",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-user-id" = String, Header, description = "Player id"),
    ),
    request_body = PlaceBetBody,
    responses(
        (status = 201, description = "Bet placed", body = BetDto),
        (status = 400, description = "Invalid stake or currency", body = ErrorResponse),
        (status = 409, description = "Round not open or duplicate bet", body = ErrorResponse),
        (status = 422, description = "Insufficient funds", body = ErrorResponse),
    )
)]
pub async fn place_bet(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Path(id): Path<RoundId>,
    Json(body): Json<PlaceBetBody>,
) -> Result<impl IntoResponse, EngineError> {
    let request = PlaceBetRequest {
        user_id,
        currency: parse_currency(&body.currency)?,
        amount: body.amount,
        client_tx_id: body.client_tx_id,
        auto_cashout: body.auto_cashout,
    };
    let bet = state.engine.place_bet(id, request).await?;
    Ok((StatusCode::CREATED, Json(BetDto::from(bet))))
}

/// `DELETE /rounds/{id}/bets`: Withdraw a bet before the round starts.
///
/// # Errors
///
/// Returns [`EngineError::RoundNotOpen`] or [`EngineError::BetNotFound`].
#[utoipa::path(
    delete,
    path = "/api/v1/rounds/{id}/bets",
    tag = "Bets",
    summary = "Cancel bet",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-user-id" = String, Header, description = "Player id"),
        CancelBetParams,
    ),
    responses(
        (status = 200, description = "Bet canceled, stake released", body = BetDto),
        (status = 404, description = "No active bet", body = ErrorResponse),
        (status = 409, description = "Round already started", body = ErrorResponse),
    )
)]
pub async fn cancel_bet(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Path(id): Path<RoundId>,
    Query(params): Query<CancelBetParams>,
) -> Result<impl IntoResponse, EngineError> {
    let bet = state.engine.cancel_bet(id, user_id, params.bet_id).await?;
    Ok(Json(BetDto::from(bet)))
}

/// `POST /rounds/{id}/cashout`: Cash out at the live value.
///
/// # Errors
///
/// Returns [`EngineError::RoundAlreadyClosed`] once the outcome is fixed,
/// [`EngineError::BetNotFound`] or [`EngineError::BetAlreadySettled`].
#[utoipa::path(
    post,
    path = "/api/v1/rounds/{id}/cashout",
    tag = "Bets",
    summary = "Cash out",
    description = "Settles the caller's bet as won at the live value. A cash-out that loses the race against the round close is rejected with 409.",
    params(
        ("id" = String, Path, description = "Round id"),
        ("x-user-id" = String, Header, description = "Player id"),
    ),
    request_body = CashoutBody,
    responses(
        (status = 200, description = "Bet won", body = CashoutResponse),
        (status = 404, description = "No active bet", body = ErrorResponse),
        (status = 409, description = "Round already closed", body = ErrorResponse),
    )
)]
pub async fn cashout(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Path(id): Path<RoundId>,
    body: Option<Json<CashoutBody>>,
) -> Result<impl IntoResponse, EngineError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let action = ResolveAction::CashOut {
        bet_id: body.bet_id,
        multiplier: body.multiplier,
    };
    let settlement = state.engine.resolve(id, user_id, action).await?;
    Ok(Json(CashoutResponse::from(settlement)))
}

/// Round and bet routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rounds", post(open_round).get(list_rounds))
        .route("/rounds/current", get(current_round))
        .route("/rounds/{id}", get(get_round))
        .route("/rounds/{id}/start", post(start_round))
        .route("/rounds/{id}/advance", post(advance_round))
        .route("/rounds/{id}/close", post(close_round))
        .route("/rounds/{id}/cancel", post(cancel_round))
        .route("/rounds/{id}/bets", post(place_bet).delete(cancel_bet))
        .route("/rounds/{id}/cashout", post(cashout))
}
