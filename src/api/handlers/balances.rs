//! Balance and ledger history handlers.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use super::parse_currency;
use crate::api::dto::{LedgerListResponse, LedgerQuery, PaginationParams};
use crate::api::identity::UserIdentity;
use crate::app_state::AppState;
use crate::domain::CurrencyDirectory;
use crate::error::{EngineError, ErrorResponse};
use crate::ledger::BalanceAccount;

/// `GET /balances/{currency}`: the caller's account in one currency.
///
/// # Errors
///
/// Returns [`EngineError::UnknownCurrency`] for an unsupported code.
#[utoipa::path(
    get,
    path = "/api/v1/balances/{currency}",
    tag = "Balances",
    summary = "Get balance",
    description = "Returns amount, reserved and available funds with the per-component breakdown. An account that never moved reads as zero.",
    params(
        ("currency" = String, Path, description = "Currency code"),
        ("x-user-id" = String, Header, description = "Player id"),
    ),
    responses(
        (status = 200, description = "Account projection", body = BalanceAccount),
        (status = 400, description = "Unknown currency", body = ErrorResponse),
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Path(currency): Path<String>,
) -> Result<impl IntoResponse, EngineError> {
    let currency = parse_currency(&currency)?;
    if !state.engine.currencies().is_supported(&currency) {
        return Err(EngineError::UnknownCurrency(currency.to_string()));
    }
    let account = state.engine.ledger().get_balance(user_id, &currency).await;
    Ok(Json(account))
}

/// `GET /ledger`: the caller's ledger entries, newest first.
///
/// # Errors
///
/// Returns [`EngineError::UnknownCurrency`] for a malformed currency filter.
#[utoipa::path(
    get,
    path = "/api/v1/ledger",
    tag = "Balances",
    summary = "Ledger history",
    params(
        ("x-user-id" = String, Header, description = "Player id"),
        LedgerQuery,
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Paginated entries", body = LedgerListResponse),
        (status = 400, description = "Unknown currency", body = ErrorResponse),
    )
)]
pub async fn list_entries(
    State(state): State<AppState>,
    UserIdentity(user_id): UserIdentity,
    Query(query): Query<LedgerQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<impl IntoResponse, EngineError> {
    let currency = query.currency.as_deref().map(parse_currency).transpose()?;
    let (entries, total) = state
        .engine
        .ledger()
        .entries(user_id, currency.as_ref(), page.offset(), page.limit())
        .await;
    Ok(Json(LedgerListResponse {
        data: entries,
        pagination: page.meta(total),
    }))
}

/// Balance routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/balances/{currency}", get(get_balance))
        .route("/ledger", get(list_entries))
}
