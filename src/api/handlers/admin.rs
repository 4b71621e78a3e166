//! Operator handlers: failed bets, manual refunds, fund adjustments and
//! account suspension. Every route requires `x-admin-id`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};

use super::parse_currency;
use crate::api::dto::{
    AdjustFundsRequest, FailedBetDto, FailedBetListResponse, FailedBetQuery, FundDirection,
    ManualRefundRequest, ManualRefundResponse, PaginationParams, RefundDto, SuspensionRequest,
};
use crate::api::identity::AdminIdentity;
use crate::app_state::AppState;
use crate::domain::{OperationType, UserId};
use crate::error::{EngineError, ErrorResponse};
use crate::ledger::{BalanceAccount, LedgerEntry, Posting};

/// `GET /admin/failed-bets`: bets that could not be settled.
///
/// # Errors
///
/// Returns [`EngineError::InvalidRequest`] for an unknown status filter.
#[utoipa::path(
    get,
    path = "/api/v1/admin/failed-bets",
    tag = "Admin",
    summary = "List failed bets",
    description = "Lists failed-bet records, pending ones by default.",
    params(
        ("x-admin-id" = String, Header, description = "Operator id"),
        FailedBetQuery,
        PaginationParams,
    ),
    responses(
        (status = 200, description = "Paginated failed bets", body = FailedBetListResponse),
        (status = 400, description = "Unknown status filter", body = ErrorResponse),
    )
)]
pub async fn list_failed_bets(
    State(state): State<AppState>,
    AdminIdentity(_admin): AdminIdentity,
    Query(query): Query<FailedBetQuery>,
    Query(page): Query<PaginationParams>,
) -> Result<impl IntoResponse, EngineError> {
    let (records, total) = state
        .engine
        .failures()
        .list_failed(query.filter()?, page.offset(), page.limit())
        .await;
    Ok(Json(FailedBetListResponse {
        data: records.into_iter().map(FailedBetDto::from).collect(),
        pagination: page.meta(total),
    }))
}

/// `POST /admin/failed-bets/refund`: return the stakes of a user's failed
/// bets in a round.
///
/// # Errors
///
/// Returns [`EngineError::FailedBetNotFound`] when nothing matches, or the
/// ledger error of a refund that could not be applied.
#[utoipa::path(
    post,
    path = "/api/v1/admin/failed-bets/refund",
    tag = "Admin",
    summary = "Manual refund",
    description = "Refunds every failed bet of the user in the round. Already refunded records are reported with their original entry; no second credit is written.",
    params(("x-admin-id" = String, Header, description = "Operator id")),
    request_body = ManualRefundRequest,
    responses(
        (status = 200, description = "Refund results", body = ManualRefundResponse),
        (status = 404, description = "No failed bet", body = ErrorResponse),
        (status = 500, description = "Refund could not be applied", body = ErrorResponse),
    )
)]
pub async fn manual_refund(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Json(req): Json<ManualRefundRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let refunds = state
        .engine
        .failures()
        .manual_refund(req.round_id, req.user_id, admin_id)
        .await?;
    Ok(Json(ManualRefundResponse {
        refunds: refunds.into_iter().map(RefundDto::from).collect(),
    }))
}

/// `POST /admin/funds`: credit or debit an account on an operator's
/// authority. Replaying a `transaction_id` returns the original entry.
///
/// # Errors
///
/// Returns [`EngineError::UnknownCurrency`], [`EngineError::InvalidAmount`],
/// [`EngineError::InsufficientFunds`] or [`EngineError::AccountSuspended`].
#[utoipa::path(
    post,
    path = "/api/v1/admin/funds",
    tag = "Admin",
    summary = "Adjust funds",
    params(("x-admin-id" = String, Header, description = "Operator id")),
    request_body = AdjustFundsRequest,
    responses(
        (status = 201, description = "Entry written", body = LedgerEntry),
        (status = 200, description = "Transaction already applied", body = LedgerEntry),
        (status = 400, description = "Invalid amount or currency", body = ErrorResponse),
        (status = 422, description = "Insufficient funds or suspended account", body = ErrorResponse),
    )
)]
pub async fn adjust_funds(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Json(req): Json<AdjustFundsRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let currency = parse_currency(&req.currency)?;
    let operation = match req.direction {
        FundDirection::Add => OperationType::AddFund,
        FundDirection::Remove => OperationType::RemoveFund,
    };
    let mut posting = Posting::new(req.user_id, currency, req.amount, operation, req.transaction_id)
        .admin(admin_id);
    if let Some(component) = req.component {
        posting = posting.component(component);
    }

    let ledger = state.engine.ledger();
    let applied = match req.direction {
        FundDirection::Add => ledger.credit(posting).await,
        FundDirection::Remove => ledger.debit(posting).await,
    };
    match applied.map_err(EngineError::from) {
        Ok(entry) => {
            tracing::info!(
                user_id = %entry.user_id,
                %admin_id,
                operation = %entry.operation_type,
                amount = %entry.change_amount,
                "manual fund adjustment"
            );
            Ok((StatusCode::CREATED, Json(entry)))
        }
        Err(EngineError::DuplicateTransaction { original }) => {
            Ok((StatusCode::OK, Json(*original)))
        }
        Err(e) => Err(e),
    }
}

/// `PUT /admin/accounts/{user_id}/{currency}/suspension`: block or unblock
/// an account.
///
/// # Errors
///
/// Returns [`EngineError::UnknownCurrency`] for a malformed code, or a
/// persistence error when the change cannot be stored.
#[utoipa::path(
    put,
    path = "/api/v1/admin/accounts/{user_id}/{currency}/suspension",
    tag = "Admin",
    summary = "Set account suspension",
    description = "A suspended account rejects new bets, deposits and manual adjustments until unblocked. Bets already placed still settle and refund.",
    params(
        ("user_id" = String, Path, description = "Account owner"),
        ("currency" = String, Path, description = "Currency code"),
        ("x-admin-id" = String, Header, description = "Operator id"),
    ),
    request_body = SuspensionRequest,
    responses(
        (status = 200, description = "Account after the change", body = BalanceAccount),
        (status = 400, description = "Unknown currency", body = ErrorResponse),
    )
)]
pub async fn set_suspension(
    State(state): State<AppState>,
    AdminIdentity(admin_id): AdminIdentity,
    Path((user_id, currency)): Path<(UserId, String)>,
    Json(req): Json<SuspensionRequest>,
) -> Result<impl IntoResponse, EngineError> {
    let currency = parse_currency(&currency)?;
    if let Some(db) = &state.persistence {
        db.save_suspension(user_id, &currency, req.suspended).await?;
    }
    let account = state
        .engine
        .ledger()
        .set_suspended(user_id, &currency, req.suspended)
        .await;
    tracing::info!(%user_id, %currency, %admin_id, suspended = req.suspended, "suspension set by operator");
    Ok(Json(account))
}

/// Operator routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/failed-bets", get(list_failed_bets))
        .route("/admin/failed-bets/refund", post(manual_refund))
        .route("/admin/funds", post(adjust_funds))
        .route(
            "/admin/accounts/{user_id}/{currency}/suspension",
            put(set_suspension),
        )
}
