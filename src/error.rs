//! Engine error types with HTTP status code mapping.
//!
//! [`EngineError`] is the central error type. Each variant maps to a
//! numeric code and an HTTP status, and renders as a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{BetId, BetTransitionError, RoundId, RoundStatus, RoundTransitionError};
use crate::ledger::{LedgerEntry, LedgerError};

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 4001,
///     "message": "insufficient funds: available 5, requested 10",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Engine-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category             | HTTP Status                  |
/// |-----------|----------------------|------------------------------|
/// | 1000–1999 | Validation           | 400 Bad Request / 401        |
/// | 2000–2999 | Not found / conflict | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Server               | 500 Internal Server Error    |
/// | 4000–4999 | Balance              | 422 Unprocessable Entity     |
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Currency code is malformed or not supported.
    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    /// Amount is zero, negative, too precise or outside the bet limits.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Caller identity is missing or malformed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Round with the given ID was not found.
    #[error("round not found: {0}")]
    RoundNotFound(RoundId),

    /// Bet was not found.
    #[error("bet not found: {0}")]
    BetNotFound(String),

    /// No failed-bet record matches.
    #[error("failed bet not found: {0}")]
    FailedBetNotFound(String),

    /// No round has been opened yet.
    #[error("no round has been opened yet")]
    NoRound,

    /// A non-terminal round already exists.
    #[error("round {0} is still open")]
    RoundAlreadyOpen(RoundId),

    /// The round no longer accepts bets.
    #[error("round {round_id} is not open (status {status})")]
    RoundNotOpen {
        /// Round concerned.
        round_id: RoundId,
        /// Status observed.
        status: RoundStatus,
    },

    /// The round has not started yet.
    #[error("round {round_id} is not in progress (status {status})")]
    RoundNotInProgress {
        /// Round concerned.
        round_id: RoundId,
        /// Status observed.
        status: RoundStatus,
    },

    /// The round's outcome is already fixed.
    #[error("round {0} is already closed")]
    RoundAlreadyClosed(RoundId),

    /// The idempotency key or the active-bet slot is taken.
    #[error("duplicate bet: {0}")]
    DuplicateBet(BetId),

    /// The bet already reached a final status.
    #[error("bet {0} is already settled")]
    BetAlreadySettled(BetId),

    /// The ledger already recorded this transaction.
    #[error("duplicate transaction: {}", original.transaction_id)]
    DuplicateTransaction {
        /// Entry written by the first application.
        original: Box<LedgerEntry>,
    },

    /// Available balance does not cover the amount.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The account is blocked.
    #[error("account suspended: {0}")]
    AccountSuspended(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    PersistenceError(String),

    /// The outcome generator failed.
    #[error("outcome unavailable: {0}")]
    Outcome(String),

    /// The round's worker is gone.
    #[error("round {0} is unavailable")]
    RoundUnavailable(RoundId),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::UnknownCurrency(_) => 1002,
            Self::InvalidAmount(_) => 1003,
            Self::Unauthorized(_) => 1004,
            Self::RoundNotFound(_) => 2001,
            Self::BetNotFound(_) => 2002,
            Self::FailedBetNotFound(_) => 2003,
            Self::NoRound => 2004,
            Self::RoundAlreadyOpen(_) => 2101,
            Self::RoundNotOpen { .. } => 2102,
            Self::RoundNotInProgress { .. } => 2103,
            Self::RoundAlreadyClosed(_) => 2104,
            Self::DuplicateBet(_) => 2105,
            Self::DuplicateTransaction { .. } => 2106,
            Self::BetAlreadySettled(_) => 2107,
            Self::Internal(_) => 3000,
            Self::PersistenceError(_) => 3001,
            Self::Outcome(_) => 3002,
            Self::RoundUnavailable(_) => 3003,
            Self::InsufficientFunds(_) => 4001,
            Self::AccountSuspended(_) => 4002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::UnknownCurrency(_) | Self::InvalidAmount(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RoundNotFound(_)
            | Self::BetNotFound(_)
            | Self::FailedBetNotFound(_)
            | Self::NoRound => StatusCode::NOT_FOUND,
            Self::RoundAlreadyOpen(_)
            | Self::RoundNotOpen { .. }
            | Self::RoundNotInProgress { .. }
            | Self::RoundAlreadyClosed(_)
            | Self::DuplicateBet(_)
            | Self::DuplicateTransaction { .. }
            | Self::BetAlreadySettled(_) => StatusCode::CONFLICT,
            Self::InsufficientFunds(_) | Self::AccountSuspended(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::PersistenceError(_)
            | Self::Outcome(_)
            | Self::RoundUnavailable(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for expected races the caller should treat as a
    /// normal "too late" outcome rather than retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status_code() == StatusCode::CONFLICT
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds { .. } => Self::InsufficientFunds(err.to_string()),
            LedgerError::DuplicateTransaction { original } => {
                Self::DuplicateTransaction { original }
            }
            LedgerError::InvalidAmount(reason) => Self::InvalidAmount(reason),
            LedgerError::AccountSuspended { .. } => Self::AccountSuspended(err.to_string()),
            LedgerError::JournalClosed => Self::PersistenceError(err.to_string()),
            LedgerError::InsufficientReservation { .. }
            | LedgerError::Overflow
            | LedgerError::Inconsistent(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<RoundTransitionError> for EngineError {
    fn from(err: RoundTransitionError) -> Self {
        if err.from.is_terminal() {
            Self::RoundAlreadyClosed(err.round_id)
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl From<BetTransitionError> for EngineError {
    fn from(err: BetTransitionError) -> Self {
        Self::BetAlreadySettled(err.bet_id)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let details = match &self {
            Self::DuplicateTransaction { original } => Some(original.id.to_string()),
            _ => None,
        };
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
