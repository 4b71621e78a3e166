//! Round request/response DTOs.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::bet_dto::BetDto;
use super::common_dto::PaginationMeta;
use crate::domain::{Round, RoundId, RoundStatus};
use crate::service::{CancelSummary, CloseSummary};

/// Round snapshot as exposed over HTTP.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundDto {
    /// Round identifier.
    pub id: RoundId,
    /// Sequential round number.
    pub number: u64,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Live multiplier.
    #[schema(value_type = String, example = "1.00")]
    pub current_value: Decimal,
    /// Final multiplier, once closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub outcome: Option<Decimal>,
    /// sha256 commitment of the round seed.
    pub seed_hash: String,
    /// Revealed seed, once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<String>,
    /// Why the round was canceled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Opening time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Close or cancel time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<Round> for RoundDto {
    fn from(r: Round) -> Self {
        Self {
            id: r.id,
            number: r.number,
            status: r.status,
            current_value: r.current_value,
            outcome: r.outcome,
            seed_hash: r.seed_hash,
            seed: r.seed,
            cancel_reason: r.cancel_reason,
            created_at: r.created_at,
            started_at: r.started_at,
            closed_at: r.closed_at,
        }
    }
}

/// Response for `GET /rounds/{id}`: the round and its bets.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundDetailResponse {
    /// Round snapshot.
    pub round: RoundDto,
    /// Bets placed in the round.
    pub bets: Vec<BetDto>,
}

/// Paginated round history.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundListResponse {
    /// Rounds on this page, newest first.
    pub data: Vec<RoundDto>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Request body for `POST /rounds/{id}/close`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CloseRoundRequest {
    /// Outcome to apply; the generated one when omitted.
    #[serde(default)]
    #[schema(value_type = Option<String>, example = "2.35")]
    pub outcome: Option<Decimal>,
}

/// Request body for `POST /rounds/{id}/cancel`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRoundRequest {
    /// Recorded cancel reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of closing a round.
#[derive(Debug, Serialize, ToSchema)]
pub struct CloseRoundResponse {
    /// Round after settlement.
    pub round: RoundDto,
    /// Bets settled as won.
    pub won: usize,
    /// Bets settled as lost.
    pub lost: usize,
    /// Bets handed to the failure manager.
    pub failed: usize,
}

impl From<CloseSummary> for CloseRoundResponse {
    fn from(s: CloseSummary) -> Self {
        Self {
            round: s.round.into(),
            won: s.won,
            lost: s.lost,
            failed: s.failed,
        }
    }
}

/// Result of canceling a round.
#[derive(Debug, Serialize, ToSchema)]
pub struct CancelRoundResponse {
    /// Round after cancellation.
    pub round: RoundDto,
    /// Stakes released.
    pub refunded: usize,
    /// Bets handed to the failure manager.
    pub failed: usize,
}

impl From<CancelSummary> for CancelRoundResponse {
    fn from(s: CancelSummary) -> Self {
        Self {
            round: s.round.into(),
            refunded: s.refunded,
            failed: s.failed,
        }
    }
}
