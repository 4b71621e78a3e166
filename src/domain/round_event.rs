//! Domain events emitted after every round, bet or remediation change.
//!
//! Events carry full snapshots so that subscribers (the broadcast hub and
//! the persistence journal) never need to read back into the engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::bet::Bet;
use super::failed_bet::FailedBet;
use super::round::{Round, RoundStatus};
use super::{RoundId, UserId};

/// Domain event published on the [`super::EventBus`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A round opened for bets.
    RoundOpened {
        /// Round snapshot.
        round: Round,
    },
    /// Betting closed and the value started rising.
    RoundStarted {
        /// Round snapshot.
        round: Round,
    },
    /// The live value moved.
    ValueUpdated {
        /// Round identifier.
        round_id: RoundId,
        /// New live value.
        current_value: Decimal,
        /// Status at the time of the update.
        status: RoundStatus,
        /// Update timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The round crashed and its outcome is fixed.
    RoundClosed {
        /// Round snapshot.
        round: Round,
    },
    /// The round was aborted.
    RoundCanceled {
        /// Round snapshot.
        round: Round,
    },
    /// A stake was accepted.
    BetPlaced {
        /// Bet snapshot.
        bet: Bet,
    },
    /// A bet reached `Won`, `Lost` or `Canceled`.
    BetSettled {
        /// Bet snapshot.
        bet: Bet,
    },
    /// A failed bet's stake was returned.
    BetRefunded {
        /// Bet snapshot.
        bet: Bet,
    },
    /// A bet could not be settled and awaits remediation.
    FailedBetRecorded {
        /// Failure record.
        failed: FailedBet,
    },
    /// A failure record changed state.
    FailedBetUpdated {
        /// Failure record.
        failed: FailedBet,
    },
}

impl RoundEvent {
    /// Returns the round this event concerns.
    #[must_use]
    pub fn round_id(&self) -> RoundId {
        match self {
            Self::RoundOpened { round }
            | Self::RoundStarted { round }
            | Self::RoundClosed { round }
            | Self::RoundCanceled { round } => round.id,
            Self::ValueUpdated { round_id, .. } => *round_id,
            Self::BetPlaced { bet } | Self::BetSettled { bet } | Self::BetRefunded { bet } => {
                bet.round_id
            }
            Self::FailedBetRecorded { failed } | Self::FailedBetUpdated { failed } => {
                failed.round_id
            }
        }
    }

    /// Returns the player concerned, for bet-level events.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::BetPlaced { bet } | Self::BetSettled { bet } | Self::BetRefunded { bet } => {
                Some(bet.user_id)
            }
            Self::FailedBetRecorded { failed } | Self::FailedBetUpdated { failed } => {
                Some(failed.user_id)
            }
            _ => None,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::RoundOpened { .. } => "round_opened",
            Self::RoundStarted { .. } => "round_started",
            Self::ValueUpdated { .. } => "value_updated",
            Self::RoundClosed { .. } => "round_closed",
            Self::RoundCanceled { .. } => "round_canceled",
            Self::BetPlaced { .. } => "bet_placed",
            Self::BetSettled { .. } => "bet_settled",
            Self::BetRefunded { .. } => "bet_refunded",
            Self::FailedBetRecorded { .. } => "failed_bet_recorded",
            Self::FailedBetUpdated { .. } => "failed_bet_updated",
        }
    }
}
