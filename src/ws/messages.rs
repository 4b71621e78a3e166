//! WebSocket message types: client commands and server messages.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{BetId, RoundId, RoundStatus};

/// Commands a client can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Follow rounds. `"*"` follows every round.
    Subscribe {
        /// Round ids, or `"*"`.
        round_ids: Vec<String>,
    },
    /// Stop following rounds.
    Unsubscribe {
        /// Round ids, or `"*"`.
        round_ids: Vec<String>,
    },
    /// Liveness probe.
    Ping,
}

/// Messages pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Round snapshot, sent to every subscriber of the round.
    RoundState {
        /// Round concerned.
        round_id: RoundId,
        /// Live (or final) value.
        current_value: Decimal,
        /// Round status.
        status: RoundStatus,
        /// Crash point, once fixed.
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<Decimal>,
    },
    /// The user's bet was cashed out.
    Cashout {
        /// Round of the bet.
        round_id: RoundId,
        /// Bet concerned.
        bet_id: BetId,
        /// Payout credited.
        amount: Decimal,
        /// Multiplier applied.
        multiplier: Option<Decimal>,
    },
    /// The round crashed before the user's bet cashed out.
    Crash {
        /// Round of the bet.
        round_id: RoundId,
        /// Bet concerned.
        bet_id: BetId,
        /// Stake lost.
        amount: Decimal,
        /// Crash point.
        multiplier: Option<Decimal>,
    },
    /// The user's stake was returned.
    Refund {
        /// Round of the bet.
        round_id: RoundId,
        /// Bet concerned.
        bet_id: BetId,
        /// Stake returned.
        amount: Decimal,
        /// Always empty.
        multiplier: Option<Decimal>,
    },
    /// Reply to a subscribe or unsubscribe command.
    Subscriptions {
        /// Explicitly followed rounds.
        count: usize,
        /// Whether the wildcard is active.
        wildcard: bool,
    },
    /// Reply to a ping.
    Pong,
    /// A command could not be processed.
    Error {
        /// Numeric code (HTTP-like).
        code: u16,
        /// Human-readable reason.
        message: String,
    },
}

impl ServerMessage {
    /// Round the message refers to, if any.
    #[must_use]
    pub const fn round_id(&self) -> Option<RoundId> {
        match self {
            Self::RoundState { round_id, .. }
            | Self::Cashout { round_id, .. }
            | Self::Crash { round_id, .. }
            | Self::Refund { round_id, .. } => Some(*round_id),
            Self::Subscriptions { .. } | Self::Pong | Self::Error { .. } => None,
        }
    }

    /// Builds an error reply.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
