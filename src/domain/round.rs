//! Round aggregate and its lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::RoundId;

/// Lifecycle state of a [`Round`].
///
/// Transitions are monotonic: `Open -> InProgress -> Closed`, with
/// `Canceled` reachable from either non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Accepting bets.
    Open,
    /// Value rising; cash-outs accepted.
    InProgress,
    /// Outcome fixed (crashed).
    Closed,
    /// Aborted; every stake returned.
    Canceled,
}

impl RoundStatus {
    /// Returns `true` for `Closed` and `Canceled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Canceled)
    }

    /// Returns `true` if `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::InProgress)
                | (Self::Open, Self::Canceled)
                | (Self::InProgress, Self::Closed)
                | (Self::InProgress, Self::Canceled)
        )
    }

    /// Returns the status as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected round transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("round {round_id} cannot move from {from:?} to {to:?}")]
pub struct RoundTransitionError {
    /// Round that refused the transition.
    pub round_id: RoundId,
    /// Current status.
    pub from: RoundStatus,
    /// Requested status.
    pub to: RoundStatus,
}

/// One play cycle with a single shared outcome.
///
/// `outcome` is written exactly once, on the transition out of
/// `InProgress`, and never again. The seed behind the outcome is committed
/// through `seed_hash` at open and revealed in `seed` at close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Monotonic round counter, also the outcome nonce.
    pub number: u64,
    /// Current lifecycle state.
    pub status: RoundStatus,
    /// Live value (multiplier) while in progress; final value afterwards.
    pub current_value: Decimal,
    /// Crash multiplier, fixed at close.
    pub outcome: Option<Decimal>,
    /// Hex sha256 of the outcome seed, published at open.
    pub seed_hash: String,
    /// Outcome seed, revealed once the round is terminal.
    pub seed: Option<String>,
    /// Why the round was canceled, if it was.
    pub cancel_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// When betting closed and the value started rising.
    pub started_at: Option<DateTime<Utc>>,
    /// When the round reached a terminal state.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Creates a round in `Open`.
    #[must_use]
    pub fn open(id: RoundId, number: u64, seed_hash: String) -> Self {
        Self {
            id,
            number,
            status: RoundStatus::Open,
            current_value: Decimal::ONE,
            outcome: None,
            seed_hash,
            seed: None,
            cancel_reason: None,
            created_at: Utc::now(),
            started_at: None,
            closed_at: None,
        }
    }

    fn transition(&mut self, to: RoundStatus) -> Result<(), RoundTransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(RoundTransitionError {
                round_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Open -> InProgress`.
    ///
    /// # Errors
    ///
    /// Returns [`RoundTransitionError`] unless the round is `Open`.
    pub fn start(&mut self) -> Result<(), RoundTransitionError> {
        self.transition(RoundStatus::InProgress)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `InProgress -> Closed`, fixing the outcome and revealing the seed.
    ///
    /// # Errors
    ///
    /// Returns [`RoundTransitionError`] unless the round is `InProgress`.
    pub fn close(&mut self, outcome: Decimal, seed: String) -> Result<(), RoundTransitionError> {
        self.transition(RoundStatus::Closed)?;
        self.outcome = Some(outcome);
        self.current_value = outcome;
        self.seed = Some(seed);
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state `-> Canceled`.
    ///
    /// # Errors
    ///
    /// Returns [`RoundTransitionError`] if the round is already terminal.
    pub fn cancel(&mut self, reason: &str, seed: Option<String>) -> Result<(), RoundTransitionError> {
        self.transition(RoundStatus::Canceled)?;
        self.cancel_reason = Some(reason.to_string());
        self.seed = seed;
        self.closed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn round() -> Round {
        Round::open(RoundId::new(), 1, "abc".to_string())
    }

    #[test]
    fn lifecycle_open_start_close() {
        let mut r = round();
        assert_eq!(r.status, RoundStatus::Open);
        assert!(r.start().is_ok());
        assert!(r.started_at.is_some());
        assert!(r.close(dec!(2.00), "seed".to_string()).is_ok());
        assert_eq!(r.status, RoundStatus::Closed);
        assert_eq!(r.outcome, Some(dec!(2.00)));
        assert_eq!(r.seed.as_deref(), Some("seed"));
    }

    #[test]
    fn outcome_is_written_once() {
        let mut r = round();
        let _ = r.start();
        let _ = r.close(dec!(1.50), "s".to_string());
        let err = r.close(dec!(9.99), "s".to_string());
        assert!(err.is_err());
        assert_eq!(r.outcome, Some(dec!(1.50)));
    }

    #[test]
    fn cannot_close_an_open_round() {
        let mut r = round();
        let Err(err) = r.close(dec!(2), "s".to_string()) else {
            panic!("expected transition error");
        };
        assert_eq!(err.from, RoundStatus::Open);
        assert_eq!(err.to, RoundStatus::Closed);
        assert!(r.outcome.is_none());
    }

    #[test]
    fn cancel_only_from_non_terminal() {
        let mut r = round();
        assert!(r.cancel("no bets", None).is_ok());
        assert_eq!(r.cancel_reason.as_deref(), Some("no bets"));
        assert!(r.cancel("again", None).is_err());
        assert!(r.start().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(RoundStatus::Closed.is_terminal());
        assert!(RoundStatus::Canceled.is_terminal());
        assert!(!RoundStatus::InProgress.is_terminal());
        assert!(!RoundStatus::InProgress.can_transition_to(RoundStatus::Open));
    }
}
