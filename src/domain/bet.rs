//! Bet aggregate and its forward-only status machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::money::Currency;
use super::{BetId, RoundId, UserId};

/// Settlement state of a [`Bet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Stake reserved, awaiting resolution.
    Placed,
    /// Cashed out before the crash.
    Won,
    /// Round crashed before a cash-out.
    Lost,
    /// Withdrawn by the player or the round was canceled.
    Canceled,
    /// Returned after a failed settlement.
    Refunded,
}

impl BetStatus {
    /// Returns `true` once the bet can no longer change.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !matches!(self, Self::Placed)
    }

    /// Returns the status as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Placed => "placed",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Canceled => "canceled",
            Self::Refunded => "refunded",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected bet transition (bets never move backwards).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bet {bet_id} is already {from:?}, cannot become {to:?}")]
pub struct BetTransitionError {
    /// Bet that refused the transition.
    pub bet_id: BetId,
    /// Current status.
    pub from: BetStatus,
    /// Requested status.
    pub to: BetStatus,
}

/// One user's wager against one round. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    /// Bet identifier.
    pub id: BetId,
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Player who placed it.
    pub user_id: UserId,
    /// Stake currency.
    pub currency: Currency,
    /// Stake.
    pub amount: Decimal,
    /// Caller-supplied idempotency key.
    pub client_tx_id: String,
    /// Optional automatic cash-out target.
    pub auto_cashout: Option<Decimal>,
    /// Settlement state.
    pub status: BetStatus,
    /// Amount credited on a win.
    pub payout: Option<Decimal>,
    /// Multiplier the bet was cashed out at.
    pub cashout_multiplier: Option<Decimal>,
    /// Placement timestamp.
    pub placed_at: DateTime<Utc>,
    /// Settlement timestamp.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Creates a bet in `Placed`.
    #[must_use]
    pub fn place(
        round_id: RoundId,
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
        client_tx_id: String,
        auto_cashout: Option<Decimal>,
    ) -> Self {
        Self {
            id: BetId::new(),
            round_id,
            user_id,
            currency,
            amount,
            client_tx_id,
            auto_cashout,
            status: BetStatus::Placed,
            payout: None,
            cashout_multiplier: None,
            placed_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Moves the bet out of `Placed`.
    ///
    /// # Errors
    ///
    /// Returns [`BetTransitionError`] if the bet is already final or the
    /// target is `Placed`.
    pub fn settle(
        &mut self,
        status: BetStatus,
        payout: Option<Decimal>,
        multiplier: Option<Decimal>,
    ) -> Result<(), BetTransitionError> {
        if self.status.is_final() || !status.is_final() {
            return Err(BetTransitionError {
                bet_id: self.id,
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.payout = payout;
        self.cashout_multiplier = multiplier;
        self.settled_at = Some(Utc::now());
        Ok(())
    }

    /// Ledger transaction id tying every entry of this bet back to it.
    #[must_use]
    pub fn transaction_id(&self) -> String {
        Self::transaction_id_for(self.id)
    }

    /// Ledger transaction id of the bet with `bet_id`.
    #[must_use]
    pub fn transaction_id_for(bet_id: BetId) -> String {
        format!("bet:{bet_id}")
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bet() -> Bet {
        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        Bet::place(RoundId::new(), UserId::new(), usd, dec!(10), "a1".to_string(), None)
    }

    #[test]
    fn settle_moves_forward() {
        let mut b = bet();
        assert!(b.settle(BetStatus::Won, Some(dec!(15)), Some(dec!(1.5))).is_ok());
        assert_eq!(b.status, BetStatus::Won);
        assert_eq!(b.payout, Some(dec!(15)));
        assert!(b.settled_at.is_some());
    }

    #[test]
    fn settle_never_moves_backwards() {
        let mut b = bet();
        let _ = b.settle(BetStatus::Lost, None, None);
        let Err(err) = b.settle(BetStatus::Won, Some(dec!(15)), None) else {
            panic!("expected transition error");
        };
        assert_eq!(err.from, BetStatus::Lost);
        assert_eq!(b.status, BetStatus::Lost);
    }

    #[test]
    fn cannot_settle_into_placed() {
        let mut b = bet();
        assert!(b.settle(BetStatus::Placed, None, None).is_err());
    }

    #[test]
    fn transaction_id_is_stable() {
        let b = bet();
        assert_eq!(b.transaction_id(), b.transaction_id());
        assert!(b.transaction_id().starts_with("bet:"));
    }
}
