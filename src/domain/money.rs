//! Money vocabulary: currency codes, balance components and operation
//! categories.
//!
//! Operation categories are closed enums. External systems still speak the
//! legacy string codes (`"place_bet"`, `"real_money"`, ...), so every enum
//! carries an explicit mapping table used in both directions.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum number of fractional digits accepted on a stake or fund amount.
pub const MAX_AMOUNT_SCALE: u32 = 8;

/// Currency code denoting loyalty points rather than money.
pub const POINTS_CURRENCY: &str = "P";

/// Error returned when a legacy string code has no enum counterpart.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} code: {code}")]
pub struct UnknownCode {
    /// Which vocabulary the code was looked up in.
    pub kind: &'static str,
    /// The offending code.
    pub code: String,
}

/// Upper-case currency code (`"USD"`, `"NGN"`, `"P"` for points).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Normalizes `code` to upper case and checks its shape (1 to 5 ASCII
    /// alphanumerics). Whether the currency is supported is a separate
    /// question answered by a [`CurrencyDirectory`].
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCode`] when the code is empty or malformed.
    pub fn parse(code: &str) -> Result<Self, UnknownCode> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() || code.len() > 5 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(UnknownCode {
                kind: "currency",
                code,
            });
        }
        Ok(Self(code))
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the points pseudo-currency.
    #[must_use]
    pub fn is_points(&self) -> bool {
        self.0 == POINTS_CURRENCY
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Narrow contract with the currency/exchange collaborator: only the
/// question "is this code known" is asked on the betting path.
pub trait CurrencyDirectory: fmt::Debug + Send + Sync {
    /// Returns `true` if wagers may be placed in `currency`.
    fn is_supported(&self, currency: &Currency) -> bool;

    /// Lists every supported code.
    fn supported(&self) -> Vec<Currency>;
}

/// Fixed list of currencies loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCurrencies {
    codes: BTreeSet<Currency>,
}

impl StaticCurrencies {
    /// Builds the directory from raw codes, skipping malformed ones.
    #[must_use]
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let codes = codes
            .into_iter()
            .filter_map(|c| Currency::parse(c.as_ref()).ok())
            .collect();
        Self { codes }
    }
}

impl CurrencyDirectory for StaticCurrencies {
    fn is_supported(&self, currency: &Currency) -> bool {
        self.codes.contains(currency)
    }

    fn supported(&self) -> Vec<Currency> {
        self.codes.iter().cloned().collect()
    }
}

macro_rules! legacy_codes {
    ($(#[$meta:meta])* $name:ident, $kind:literal, { $($(#[$vmeta:meta])* $variant:ident => $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Mapping between variants and legacy string codes.
            pub const LEGACY_CODES: &'static [($name, &'static str)] = &[$(($name::$variant, $code)),+];

            /// Returns the legacy string code.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $code,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownCode;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::LEGACY_CODES
                    .iter()
                    .find(|(_, code)| *code == s)
                    .map(|(variant, _)| *variant)
                    .ok_or_else(|| UnknownCode { kind: $kind, code: s.to_string() })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

legacy_codes!(
    /// Balance component a mutation applies to.
    Component, "component", {
        /// Withdrawable money.
        RealMoney => "real_money",
        /// Promotional money.
        BonusMoney => "bonus_money",
        /// Loyalty points.
        Points => "points",
    }
);

legacy_codes!(
    /// Coarse grouping of ledger operations.
    OperationGroup, "operation group", {
        /// Internal movements driven by gameplay.
        Transfer => "transfer",
        /// Operator-initiated credit.
        AddFund => "add_fund",
        /// Operator-initiated debit.
        RemoveFund => "remove_fund",
    }
);

legacy_codes!(
    /// Why a ledger mutation happened.
    OperationType, "operation type", {
        /// Stake reserved at bet placement.
        PlaceBet => "place_bet",
        /// Reserved stake finalized on a won bet.
        BetStake => "bet_stake",
        /// Winnings paid on cash-out.
        BetCashout => "bet_cashout",
        /// Stake forfeited on a lost bet.
        BetLost => "bet_lost",
        /// Stake returned because the bet or round was canceled.
        BetCanceled => "bet_canceled",
        /// Stake returned for a bet that failed to settle.
        Refund => "refund",
        /// Wallet funding confirmed by the payment collaborator.
        Deposit => "deposit",
        /// Manual operator credit.
        AddFund => "add_fund",
        /// Manual operator debit.
        RemoveFund => "remove_fund",
    }
);

impl OperationType {
    /// Default group for this operation type.
    #[must_use]
    pub const fn default_group(&self) -> OperationGroup {
        match self {
            Self::AddFund => OperationGroup::AddFund,
            Self::RemoveFund => OperationGroup::RemoveFund,
            _ => OperationGroup::Transfer,
        }
    }
}

/// Computes `stake * multiplier` truncated to [`MAX_AMOUNT_SCALE`] digits,
/// so rounding never pays out more than the exact product.
#[must_use]
pub fn payout_for(stake: Decimal, multiplier: Decimal) -> Option<Decimal> {
    stake
        .checked_mul(multiplier)
        .map(|p| p.round_dp_with_strategy(MAX_AMOUNT_SCALE, RoundingStrategy::ToZero))
}

/// Validates a positive amount with at most [`MAX_AMOUNT_SCALE`] fractional
/// digits.
///
/// # Errors
///
/// Returns a human-readable reason when the amount is zero, negative or too
/// precise.
pub fn validate_amount(amount: Decimal) -> Result<(), String> {
    if amount <= Decimal::ZERO {
        return Err(format!("amount must be positive, got {amount}"));
    }
    if amount.normalize().scale() > MAX_AMOUNT_SCALE {
        return Err(format!(
            "amount {amount} has more than {MAX_AMOUNT_SCALE} fractional digits"
        ));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn currency_is_normalized() {
        let Ok(c) = Currency::parse(" usd ") else {
            panic!("valid currency");
        };
        assert_eq!(c.as_str(), "USD");
        assert!(Currency::parse("").is_err());
        assert!(Currency::parse("US-D").is_err());
        assert!(Currency::parse("TOOLONG").is_err());
    }

    #[test]
    fn static_directory_answers_membership() {
        let dir = StaticCurrencies::new(["USD", "p", "bad code"]);
        let Ok(usd) = Currency::parse("USD") else {
            panic!("valid currency");
        };
        let Ok(eur) = Currency::parse("EUR") else {
            panic!("valid currency");
        };
        assert!(dir.is_supported(&usd));
        assert!(!dir.is_supported(&eur));
        assert_eq!(dir.supported().len(), 2);
    }

    #[test]
    fn legacy_codes_round_trip() {
        for (variant, code) in OperationType::LEGACY_CODES {
            assert_eq!(variant.as_str(), *code);
        }
        assert_eq!("real_money".parse::<Component>(), Ok(Component::RealMoney));
        assert_eq!("place_bet".parse::<OperationType>(), Ok(OperationType::PlaceBet));
        assert!("withdrawal".parse::<OperationType>().is_err());
    }

    #[test]
    fn manual_operations_use_fund_groups() {
        assert_eq!(
            OperationType::AddFund.default_group(),
            OperationGroup::AddFund
        );
        assert_eq!(
            OperationType::BetCashout.default_group(),
            OperationGroup::Transfer
        );
    }

    #[test]
    fn payout_truncates() {
        assert_eq!(payout_for(dec!(10), dec!(1.5)), Some(dec!(15)));
        assert_eq!(
            payout_for(dec!(0.33333333), dec!(1.01)),
            Some(dec!(0.33666666))
        );
    }

    #[test]
    fn amount_validation() {
        assert!(validate_amount(dec!(10)).is_ok());
        assert!(validate_amount(dec!(0)).is_err());
        assert!(validate_amount(dec!(-1)).is_err());
        assert!(validate_amount(dec!(0.000000001)).is_err());
    }
}
