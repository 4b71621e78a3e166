//! Balance projection for one `(user, currency)` account.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{Component, Currency, UserId};

/// Key of a balance account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey {
    /// Account holder.
    pub user_id: UserId,
    /// Account currency.
    pub currency: Currency,
}

impl AccountKey {
    /// Creates a key.
    #[must_use]
    pub fn new(user_id: UserId, currency: Currency) -> Self {
        Self { user_id, currency }
    }
}

/// Amount and reservation held in one balance component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ComponentBalance {
    /// Funds owned, including reserved funds.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Funds earmarked for pending bets.
    #[schema(value_type = String)]
    pub reserved: Decimal,
}

impl ComponentBalance {
    /// `amount - reserved`.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.amount - self.reserved
    }
}

/// Projection of a `(user, currency)` account, derived from its ledger
/// entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BalanceAccount {
    /// Account holder.
    #[schema(value_type = String)]
    pub user_id: UserId,
    /// Account currency.
    #[schema(value_type = String)]
    pub currency: Currency,
    /// Sum of all component amounts.
    #[schema(value_type = String)]
    pub amount: Decimal,
    /// Sum of all component reservations.
    #[schema(value_type = String)]
    pub reserved: Decimal,
    /// `amount - reserved`.
    #[schema(value_type = String)]
    pub available: Decimal,
    /// Real-money component.
    pub real_money: ComponentBalance,
    /// Bonus-money component.
    pub bonus_money: ComponentBalance,
    /// Loyalty-points component.
    pub points: ComponentBalance,
    /// Whether mutations are blocked.
    pub suspended: bool,
    /// Sequence number of the last applied entry.
    pub version: u64,
    /// Time of the last applied entry.
    pub updated_at: Option<DateTime<Utc>>,
}

impl BalanceAccount {
    /// Creates an empty account.
    #[must_use]
    pub fn empty(user_id: UserId, currency: Currency) -> Self {
        Self {
            user_id,
            currency,
            amount: Decimal::ZERO,
            reserved: Decimal::ZERO,
            available: Decimal::ZERO,
            real_money: ComponentBalance::default(),
            bonus_money: ComponentBalance::default(),
            points: ComponentBalance::default(),
            suspended: false,
            version: 0,
            updated_at: None,
        }
    }

    /// Returns one component's balance.
    #[must_use]
    pub const fn component(&self, component: Component) -> &ComponentBalance {
        match component {
            Component::RealMoney => &self.real_money,
            Component::BonusMoney => &self.bonus_money,
            Component::Points => &self.points,
        }
    }

    pub(crate) fn component_mut(&mut self, component: Component) -> &mut ComponentBalance {
        match component {
            Component::RealMoney => &mut self.real_money,
            Component::BonusMoney => &mut self.bonus_money,
            Component::Points => &mut self.points,
        }
    }

    /// Recomputes the totals after a component changed.
    pub(crate) fn refresh_totals(&mut self) {
        let parts = [self.real_money, self.bonus_money, self.points];
        self.amount = parts.iter().map(|c| c.amount).sum();
        self.reserved = parts.iter().map(|c| c.reserved).sum();
        self.available = self.amount - self.reserved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn totals_follow_components() {
        let Ok(usd) = Currency::parse("USD") else {
            return;
        };
        let mut account = BalanceAccount::empty(UserId::new(), usd);
        account.component_mut(Component::RealMoney).amount = dec!(100);
        account.component_mut(Component::RealMoney).reserved = dec!(10);
        account.component_mut(Component::BonusMoney).amount = dec!(5);
        account.refresh_totals();

        assert_eq!(account.amount, dec!(105));
        assert_eq!(account.reserved, dec!(10));
        assert_eq!(account.available, dec!(95));
        assert_eq!(account.component(Component::RealMoney).available(), dec!(90));
    }
}
