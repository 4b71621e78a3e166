//! Ledger entries and the postings that produce them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{
    AdminId, Component, Currency, EntryId, OperationGroup, OperationType, UserId,
};

/// Lifecycle state of an entry. Entries are written once, already final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Applied to the balance projection.
    Completed,
}

/// Immutable audit record of one balance mutation.
///
/// `change_amount` is the delta applied to the component's `amount`,
/// `reserved_change` the delta applied to its `reserved`. Summing either
/// column over an account's entries yields the current projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntry {
    /// Entry identifier.
    #[schema(value_type = String)]
    pub id: EntryId,
    /// Position in the account's history, starting at 1.
    pub sequence: u64,
    /// Account holder.
    #[schema(value_type = String)]
    pub user_id: UserId,
    /// Account currency.
    #[schema(value_type = String)]
    pub currency: Currency,
    /// Component mutated.
    pub component: Component,
    /// Operation group.
    pub operation_group: OperationGroup,
    /// Operation type.
    pub operation_type: OperationType,
    /// Signed delta of `amount`.
    #[schema(value_type = String)]
    pub change_amount: Decimal,
    /// Signed delta of `reserved`.
    #[schema(value_type = String)]
    pub reserved_change: Decimal,
    /// Component `amount` after this entry.
    #[schema(value_type = String)]
    pub balance_after: Decimal,
    /// Component `reserved` after this entry.
    #[schema(value_type = String)]
    pub reserved_after: Decimal,
    /// Originating bet or external reference.
    pub transaction_id: String,
    /// Operator who triggered the mutation, for manual operations.
    #[schema(value_type = Option<String>)]
    pub admin_id: Option<AdminId>,
    /// Entry status.
    pub status: EntryStatus,
    /// Application time.
    pub created_at: DateTime<Utc>,
}

/// A requested mutation, before the ledger applies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    /// Account holder.
    pub user_id: UserId,
    /// Account currency.
    pub currency: Currency,
    /// Component to mutate.
    pub component: Component,
    /// Positive amount moved.
    pub amount: Decimal,
    /// Operation group.
    pub operation_group: OperationGroup,
    /// Operation type; together with `transaction_id` the idempotency key.
    pub operation_type: OperationType,
    /// Originating bet or external reference.
    pub transaction_id: String,
    /// Attributed operator.
    pub admin_id: Option<AdminId>,
}

impl Posting {
    /// Creates a posting on the default component of `currency` (points for
    /// the points currency, real money otherwise) and the default group of
    /// `operation_type`.
    #[must_use]
    pub fn new(
        user_id: UserId,
        currency: Currency,
        amount: Decimal,
        operation_type: OperationType,
        transaction_id: impl Into<String>,
    ) -> Self {
        let component = if currency.is_points() {
            Component::Points
        } else {
            Component::RealMoney
        };
        Self {
            user_id,
            currency,
            component,
            amount,
            operation_group: operation_type.default_group(),
            operation_type,
            transaction_id: transaction_id.into(),
            admin_id: None,
        }
    }

    /// Overrides the component.
    #[must_use]
    pub fn component(mut self, component: Component) -> Self {
        self.component = component;
        self
    }

    /// Overrides the operation group.
    #[must_use]
    pub fn group(mut self, group: OperationGroup) -> Self {
        self.operation_group = group;
        self
    }

    /// Attributes the mutation to an operator.
    #[must_use]
    pub fn admin(mut self, admin_id: AdminId) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    /// Same posting with another operation type and its default group.
    #[must_use]
    pub fn with_type(&self, operation_type: OperationType) -> Self {
        Self {
            operation_type,
            operation_group: operation_type.default_group(),
            ..self.clone()
        }
    }
}
