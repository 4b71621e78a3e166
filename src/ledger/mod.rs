//! Ledger layer: append-only balance log and per-account projections.
//!
//! The [`Ledger`] is the only writer of [`BalanceAccount`]s. Each mutation
//! appends one [`LedgerEntry`] per affected component, keyed for
//! idempotency by `(transaction_id, operation_type)`.

#[allow(clippy::module_inception)]
pub mod ledger;

pub mod account;
pub mod entry;

pub use account::{AccountKey, BalanceAccount, ComponentBalance};
pub use entry::{EntryStatus, LedgerEntry, Posting};
pub use ledger::{Ledger, LedgerError, Verification, WinSettlement};
