//! Persistence layer: PostgreSQL mirror of rounds, bets, ledger entries,
//! failure records and the domain event journal.
//!
//! The engine keeps its state in memory; [`journal`] writes every change
//! in the background and [`crate::service::recovery`] reads it back at
//! startup. Ledger entries reach the journal through a bounded queue, so
//! none is lost to a slow or failing database.

pub mod journal;
pub mod models;
pub mod postgres;

pub use journal::spawn_journal;
pub use postgres::PostgresPersistence;
