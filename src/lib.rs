//! # wager-gateway
//!
//! Round engine, balance ledger and streaming gateway for multiplier
//! ("crash") wagering games.
//!
//! Rounds open, take bets, rise tick by tick and close at a pre-committed
//! outcome. Every stake and payout flows through an append-only ledger
//! with per-transaction idempotency, bets that cannot be settled are
//! parked for refund, and every state change is fanned out to WebSocket
//! subscribers without letting a slow client hold up a round.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── Broadcast Hub (ws/)
//!     │
//!     ├── RoundEngine ── one worker task per live round (service/)
//!     ├── FailureManager, RoundScheduler, recovery (service/)
//!     ├── EventBus, RoundStore, BetRegistry (domain/)
//!     │
//!     ├── Ledger (ledger/)
//!     │
//!     └── PostgreSQL journal (persistence/)
//! ```

pub mod api;
pub mod app;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod persistence;
pub mod service;
pub mod ws;
