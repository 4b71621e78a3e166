//! Domain layer: core types, bet registry, round store and event system.
//!
//! This module contains the server-side domain model: typed identifiers,
//! money vocabulary, the round and bet state machines, the per-round bet
//! registry, the snapshot store backing history queries, the outcome
//! generator and the event bus broadcasting state changes.

pub mod bet;
pub mod bet_registry;
pub mod event_bus;
pub mod failed_bet;
pub mod ids;
pub mod money;
pub mod outcome;
pub mod round;
pub mod round_event;
pub mod round_store;

pub use bet::{Bet, BetStatus, BetTransitionError};
pub use bet_registry::{BetRegistry, RegistryError};
pub use event_bus::EventBus;
pub use failed_bet::{FailedBet, FailedBetStatus};
pub use ids::{AdminId, BetId, ConnectionId, EntryId, FailedBetId, RoundId, UserId};
pub use money::{
    Component, Currency, CurrencyDirectory, OperationGroup, OperationType, StaticCurrencies,
    UnknownCode, payout_for, validate_amount,
};
pub use outcome::{FixedOutcome, HashCrashGenerator, OutcomeError, OutcomeGenerator, RoundSeed};
pub use round::{Round, RoundStatus, RoundTransitionError};
pub use round_event::RoundEvent;
pub use round_store::{RoundRecord, RoundStore};
