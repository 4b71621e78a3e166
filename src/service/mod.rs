//! Service layer: round orchestration, remediation and startup recovery.
//!
//! [`RoundEngine`] routes every round operation into the owning round's
//! worker task, [`FailureManager`] tracks and refunds bets that could not
//! be settled, and [`RoundScheduler`] drives rounds when the autopilot is
//! on.

pub mod failure_manager;
pub mod recovery;
pub mod round_engine;
mod round_worker;
pub mod scheduler;

pub use failure_manager::{FailedBetFilter, FailureManager, Refund};
pub use recovery::{RecoveryReport, StoredState, recover};
pub use round_engine::{
    CancelSummary, CloseSummary, EngineDeps, GameRules, PlaceBetRequest, ResolveAction,
    RoundEngine, Settlement,
};
pub use round_worker::RoundHandle;
pub use scheduler::{RoundScheduler, SchedulerTimings};
