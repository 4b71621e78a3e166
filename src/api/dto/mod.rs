//! Data Transfer Objects for REST request/response serialization.
//!
//! All money amounts and multipliers are serialized as JSON strings to
//! prevent precision loss.

pub mod account_dto;
pub mod admin_dto;
pub mod bet_dto;
pub mod common_dto;
pub mod round_dto;

pub use account_dto::*;
pub use admin_dto::*;
pub use bet_dto::*;
pub use common_dto::*;
pub use round_dto::*;
