//! Streaming layer: the broadcast hub and its WebSocket endpoint.
//!
//! Clients connect to `/ws`, subscribe to rounds with
//! `{"command":"subscribe","round_ids":["*"]}` and receive `round_state`
//! snapshots; identified players also receive `cashout`, `crash` and
//! `refund` messages for their own bets.

pub mod connection;
pub mod handler;
pub mod hub;
pub mod messages;
pub mod subscription;

pub use hub::BroadcastHub;
pub use messages::{ClientCommand, ServerMessage};
