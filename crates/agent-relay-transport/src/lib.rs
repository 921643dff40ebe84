//! Client-facing transport for the agent relay.
//!
//! Provides:
//! - Wire protocol (`type`-tagged JSON)
//! - Message dispatch onto the queue, agent monitor and delegation supervisor
//! - WebSocket transport with event replay (feature: websocket)

pub mod handler;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use handler::{RelayState, handle_message};
pub use protocol::{ClientMessage, ServerMessage};
