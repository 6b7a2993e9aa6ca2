//! Wire protocol for the wirebeat real-time messaging server.
//!
//! Defines the legacy colon-delimited frame format exchanged over a
//! WebSocket connection, the handshake record served during session
//! negotiation, and the protocol timing constants.

pub mod constants;
pub mod frame;
pub mod handshake;

// Re-export primary types for convenience.
pub use constants::{CLOSE_TIMEOUT_SECS, HEARTBEAT_PERIOD, HEARTBEAT_PERIOD_SECS, TRANSPORT_NAME};
pub use frame::{EncodeError, Message};
pub use handshake::Handshake;
