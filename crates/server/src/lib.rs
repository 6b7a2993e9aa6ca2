//! WebSocket server engine for the wirebeat real-time messaging protocol.
//!
//! Accepts client connections over WebSocket, acknowledges each with a
//! `Connect` frame, supervises liveness with periodic heartbeats, and
//! dispatches named events to application-registered handler chains. Each
//! connection runs fully isolated: a reader loop, a writer task draining
//! the outbound queue, a heartbeat watchdog, and one task per in-flight
//! event dispatch, all torn down together on any exit path.

mod connection;
mod outbox;
mod router;
mod server;
mod session;

pub use connection::{Connection, ConnectionId, IdGenerator};
pub use outbox::{Outbox, OutboxDrain, SendError, outbox};
pub use router::{Outcome, Router, RouterBuilder};
pub use server::{ServerConfig, SocketServer};
pub use session::SessionError;

/// Capacity of the reader-to-writer control relay (pong replies).
pub(crate) const CONTROL_BUFFER_SIZE: usize = 4;

/// Errors produced by the socket server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
