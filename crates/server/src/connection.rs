//! Connection handles and id minting.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use wirebeat_protocol::Message;

use crate::outbox::{Outbox, SendError};

/// Opaque process-wide-unique token for one accepted connection.
///
/// Used only for equality and ordering of [`Connection`] handles, never
/// for addressing across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Mints [`ConnectionId`]s. Owned by the server; no hidden process-wide
/// counter.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the next id. Ids are unique per generator.
    pub fn mint(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Handle to one live connection.
///
/// Exposed to event handlers as the sole capability for sending messages
/// and identifying the session. Cloneable; every concurrently-running
/// handler invocation for the connection shares it. Sends fail once the
/// session has sealed its outbound queue.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    outbox: Outbox,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self { id, outbox }
    }

    /// The connection's unique id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueues a message for the writer task. Never blocks.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        self.outbox.send(msg)
    }

    /// Returns `true` while the connection can still accept sends.
    pub fn is_open(&self) -> bool {
        !self.outbox.is_sealed()
    }

    /// Seals the outbound queue at teardown.
    pub(crate) fn seal(&self) {
        self.outbox.seal();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::outbox;

    #[test]
    fn generator_mints_unique_ids() {
        let ids = IdGenerator::new();
        let a = ids.mint();
        let b = ids.mint();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn id_display() {
        let ids = IdGenerator::new();
        assert_eq!(ids.mint().to_string(), "conn-0");
        assert_eq!(ids.mint().to_string(), "conn-1");
    }

    #[tokio::test]
    async fn send_reaches_the_drain() {
        let (tx, mut rx) = outbox();
        let conn = Connection::new(IdGenerator::new().mint(), tx);

        conn.send(Message::Heartbeat).unwrap();
        assert_eq!(rx.recv().await, Some(Message::Heartbeat));
    }

    #[tokio::test]
    async fn send_fails_once_sealed() {
        let (tx, _rx) = outbox();
        let conn = Connection::new(IdGenerator::new().mint(), tx);

        assert!(conn.is_open());
        conn.seal();
        assert!(!conn.is_open());
        assert!(conn.send(Message::Heartbeat).is_err());
    }

    #[test]
    fn clones_share_the_same_id() {
        let (tx, _rx) = outbox();
        let conn = Connection::new(IdGenerator::new().mint(), tx);
        assert_eq!(conn.id(), conn.clone().id());
    }
}
