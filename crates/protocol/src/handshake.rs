//! Session negotiation record.
//!
//! Before the transport upgrade, the client requests a handshake over
//! HTTP and receives a colon-separated record naming the session token,
//! the heartbeat period, the close timeout, and the transport. The HTTP
//! endpoint itself lives outside this crate; the record it must serve is
//! defined here.

use uuid::Uuid;

use crate::constants::{CLOSE_TIMEOUT_SECS, HEARTBEAT_PERIOD_SECS, TRANSPORT_NAME};

/// A freshly negotiated session.
#[derive(Debug, Clone)]
pub struct Handshake {
    session_token: String,
}

impl Handshake {
    /// Mints a handshake with a random session token.
    pub fn new() -> Self {
        Self {
            session_token: Uuid::new_v4().to_string(),
        }
    }

    /// The session token identifying this negotiation.
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// The record served to the client:
    /// `{token}:{heartbeat_secs}:{close_timeout_secs}:{transport}`.
    pub fn record(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.session_token, HEARTBEAT_PERIOD_SECS, CLOSE_TIMEOUT_SECS, TRANSPORT_NAME
        )
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_has_four_fields() {
        let hs = Handshake::new();
        let record = hs.record();
        let fields: Vec<&str> = record.split(':').collect();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[0], hs.session_token());
        assert_eq!(fields[1], "60");
        assert_eq!(fields[2], "60");
        assert_eq!(fields[3], "websocket");
    }

    #[test]
    fn tokens_are_unique() {
        let a = Handshake::new();
        let b = Handshake::new();
        assert_ne!(a.session_token(), b.session_token());
    }

    #[test]
    fn token_is_not_empty() {
        assert!(!Handshake::new().session_token().is_empty());
    }
}
