use std::time::Duration;

/// Heartbeat period advertised in the handshake record, in seconds.
pub const HEARTBEAT_PERIOD_SECS: u64 = 60;

/// Interval within which a client must acknowledge a heartbeat probe.
///
/// The server sends a heartbeat, waits up to this long for the client's
/// reply, and idles for half of it between acknowledged probes. A probe
/// that goes unanswered for the full period ends the session.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(HEARTBEAT_PERIOD_SECS);

/// Connection close timeout advertised in the handshake record, in seconds.
pub const CLOSE_TIMEOUT_SECS: u64 = 60;

/// Transport name advertised in the handshake record.
pub const TRANSPORT_NAME: &str = "websocket";
