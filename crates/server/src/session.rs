//! Per-connection session lifecycle.
//!
//! One session owns one upgraded WebSocket connection and runs it from
//! handshake acknowledgment to teardown: a writer task drains the outbox
//! to the transport, a heartbeat watchdog supervises client liveness, and
//! the session's own read loop parses inbound frames and fans event
//! dispatches out as independent tasks. Every exit path (graceful
//! disconnect, transport close, heartbeat timeout, protocol violation)
//! converges on the same teardown: cancel the writer and watchdog, seal
//! the outbox, await in-flight dispatches, then run the disconnect chain
//! exactly once.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use wirebeat_protocol::Message;

use crate::CONTROL_BUFFER_SIZE;
use crate::connection::Connection;
use crate::outbox::OutboxDrain;
use crate::router::Router;

/// Fatal session failures, reported to the session's owner after the
/// disconnect chain has run.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The inbound stream carried a frame this engine cannot accept.
    /// The read loop cannot safely continue on an un-parseable stream.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The client failed to acknowledge a heartbeat within the period.
    #[error("heartbeat timed out, client presumed dead")]
    HeartbeatTimeout,

    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
}

/// Runs one connection from accept to teardown.
///
/// The routing table must be frozen before this is called; it is the
/// only thing the read loop consults for inbound events. Returns `Ok`
/// for graceful endings (client `Disconnect` frame, clean close, owner
/// cancellation) and the fatal fault otherwise. The disconnect chain has
/// run by the time this returns, in both cases.
pub(crate) async fn run_session<S>(
    ws: S,
    conn: Connection,
    drain: OutboxDrain,
    router: Arc<Router>,
    heartbeat_period: Duration,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Send
        + 'static,
{
    let (ws_sink, mut ws_stream) = ws.split();
    let scope = cancel.child_token();

    // Handshake acknowledgment goes out ahead of anything else; the
    // outbox is FIFO and the watchdog has not started yet.
    let _ = conn.send(Message::Connect);

    // Faults raised by the writer or the watchdog.
    let (fault_tx, mut fault_rx) = mpsc::channel::<SessionError>(2);
    // Pong replies relayed from the reader to the writer.
    let (ctrl_tx, ctrl_rx) = mpsc::channel::<WsMessage>(CONTROL_BUFFER_SIZE);
    // Single-slot heartbeat acknowledgment rendezvous.
    let (ack_tx, ack_rx) = mpsc::channel::<()>(1);

    let writer = tokio::spawn(write_loop(
        ws_sink,
        drain,
        ctrl_rx,
        scope.clone(),
        fault_tx.clone(),
    ));
    let watchdog = tokio::spawn(heartbeat_watchdog(
        conn.clone(),
        ack_rx,
        heartbeat_period,
        scope.clone(),
        fault_tx,
    ));

    let mut dispatches = JoinSet::new();
    let mut outcome: Result<(), SessionError> = Ok(());

    loop {
        tokio::select! {
            _ = scope.cancelled() => {
                debug!(id = %conn.id(), "session cancelled");
                break;
            }

            Some(fault) = fault_rx.recv() => {
                outcome = Err(fault);
                break;
            }

            // Reap finished dispatches so a faulted handler is observed
            // without affecting the read loop.
            Some(result) = dispatches.join_next(), if !dispatches.is_empty() => {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!(id = %conn.id(), "event handler panicked: {e}");
                    }
                }
            }

            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match Message::decode(&text) {
                        Some(Message::Heartbeat) => {
                            trace!(id = %conn.id(), "heartbeat reply");
                            // A reply arriving while the watchdog is not
                            // waiting is dropped, never blocks the reader.
                            let _ = ack_tx.try_send(());
                        }
                        Some(Message::Disconnect) => {
                            debug!(id = %conn.id(), "client sent disconnect");
                            break;
                        }
                        Some(Message::Event { name, args }) => {
                            trace!(id = %conn.id(), %name, "dispatching event");
                            let router = Arc::clone(&router);
                            let conn = conn.clone();
                            dispatches.spawn(async move {
                                router.dispatch(conn, &name, args).await;
                            });
                        }
                        Some(other) => {
                            outcome = Err(SessionError::Protocol(format!(
                                "unexpected {other:?} frame from client"
                            )));
                            break;
                        }
                        None => {
                            let preview: String = text.chars().take(32).collect();
                            outcome = Err(SessionError::Protocol(format!(
                                "unparseable frame: {preview:?}"
                            )));
                            break;
                        }
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ctrl_tx.try_send(WsMessage::Pong(payload));
                    }
                    Some(Ok(WsMessage::Pong(_))) => {}
                    Some(Ok(WsMessage::Close(_))) => {
                        debug!(id = %conn.id(), "received close frame");
                        break;
                    }
                    Some(Ok(frame)) => {
                        outcome = Err(SessionError::Protocol(format!(
                            "unexpected transport frame: {}",
                            frame_kind(&frame)
                        )));
                        break;
                    }
                    Some(Err(e)) => {
                        outcome = Err(SessionError::Transport(e));
                        break;
                    }
                    None => {
                        debug!(id = %conn.id(), "stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Teardown, uniform regardless of which trigger fired.
    scope.cancel();
    conn.seal();
    dispatches.shutdown().await;
    let _ = writer.await;
    let _ = watchdog.await;

    router.run_disconnect(conn.clone()).await;

    match &outcome {
        Ok(()) => info!(id = %conn.id(), "session closed"),
        Err(e) => warn!(id = %conn.id(), "session failed: {e}"),
    }
    outcome
}

fn frame_kind(frame: &WsMessage) -> &'static str {
    match frame {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "raw",
    }
}

/// Writer task: drains the outbox FIFO onto the transport, interleaving
/// pong control replies handed over by the reader.
async fn write_loop<S>(
    mut sink: S,
    mut drain: OutboxDrain,
    mut ctrl_rx: mpsc::Receiver<WsMessage>,
    cancel: CancellationToken,
    faults: mpsc::Sender<SessionError>,
) where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = drain.recv() => {
                match msg {
                    Some(msg) => match msg.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                                error!("write error: {e}");
                                let _ = faults.try_send(SessionError::Transport(e));
                                break;
                            }
                        }
                        // Reserved variants are never produced internally.
                        Err(e) => error!("dropping unencodable message: {e}"),
                    },
                    None => break, // Sealed and drained.
                }
            }

            ctrl = ctrl_rx.recv() => {
                match ctrl {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            error!("write error: {e}");
                            let _ = faults.try_send(SessionError::Transport(e));
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Best-effort close handshake.
    let _ = sink.close().await;
}

/// Heartbeat watchdog: probes the client and supervises the reply.
///
/// Sends a heartbeat, waits up to `period` for the reader's
/// acknowledgment signal, then idles half the period before the next
/// probe. An unanswered probe is fatal for the whole session.
async fn heartbeat_watchdog(
    conn: Connection,
    mut ack_rx: mpsc::Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
    faults: mpsc::Sender<SessionError>,
) {
    loop {
        if conn.send(Message::Heartbeat).is_err() {
            break; // Outbox sealed, the session is tearing down.
        }

        tokio::select! {
            _ = cancel.cancelled() => break,

            ack = ack_rx.recv() => {
                match ack {
                    Some(()) => {
                        trace!(id = %conn.id(), "heartbeat acknowledged");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(period / 2) => {}
                        }
                    }
                    None => break, // Reader gone.
                }
            }

            _ = tokio::time::sleep(period) => {
                warn!(id = %conn.id(), "heartbeat unacknowledged");
                let _ = faults.try_send(SessionError::HeartbeatTimeout);
                break;
            }
        }
    }
}
