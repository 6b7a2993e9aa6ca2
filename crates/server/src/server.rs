//! Accepting WebSocket server.
//!
//! Listens on a TCP port, upgrades incoming connections to WebSocket,
//! and runs one isolated session per client. The application supplies a
//! registration closure that populates each connection's routing table
//! before the session starts processing frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async;
use tokio_util::sync::CancellationToken;

use wirebeat_protocol::constants::HEARTBEAT_PERIOD;

use crate::ServerError;
use crate::connection::{Connection, IdGenerator};
use crate::outbox::outbox;
use crate::router::RouterBuilder;
use crate::session::run_session;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Heartbeat acknowledgment window. Defaults to the protocol's
    /// advertised period; tests and embedders may tighten it.
    pub heartbeat_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            heartbeat_period: HEARTBEAT_PERIOD,
        }
    }
}

type Setup = dyn Fn(&mut RouterBuilder) + Send + Sync;

/// The accepting WebSocket server.
///
/// Each accepted client gets its own routing table snapshot, outbound
/// queue, and session tasks; connections never share state.
pub struct SocketServer {
    config: ServerConfig,
    setup: Arc<Setup>,
    ids: IdGenerator,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl SocketServer {
    /// Creates a new server.
    ///
    /// `setup` is the application's registration sequence; it runs once
    /// per accepted connection against an empty [`RouterBuilder`], and
    /// the resulting table is frozen before the first frame is handled.
    pub fn new(config: ServerConfig, setup: impl Fn(&mut RouterBuilder) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            config,
            setup: Arc::new(setup),
            ids: IdGenerator::new(),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and every live session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and runs its session to completion.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let ws_stream = accept_async(stream).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        // The routing table is frozen before any frame is dispatched.
        let mut routes = RouterBuilder::new();
        (self.setup)(&mut routes);
        let router = Arc::new(routes.build());

        let (tx, rx) = outbox();
        let conn = Connection::new(self.ids.mint(), tx);

        run_session(
            ws_stream,
            conn,
            rx,
            router,
            self.config.heartbeat_period,
            self.cancel.child_token(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
    use wirebeat_protocol::Message;

    async fn connect(port: u16) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        let url = format!("ws://127.0.0.1:{port}");
        let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        ws
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.expect("stream open").expect("read frame") {
                WsMessage::Text(t) => return t.as_str().to_string(),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let server = SocketServer::new(ServerConfig::default(), |_routes| {});
        let server2 = Arc::clone(&server);

        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let port = server.port().await;
        assert!(port > 0, "should have bound to a dynamic port");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn acknowledges_each_accepted_client() {
        let server = SocketServer::new(ServerConfig::default(), |_routes| {});
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;

        // Sessions are isolated: every client gets its own handshake ack.
        let mut ws1 = connect(port).await;
        let mut ws2 = connect(port).await;
        assert_eq!(next_text(&mut ws1).await, "1::");
        assert_eq!(next_text(&mut ws2).await, "1::");

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn end_to_end_ping_pong_and_disconnect() {
        let fired = Arc::new(StdMutex::new(0));
        let fired2 = Arc::clone(&fired);

        let server = SocketServer::new(ServerConfig::default(), move |routes| {
            routes.on_plain("ping", |conn| async move {
                let _ = conn.send(Message::event("pong", vec![json!(1)]));
            });
            let fired = Arc::clone(&fired2);
            routes.on_disconnect(move |_conn| {
                let fired = Arc::clone(&fired);
                async move {
                    *fired.lock().unwrap() += 1;
                }
            });
        });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;
        let mut ws = connect(port).await;

        assert_eq!(next_text(&mut ws).await, "1::");

        ws.send(WsMessage::Text(
            r#"5:::{"name":"ping","args":[]}"#.to_string().into(),
        ))
        .await
        .unwrap();

        // The writer interleaves heartbeat probes; skip them.
        let reply = loop {
            let text = next_text(&mut ws).await;
            if text != "2::" {
                break text;
            }
        };
        assert_eq!(reply, r#"5:::{"name":"pong","args":[1]}"#);

        ws.send(WsMessage::Text("0::".to_string().into()))
            .await
            .unwrap();

        // Give the session time to tear down.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*fired.lock().unwrap(), 1);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_tears_down_live_sessions() {
        let server = SocketServer::new(ServerConfig::default(), |_routes| {});
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;
        let mut ws = connect(port).await;
        assert_eq!(next_text(&mut ws).await, "1::");

        server.shutdown();
        handle.await.unwrap();

        // The server side closes; the client eventually sees the stream end.
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => continue,
            }
        }
    }

    #[tokio::test]
    async fn fresh_routing_table_per_connection() {
        // The setup closure runs once per accepted connection.
        let builds = Arc::new(StdMutex::new(0));
        let builds2 = Arc::clone(&builds);

        let server = SocketServer::new(ServerConfig::default(), move |_routes| {
            *builds2.lock().unwrap() += 1;
        });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;

        let mut ws1 = connect(port).await;
        let mut ws2 = connect(port).await;
        assert_eq!(next_text(&mut ws1).await, "1::");
        assert_eq!(next_text(&mut ws2).await, "1::");

        assert_eq!(*builds.lock().unwrap(), 2);

        server.shutdown();
        handle.await.unwrap();
    }
}
