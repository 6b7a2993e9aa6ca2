//! Event routing: named handler chains plus disconnect callbacks.
//!
//! The application registers handlers against a [`RouterBuilder`] before
//! a connection starts processing; [`RouterBuilder::build`] freezes the
//! table into an immutable [`Router`] snapshot that concurrent dispatch
//! reads without locking. Registering the same event name twice composes:
//! the newer handler is tried first and the chain falls back to older
//! registrations when one declines the payload.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::connection::Connection;

/// Whether a registered handler accepted an event's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Declined,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type EventFn = Arc<dyn Fn(Connection, Arc<[Value]>) -> BoxFuture<Outcome> + Send + Sync>;
type DisconnectFn = Arc<dyn Fn(Connection) -> BoxFuture<()> + Send + Sync>;

/// Accumulates registrations for one connection's routing table.
#[derive(Default)]
pub struct RouterBuilder {
    events: HashMap<String, Vec<EventFn>>,
    disconnect: Vec<DisconnectFn>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed handler for `event`.
    ///
    /// The handler runs only when the payload is exactly one JSON value
    /// that deserializes into `T`; otherwise this registration declines
    /// and the previous one for the same name is tried.
    pub fn on<T, F, Fut>(&mut self, event: impl Into<String>, handler: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Connection, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: EventFn = Arc::new(move |conn, args| {
            let payload = match args.as_ref() {
                [value] => serde_json::from_value::<T>(value.clone()).ok(),
                _ => None,
            };
            match payload {
                Some(payload) => {
                    let fut = handler(conn, payload);
                    Box::pin(async move {
                        fut.await;
                        Outcome::Handled
                    })
                }
                None => Box::pin(async { Outcome::Declined }),
            }
        });
        self.events.entry(event.into()).or_default().push(wrapped);
        self
    }

    /// Registers a handler for `event` that ignores the payload and
    /// always accepts.
    pub fn on_plain<F, Fut>(&mut self, event: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: EventFn = Arc::new(move |conn, _args| {
            let fut = handler(conn);
            Box::pin(async move {
                fut.await;
                Outcome::Handled
            })
        });
        self.events.entry(event.into()).or_default().push(wrapped);
        self
    }

    /// Appends a disconnect callback, run after any appended earlier.
    pub fn on_disconnect<F, Fut>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disconnect
            .push(Arc::new(move |conn| Box::pin(callback(conn))));
        self
    }

    /// Freezes the registrations into an immutable snapshot.
    pub fn build(self) -> Router {
        Router {
            events: self.events,
            disconnect: self.disconnect,
        }
    }
}

/// Immutable per-connection routing table.
pub struct Router {
    events: HashMap<String, Vec<EventFn>>,
    disconnect: Vec<DisconnectFn>,
}

impl Router {
    /// Dispatches a named event against the handler chain.
    ///
    /// Unknown events are silently ignored. Known events run the chain
    /// newest-first until a registration accepts the payload.
    pub async fn dispatch(&self, conn: Connection, event: &str, args: Vec<Value>) {
        let Some(chain) = self.events.get(event) else {
            trace!(%event, "no handler registered, ignoring");
            return;
        };

        let args: Arc<[Value]> = args.into();
        for handler in chain.iter().rev() {
            if handler(conn.clone(), Arc::clone(&args)).await == Outcome::Handled {
                return;
            }
        }
        trace!(%event, "all handlers declined");
    }

    /// Runs the disconnect chain, oldest registration first.
    pub async fn run_disconnect(&self, conn: Connection) {
        for callback in &self.disconnect {
            callback(conn.clone()).await;
        }
    }
}
