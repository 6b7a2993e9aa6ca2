//! Per-connection outbound message queue.
//!
//! Decouples handler and watchdog code from the transport writer: any
//! number of producers enqueue without blocking, one writer task drains
//! in FIFO order. Sealing the queue is idempotent and marks the end of
//! the connection's outbound life: later sends fail, and the drain side
//! finishes once the backlog is consumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Notify, mpsc};

use wirebeat_protocol::Message;

/// Error returned when sending on a sealed or dropped queue.
#[derive(Debug, thiserror::Error)]
#[error("connection closed, message not sent")]
pub struct SendError;

struct Shared {
    sealed: AtomicBool,
    seal_notify: Notify,
}

/// Producer side of the queue. Cloneable and cheap.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
}

/// Consumer side of the queue, owned exclusively by the writer task.
pub struct OutboxDrain {
    rx: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared>,
}

/// Creates a connected producer/consumer pair.
pub fn outbox() -> (Outbox, OutboxDrain) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        sealed: AtomicBool::new(false),
        seal_notify: Notify::new(),
    });
    (
        Outbox {
            tx,
            shared: Arc::clone(&shared),
        },
        OutboxDrain { rx, shared },
    )
}

impl Outbox {
    /// Enqueues a message. Never blocks.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        if self.shared.sealed.load(Ordering::Acquire) {
            return Err(SendError);
        }
        self.tx.send(msg).map_err(|_| SendError)
    }

    /// Seals the queue: later sends fail and the drain finishes once the
    /// backlog is consumed. Idempotent.
    pub fn seal(&self) {
        if !self.shared.sealed.swap(true, Ordering::AcqRel) {
            self.shared.seal_notify.notify_waiters();
        }
    }

    /// Returns `true` if the queue has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.shared.sealed.load(Ordering::Acquire)
    }
}

impl OutboxDrain {
    /// Receives the next queued message in FIFO order.
    ///
    /// Returns `None` once the queue is sealed and drained, or when every
    /// producer has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            // Queued messages are handed out before the seal is honored.
            match self.rx.try_recv() {
                Ok(msg) => return Some(msg),
                Err(mpsc::error::TryRecvError::Disconnected) => return None,
                Err(mpsc::error::TryRecvError::Empty) => {}
            }

            // Register for the seal notification before re-checking the
            // flag, so a concurrent seal cannot slip between the two.
            let sealed = self.shared.seal_notify.notified();
            if self.shared.sealed.load(Ordering::Acquire) {
                return None;
            }

            tokio::select! {
                _ = sealed => {}
                msg = self.rx.recv() => return msg,
            }
        }
    }
}
