use std::sync::Arc;
use tokio::sync::{mpsc::{self, error::TrySendError}, Notify};

use crate::models::ServerEvent;

/// What happened to an event pushed into an outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full and the event was ephemeral; it was discarded.
    Dropped,
    /// Queue full and the event mattered; the connection must go.
    Overflowed,
    /// The receiving side is already gone.
    Closed,
}

/// Bounded queue of events waiting to be written to one connection.
/// Pushing never waits.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Arc<ServerEvent>>,
    evicted: Arc<Notify>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Outbox, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbox = Outbox {
            tx,
            evicted: Arc::new(Notify::new()),
        };
        (outbox, rx)
    }

    /// Fires once the router has thrown this connection out. The socket task
    /// must stop on it: a writer stuck on a stalled client never notices the
    /// queue going away by itself.
    pub fn eviction_signal(&self) -> Arc<Notify> {
        self.evicted.clone()
    }

    pub fn evict(&self) {
        // notify_one keeps a permit, so a task that starts waiting later still wakes.
        self.evicted.notify_one();
    }

    pub fn push(&self, event: Arc<ServerEvent>) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(event)) if event.is_ephemeral() => Delivery::Dropped,
            Err(TrySendError::Full(_)) => Delivery::Overflowed,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
