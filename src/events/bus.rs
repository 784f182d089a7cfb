//! # Event bus.
//!
//! ```text
//! publishers (many)                      listener (one per supervisor)
//!   WorkerActor ──┐
//!   Supervisor  ──┼──► Bus (broadcast) ──► Supervisor::subscriber_listener ──► SubscriberSet
//!   SubscriberSet ┘
//! ```
//!
//! `publish` never blocks. Capacity is one ring shared by all receivers; a
//! receiver that falls behind sees `RecvError::Lagged(n)` and skips `n` events.
//! Events published while nobody listens are dropped.

use tokio::sync::broadcast;

use super::event::Event;

#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` (min 1) undelivered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Independent receiver observing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
