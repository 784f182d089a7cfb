//! # Subscriber trait
//!
//! Each subscriber gets its own bounded queue and worker task inside the
//! [`SubscriberSet`](crate::SubscriberSet), so a slow notifier (a chat message
//! to the worker's owner, an HTTP hook) never holds up the actors or other
//! subscribers.
//!
//! ```rust
//! use workervisor::{Event, EventKind, Subscribe};
//!
//! struct NotifyOwner;
//!
//! #[async_trait::async_trait]
//! impl Subscribe for NotifyOwner {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::RestartExhausted {
//!             // look up the owner of ev.worker and tell them
//!         }
//!     }
//!     fn name(&self) -> &'static str { "notify-owner" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    async fn on_event(&self, event: &Event);

    /// Name used in logs and overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity; events beyond it are dropped for this subscriber.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
