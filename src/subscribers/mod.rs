//! # Event subscribers
//!
//! ```text
//! WorkerActor ── publish ──► Bus ──► listener ──► SubscriberSet
//!                                                   ├─► LogWriter
//!                                                   └─► your notifier
//! ```
//!
//! Implement [`Subscribe`] and hand it to
//! [`SupervisorBuilder::with_subscribers`](crate::SupervisorBuilder::with_subscribers).

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
