//! Lifecycle events and the broadcast bus that carries them.
//!
//! - **Publishers**: `WorkerActor` (crash / relaunch / give-up), `Supervisor`
//!   (start / stop / validation / shutdown), `SubscriberSet` (overflow, panic).
//! - **Consumer**: the supervisor's listener task, which fans out to the
//!   configured [`Subscribe`](crate::Subscribe) implementations.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
