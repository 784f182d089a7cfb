//! Restart and backoff policies.
//!
//! - [`RestartPolicy`] whether a crashed worker is relaunched (crash ceiling, optional window)
//! - [`CrashLedger`]   per-actor crash streak bookkeeping
//! - [`BackoffPolicy`] delay before a relaunch (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so mass crashes don't relaunch in lockstep
//!
//! ```text
//! Config { restart, backoff }
//!      └─► core::actor::WorkerActor on every crash:
//!           streak = ledger.record(now)
//!           restart.allows(streak) ? sleep(backoff.next(streak - 1)) : give up
//! ```
//!
//! Defaults: ceiling 5 over the actor's lifetime, constant 5s delay, no jitter.

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::{CrashLedger, RestartPolicy, DEFAULT_RESTART_CEILING};
