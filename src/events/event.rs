//! # Lifecycle events.
//!
//! Every state transition of a worker, plus shutdown and subscriber health,
//! is published as an [`Event`] on the [`Bus`](crate::Bus).
//!
//! Each event carries a process-wide `seq` that only grows; subscribers that
//! receive events through different queues can restore the order with it.
//!
//! ```rust
//! use std::time::Duration;
//! use workervisor::{Event, EventKind, WorkerId};
//!
//! let id = WorkerId::new();
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_worker(id)
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(5));
//!
//! assert_eq!(ev.worker, Some(id));
//! assert_eq!(ev.delay_ms, Some(5_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use crate::runtime::RuntimeKind;
use crate::store::WorkerId;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscribers ===
    /// A subscriber panicked. `reason`: panic payload.
    SubscriberPanicked,
    /// A subscriber queue was full or closed; the event was dropped for it.
    SubscriberOverflow,

    // === Shutdown ===
    /// OS signal observed.
    ShutdownRequested,
    /// Every worker stopped within the grace period.
    AllStoppedWithin,
    /// Grace period ran out. `reason`: ids still alive.
    GraceExceeded,

    // === Worker lifecycle ===
    /// Program refused by the validator. `reason`: rejection.
    ValidationRejected,
    /// Launch attempt begins. `attempt`: 1 for an explicit start, streak + 1 for relaunches.
    WorkerStarting,
    /// Worker passed its readiness check.
    WorkerRunning,
    /// Launch attempt failed. `reason`: launch error.
    LaunchFailed,
    /// Running worker exited. `exit_code` when the child exited normally, `attempt`: streak.
    WorkerCrashed,
    /// Relaunch queued. `delay_ms`, `attempt`: streak.
    RestartScheduled,
    /// Automatic relaunch reached running.
    WorkerRestarted,
    /// Crash ceiling reached; the worker stays stopped.
    RestartExhausted,
    /// Worker stopped on request (stop, shutdown, delete).
    WorkerStopped,
    /// Worker record deleted.
    WorkerRemoved,
}

/// Lifecycle event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    pub seq: u64,
    pub at: SystemTime,
    pub kind: EventKind,

    pub worker: Option<WorkerId>,
    pub runtime: Option<RuntimeKind>,
    pub attempt: Option<u32>,
    pub delay_ms: Option<u32>,
    pub exit_code: Option<i32>,
    pub reason: Option<Arc<str>>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, Ordering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            runtime: None,
            attempt: None,
            delay_ms: None,
            exit_code: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, id: WorkerId) -> Self {
        self.worker = Some(id);
        self
    }

    #[inline]
    pub fn with_runtime(mut self, kind: RuntimeKind) -> Self {
        self.runtime = Some(kind);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Stored as milliseconds, saturating at `u32::MAX`.
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(u32::try_from(d.as_millis()).unwrap_or(u32::MAX));
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn subscriber_overflow(subscriber: &'static str, why: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={why}"))
    }

    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    /// True for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
