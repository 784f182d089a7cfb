//! # LogWriter: bus events as `tracing` events
//!
//! Failures and give-ups are logged at `warn`, the rest of the lifecycle at
//! `info`, subscriber trouble at `error`.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

#[derive(Default, Debug, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker.map(|w| w.to_string()).unwrap_or_default();
        let runtime = e.runtime.map(|r| r.as_str()).unwrap_or("");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::ShutdownRequested => tracing::info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => tracing::info!(seq = e.seq, "all workers stopped within grace"),
            EventKind::GraceExceeded => {
                tracing::warn!(seq = e.seq, stuck = reason, "shutdown grace exceeded")
            }
            EventKind::ValidationRejected => {
                tracing::info!(seq = e.seq, worker = %worker, runtime, reason, "program rejected")
            }
            EventKind::WorkerStarting => {
                tracing::info!(seq = e.seq, worker = %worker, runtime, attempt = e.attempt, "worker starting")
            }
            EventKind::WorkerRunning => {
                tracing::info!(seq = e.seq, worker = %worker, runtime, "worker running")
            }
            EventKind::LaunchFailed => {
                tracing::warn!(seq = e.seq, worker = %worker, runtime, reason, "launch failed")
            }
            EventKind::WorkerCrashed => tracing::warn!(
                seq = e.seq,
                worker = %worker,
                runtime,
                exit_code = e.exit_code,
                streak = e.attempt,
                reason,
                "worker crashed"
            ),
            EventKind::RestartScheduled => tracing::info!(
                seq = e.seq,
                worker = %worker,
                delay_ms = e.delay_ms,
                streak = e.attempt,
                "relaunch scheduled"
            ),
            EventKind::WorkerRestarted => {
                tracing::info!(seq = e.seq, worker = %worker, runtime, "worker relaunched")
            }
            EventKind::RestartExhausted => tracing::warn!(
                seq = e.seq,
                worker = %worker,
                runtime,
                crashes = e.attempt,
                reason,
                "restart ceiling reached, worker left stopped"
            ),
            EventKind::WorkerStopped => {
                tracing::info!(seq = e.seq, worker = %worker, reason, "worker stopped")
            }
            EventKind::WorkerRemoved => tracing::info!(seq = e.seq, worker = %worker, "worker removed"),
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::error!(seq = e.seq, kind = ?e.kind, reason, "subscriber trouble")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
