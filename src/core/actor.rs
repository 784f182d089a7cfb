//! # WorkerActor: supervision of one worker.
//!
//! One actor task per live worker. It owns the launched [`WorkerProcess`],
//! watches it, and applies the restart policy when it exits on its own.
//!
//! ## State machine
//! ```text
//!              gate opened (handle registered)
//!                         │
//!          ┌──────────► Running ──── token cancelled ───► terminate → release → Stopped
//!          │               │
//!          │        process exited
//!          │               ▼
//!          │            Crashed ── release, error_count += 1, streak = ledger.record()
//!          │               │
//!          │     policy.allows(streak)? ── no ──► give up (RestartExhausted)
//!          │               │ yes
//!          │        sleep backoff.next(streak - 1)   (cancellable)
//!          │               │
//!          │           Starting ── reload record ── gone ──► Orphaned
//!          │               │
//!          │            launch ── error ──► give up (RelaunchFailed)
//!          │               │ ok: restart_count += 1
//!          └───────────────┘
//! ```
//!
//! ## Rules
//! - Every crash bumps `error_count` exactly once; a relaunch that never
//!   becomes ready ends supervision without another bump.
//! - Every exit path releases the process (or drops it, which kills the
//!   group and removes the working directory).
//! - Giving up persists `stopped`, records the reason, publishes, and only
//!   then removes its own registry entry (guarded by generation).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::core::outcome::{ExitReason, OutcomeBoard};
use crate::core::registry::{ActorExit, Phase, WorkerRegistry};
use crate::core::runner::{AttemptEnd, watch_once};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::runtime::{LaunchRequest, Launcher, OutputLog, RuntimeKind, WorkerProcess};
use crate::store::{PersistedStatus, WorkerId, WorkerStore};

/// Collaborators shared by every actor of one supervisor.
pub(crate) struct ActorContext {
    pub(crate) store: Arc<dyn WorkerStore>,
    pub(crate) launcher: Arc<Launcher>,
    pub(crate) registry: Arc<WorkerRegistry>,
    pub(crate) outcomes: Arc<OutcomeBoard>,
    pub(crate) bus: Bus,
    pub(crate) restart: RestartPolicy,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) stop_grace: Duration,
}

pub(crate) struct WorkerActor {
    ctx: Arc<ActorContext>,
    id: WorkerId,
    runtime: RuntimeKind,
    generation: u64,
    output: Arc<OutputLog>,
    phase: watch::Sender<Phase>,
}

impl WorkerActor {
    pub(crate) fn new(
        ctx: Arc<ActorContext>,
        id: WorkerId,
        runtime: RuntimeKind,
        generation: u64,
        output: Arc<OutputLog>,
        phase: watch::Sender<Phase>,
    ) -> Self {
        Self {
            ctx,
            id,
            runtime,
            generation,
            output,
            phase,
        }
    }

    /// Supervises `process` until cancelled or until the restart policy gives up.
    ///
    /// `gate` fires once the handle is registered; if its sender is dropped
    /// instead, registration was abandoned and the process is torn down.
    pub(crate) async fn run(
        self,
        mut process: WorkerProcess,
        token: CancellationToken,
        gate: oneshot::Receiver<()>,
    ) -> ActorExit {
        let registered = tokio::select! {
            res = gate => res.is_ok(),
            _ = token.cancelled() => false,
        };
        if !registered {
            process.terminate(self.ctx.stop_grace).await;
            process.release().await;
            self.phase.send_replace(Phase::Stopped);
            return ActorExit::Cancelled;
        }

        let mut ledger = self.ctx.restart.ledger();

        loop {
            self.phase.send_replace(Phase::Running {
                since: process.started_at(),
                pid: process.pid(),
                streak: ledger.streak(),
            });

            let end = watch_once(&mut process, &token, self.ctx.stop_grace).await;
            let (exit_code, detail) = end.describe();
            process.release().await;

            if let AttemptEnd::Cancelled(termination) = end {
                tracing::debug!(worker = %self.id, ?termination, "worker stopped on request");
                self.phase.send_replace(Phase::Stopped);
                return ActorExit::Cancelled;
            }

            let streak = ledger.record(Instant::now());
            self.publish(
                Event::new(EventKind::WorkerCrashed)
                    .with_attempt(streak)
                    .with_exit_code(exit_code)
                    .with_reason(detail.as_str()),
            );
            if let Err(e) = self.ctx.store.increment_error_count(self.id).await {
                tracing::warn!(worker = %self.id, error = %e, "failed to record crash");
            }

            if !self.ctx.restart.allows(streak) {
                return self
                    .give_up(ExitReason::RestartExhausted {
                        crashes: streak,
                        last: detail,
                    })
                    .await;
            }

            let delay = self.ctx.backoff.next(streak.saturating_sub(1));
            self.phase.send_replace(Phase::Crashed {
                streak,
                retry_in: delay,
            });
            self.publish(
                Event::new(EventKind::RestartScheduled)
                    .with_attempt(streak)
                    .with_delay(delay),
            );

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            tokio::select! {
                _ = &mut sleep => {}
                _ = token.cancelled() => {
                    self.phase.send_replace(Phase::Stopped);
                    return ActorExit::Cancelled;
                }
            }

            let record = match self.ctx.store.get_worker(self.id).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::info!(worker = %self.id, "record removed, supervision ends");
                    self.phase.send_replace(Phase::Stopped);
                    self.ctx.registry.unregister_if(self.id, self.generation).await;
                    return ActorExit::Orphaned;
                }
                Err(e) => {
                    return self
                        .give_up(ExitReason::RelaunchFailed {
                            reason: format!("store unavailable: {e}"),
                        })
                        .await;
                }
            };

            self.phase.send_replace(Phase::Starting { streak });
            self.publish(Event::new(EventKind::WorkerStarting).with_attempt(streak + 1));

            let req = LaunchRequest {
                id: self.id,
                runtime: record.runtime,
                source: &record.source,
                credential: &record.credential,
                output: Arc::clone(&self.output),
            };
            let launched = tokio::select! {
                res = self.ctx.launcher.launch(&req) => Some(res),
                _ = token.cancelled() => None,
            };

            match launched {
                None => {
                    self.phase.send_replace(Phase::Stopped);
                    return ActorExit::Cancelled;
                }
                Some(Ok(next)) => {
                    process = next;
                    if let Err(e) = self.ctx.store.increment_restart_count(self.id).await {
                        tracing::warn!(worker = %self.id, error = %e, "failed to record restart");
                    }
                    self.publish(
                        Event::new(EventKind::WorkerRestarted).with_attempt(streak + 1),
                    );
                }
                Some(Err(e)) => {
                    let reason = e.as_message();
                    self.publish(
                        Event::new(EventKind::LaunchFailed)
                            .with_attempt(streak + 1)
                            .with_reason(reason.as_str()),
                    );
                    return self.give_up(ExitReason::RelaunchFailed { reason }).await;
                }
            }
        }
    }

    async fn give_up(&self, reason: ExitReason) -> ActorExit {
        self.phase.send_replace(Phase::Stopped);

        if let Err(e) = self
            .ctx
            .store
            .update_status(self.id, PersistedStatus::Stopped)
            .await
        {
            tracing::warn!(worker = %self.id, error = %e, "failed to persist stopped status");
        }
        self.ctx
            .outcomes
            .record(self.id, self.generation, reason.clone());

        match &reason {
            ExitReason::RestartExhausted { crashes, last } => self.publish(
                Event::new(EventKind::RestartExhausted)
                    .with_attempt(*crashes)
                    .with_reason(last.as_str()),
            ),
            other => self.publish(
                Event::new(EventKind::WorkerStopped).with_reason(other.as_label()),
            ),
        }

        self.ctx
            .registry
            .unregister_if(self.id, self.generation)
            .await;
        ActorExit::GaveUp(reason)
    }

    fn publish(&self, ev: Event) {
        self.ctx
            .bus
            .publish(ev.with_worker(self.id).with_runtime(self.runtime));
    }
}
