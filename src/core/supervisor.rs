//! # Supervisor: the lifecycle API.
//!
//! The [`Supervisor`] owns the bus, the subscriber set, the registry and the
//! launcher. Each lifecycle call takes the per-id lock, so calls on the same
//! worker are serialized while calls on different workers run freely.
//!
//! ## Architecture
//! ```text
//! create / edit / start / stop / restart / delete      (per-id lock)
//!        │
//!        ├─► Validator::validate          (skipped if the source fingerprint is unchanged)
//!        ├─► Launcher::launch ──► WorkerProcess
//!        ├─► tokio::spawn(WorkerActor::run(process, token, gate))
//!        ├─► WorkerRegistry::register(id, handle)   → superseded handle released
//!        ├─► gate.send(())                          → actor starts watching
//!        └─► WorkerStore::update_status(Running)
//!
//! Event flow:
//!   WorkerActor / Supervisor ── publish ──► Bus ──► listener ──► SubscriberSet::emit
//!
//! Shutdown:
//!   wait_for_shutdown_signal() ─► ShutdownRequested
//!                              ─► stop_all() within cfg.grace
//!                                   ├─ done    → AllStoppedWithin
//!                                   └─ timeout → GraceExceeded (+ RuntimeError)
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use workervisor::{Config, Credential, NewWorker, OwnerId, RuntimeKind, Supervisor};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(Config::default()).build();
//!
//!     let record = sup
//!         .create(NewWorker {
//!             owner: OwnerId(42),
//!             runtime: RuntimeKind::Shell,
//!             source: "while true; do sleep 1; done".into(),
//!             credential: Credential::new("123456:secret-token-value"),
//!         })
//!         .await?;
//!
//!     println!("{:?}", sup.status(record.id).await?.state);
//!     sup.stop(record.id).await?;
//!     Ok(())
//! }
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::core::actor::{ActorContext, WorkerActor};
use crate::core::builder::SupervisorBuilder;
use crate::core::locks::KeyedLocks;
use crate::core::outcome::{ExitReason, OutcomeBoard};
use crate::core::registry::{ExecutionHandle, Liveness, Phase, Released, WorkerRegistry};
use crate::core::shutdown;
use crate::core::status::{HealthReport, ResumeReport, StopAllReport, WorkerState, WorkerStatus};
use crate::core::Config;
use crate::credential::{Credential, CredentialVerifier};
use crate::error::{RuntimeError, SupervisorError};
use crate::events::{Bus, Event, EventKind};
use crate::runtime::{LaunchRequest, Launcher, OutputLog, RuntimeKind, Sandbox, Validator};
use crate::store::{OwnerId, PersistedStatus, StoreError, WorkerId, WorkerRecord, WorkerStore};
use crate::subscribers::SubscriberSet;

/// Extra time granted to an actor beyond `stop_grace` to release its process.
const RELEASE_MARGIN: Duration = Duration::from_secs(5);

/// A worker submission from the intake collaborator.
#[derive(Debug, Clone)]
pub struct NewWorker {
    pub owner: OwnerId,
    pub runtime: RuntimeKind,
    pub source: String,
    pub credential: Credential,
}

pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    store: Arc<dyn WorkerStore>,
    verifier: Arc<dyn CredentialVerifier>,
    validator: Validator,
    registry: Arc<WorkerRegistry>,
    outcomes: Arc<OutcomeBoard>,
    actors: Arc<ActorContext>,
    locks: KeyedLocks,
    generations: AtomicU64,
    /// Fingerprint of the last source that launched successfully, per worker.
    validated: Mutex<HashMap<WorkerId, u64>>,
    outputs: Mutex<HashMap<WorkerId, Arc<OutputLog>>>,
}

impl Supervisor {
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        store: Arc<dyn WorkerStore>,
        verifier: Arc<dyn CredentialVerifier>,
        sandbox: Arc<dyn Sandbox>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        let launcher = Arc::new(Launcher::new(&cfg, sandbox));
        let outcomes = Arc::new(OutcomeBoard::new());
        let actors = Arc::new(ActorContext {
            store: Arc::clone(&store),
            launcher,
            registry: Arc::clone(&registry),
            outcomes: Arc::clone(&outcomes),
            bus: bus.clone(),
            restart: cfg.restart,
            backoff: cfg.backoff,
            stop_grace: cfg.stop_grace,
        });
        Self {
            validator: Validator::new(cfg.runtime_table(), cfg.check_timeout),
            cfg,
            bus,
            subs,
            store,
            verifier,
            registry,
            outcomes,
            actors,
            locks: KeyedLocks::new(),
            generations: AtomicU64::new(0),
            validated: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
        }
    }

    /// Forwards bus events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Raw bus receiver, for callers that want to react to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Verifies, validates, persists and starts a new worker.
    ///
    /// A launch failure removes the record again, so a worker that never ran
    /// does not linger as `stopped`.
    pub async fn create(&self, new: NewWorker) -> Result<WorkerRecord, SupervisorError> {
        if let Some(limit) = self.cfg.owner_quota() {
            let owned = self.store.list_by_owner(new.owner).await?.len();
            if owned >= limit {
                return Err(SupervisorError::QuotaExceeded {
                    owner: new.owner,
                    limit,
                });
            }
        }

        let identity = self.verifier.verify(&new.credential).await?;
        self.validate(None, new.runtime, &new.source).await?;

        let record = WorkerRecord::new(new.owner, new.runtime, new.source, new.credential)
            .with_identity(identity);
        let id = record.id;
        self.store.save_worker(&record).await?;
        tracing::info!(worker = %id, owner = %record.owner, runtime = %record.runtime, "worker created");

        let started = {
            let _guard = self.locks.lock(id).await;
            self.spawn_worker(&record).await
        };
        if let Err(e) = started {
            if let Err(store_err) = self.store.delete_worker(id).await {
                tracing::warn!(worker = %id, error = %store_err, "failed to roll back worker record");
            }
            self.forget(id);
            return Err(e);
        }

        Ok(self.store.get_worker(id).await?.unwrap_or(record))
    }

    /// Starts the worker, replacing any live instance.
    pub async fn start(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        self.start_locked(id).await
    }

    /// Stops the worker and persists `stopped`. Stopping a stopped worker is a no-op.
    pub async fn stop(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        self.stop_locked(id, ExitReason::UserStopped, true).await?;
        Ok(())
    }

    /// Stop, wait `restart_delay`, start; counts as a restart.
    pub async fn restart(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        self.stop_locked(id, ExitReason::UserStopped, true).await?;
        tokio::time::sleep(self.cfg.restart_delay).await;
        self.start_locked(id).await?;
        self.store.increment_restart_count(id).await?;
        Ok(())
    }

    /// Replaces the source and relaunches with it.
    pub async fn edit(&self, id: WorkerId, source: &str) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        let mut record = self
            .store
            .get_worker(id)
            .await?
            .ok_or(SupervisorError::NotFound(id))?;

        self.validate(Some(id), record.runtime, source).await?;
        self.store.update_source(id, source).await?;
        record.set_source(source);

        self.stop_locked(id, ExitReason::UserStopped, false).await?;
        self.spawn_worker(&record).await
    }

    /// Stops the worker and removes its record.
    pub async fn delete(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let _guard = self.locks.lock(id).await;
        let released = self.stop_locked(id, ExitReason::UserStopped, false).await?;
        let existed = self.store.get_worker(id).await?.is_some();
        if !existed && !released {
            return Err(SupervisorError::NotFound(id));
        }
        self.store.delete_worker(id).await?;
        self.forget(id);
        self.bus
            .publish(Event::new(EventKind::WorkerRemoved).with_worker(id));
        Ok(())
    }

    /// Starts every worker the store remembers as running.
    pub async fn resume(&self) -> Result<ResumeReport, SupervisorError> {
        let mut report = ResumeReport::default();
        for record in self.store.list_running().await? {
            match self.start(record.id).await {
                Ok(()) => report.started.push(record.id),
                Err(e) => {
                    tracing::warn!(worker = %record.id, error = %e, "failed to resume worker");
                    report.failed.push((record.id, e));
                }
            }
        }
        Ok(report)
    }

    pub async fn status(&self, id: WorkerId) -> Result<WorkerStatus, SupervisorError> {
        let record = self
            .store
            .get_worker(id)
            .await?
            .ok_or(SupervisorError::NotFound(id))?;
        let info = self.registry.lookup(id).await;

        let (state, uptime, pid, crash_streak) = match info.map(|i| i.phase) {
            Some(Phase::Running { since, pid, streak }) => {
                (WorkerState::Running, since.elapsed(), pid, streak)
            }
            Some(phase) => (WorkerState::from(&phase), Duration::ZERO, None, phase.streak()),
            None => (WorkerState::Stopped, Duration::ZERO, None, 0),
        };

        Ok(WorkerStatus {
            id,
            runtime: record.runtime,
            state,
            persisted: record.status,
            uptime,
            pid,
            last_exit: self.outcomes.get(id),
            crash_streak,
            error_count: record.error_count,
            restart_count: record.restart_count,
            last_restart_at: record.last_restart_at,
        })
    }

    /// Workers of one owner, as persisted.
    pub async fn list(&self, owner: OwnerId) -> Result<Vec<WorkerRecord>, SupervisorError> {
        Ok(self.store.list_by_owner(owner).await?)
    }

    /// Most recent `limit` output lines of the worker.
    pub async fn logs(&self, id: WorkerId, limit: usize) -> Result<Vec<String>, SupervisorError> {
        if let Some(log) = self.output_if_known(id) {
            return Ok(log.tail(limit));
        }
        match self.store.get_worker(id).await? {
            Some(_) => Ok(Vec::new()),
            None => Err(SupervisorError::NotFound(id)),
        }
    }

    /// Stops every registered worker, leaving persisted statuses untouched.
    pub async fn stop_all(&self) -> StopAllReport {
        let ids = self.registry.all_ids().await;
        let stops = ids.into_iter().map(|id| async move {
            let _guard = self.locks.lock(id).await;
            let released = match self.registry.unregister(id).await {
                Some(handle) => Some(self.release_handle(id, handle, ExitReason::Shutdown).await),
                None => None,
            };
            (id, released)
        });

        let mut report = StopAllReport::default();
        for (id, released) in futures::future::join_all(stops).await {
            match released {
                Some(Released::Joined(_)) => report.stopped.push(id),
                Some(Released::Panicked | Released::Aborted) => report.forced.push(id),
                None => {}
            }
        }
        report
    }

    /// Liveness of every registered worker, grouped by runtime.
    pub async fn health_check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for (_, runtime, liveness) in self.registry.probe_all().await {
            let counts = report.by_runtime.entry(runtime).or_default();
            match liveness {
                Liveness::Healthy => counts.healthy += 1,
                Liveness::Unhealthy => counts.unhealthy += 1,
            }
        }
        report
    }

    /// Waits for a termination signal, then stops everything within `cfg.grace`.
    pub async fn run_until_shutdown(&self) -> Result<(), RuntimeError> {
        shutdown::wait_for_shutdown_signal().await?;
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.shutdown().await
    }

    /// Stops every worker, bounded by `cfg.grace`.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let grace = self.cfg.grace;
        match tokio::time::timeout(grace, self.stop_all()).await {
            Ok(report) if report.forced.is_empty() => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Ok(report) => self.grace_exceeded(grace, report.forced),
            Err(_) => {
                let stuck = self.registry.all_ids().await.into_iter().collect();
                self.grace_exceeded(grace, stuck)
            }
        }
    }

    fn grace_exceeded(&self, grace: Duration, stuck: Vec<WorkerId>) -> Result<(), RuntimeError> {
        let names: Vec<String> = stuck.iter().map(WorkerId::to_string).collect();
        self.bus
            .publish(Event::new(EventKind::GraceExceeded).with_reason(names.join(",")));
        Err(RuntimeError::GraceExceeded { grace, stuck })
    }

    // ---------------------------
    // Locked helpers
    // ---------------------------

    async fn start_locked(&self, id: WorkerId) -> Result<(), SupervisorError> {
        let record = self
            .store
            .get_worker(id)
            .await?
            .ok_or(SupervisorError::NotFound(id))?;

        if let Some(old) = self.registry.unregister(id).await {
            self.release_handle(id, old, ExitReason::UserStopped).await;
        }

        self.validate(Some(id), record.runtime, &record.source).await?;
        self.spawn_worker(&record).await
    }

    /// Releases the live handle, if any, and optionally persists `stopped`.
    ///
    /// Returns whether a handle was released.
    async fn stop_locked(
        &self,
        id: WorkerId,
        reason: ExitReason,
        persist: bool,
    ) -> Result<bool, SupervisorError> {
        let released = match self.registry.unregister(id).await {
            Some(handle) => {
                self.release_handle(id, handle, reason).await;
                true
            }
            None => false,
        };

        if persist {
            match self.store.update_status(id, PersistedStatus::Stopped).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) if released => {}
                Err(StoreError::NotFound(_)) => return Err(SupervisorError::NotFound(id)),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(released)
    }

    async fn release_handle(
        &self,
        id: WorkerId,
        handle: ExecutionHandle,
        reason: ExitReason,
    ) -> Released {
        let generation = handle.generation();
        let runtime = handle.runtime;
        let released = handle
            .release(self.cfg.stop_grace + RELEASE_MARGIN)
            .await;
        if !matches!(released, Released::Joined(_)) {
            tracing::warn!(worker = %id, outcome = ?released, "worker actor did not stop cleanly");
        }

        self.bus.publish(
            Event::new(EventKind::WorkerStopped)
                .with_worker(id)
                .with_runtime(runtime)
                .with_reason(reason.as_label()),
        );
        self.outcomes.record(id, generation, reason);
        released
    }

    /// Launches `record`, registers the handle and hands the process to a new actor.
    ///
    /// Caller holds the id's lock and has already released any previous handle.
    async fn spawn_worker(&self, record: &WorkerRecord) -> Result<(), SupervisorError> {
        let id = record.id;
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let output = self.output_log(id);

        self.bus.publish(
            Event::new(EventKind::WorkerStarting)
                .with_worker(id)
                .with_runtime(record.runtime)
                .with_attempt(1),
        );

        let req = LaunchRequest {
            id,
            runtime: record.runtime,
            source: &record.source,
            credential: &record.credential,
            output: Arc::clone(&output),
        };
        let process = match self.actors.launcher.launch(&req).await {
            Ok(process) => process,
            Err(e) => {
                let reason = e.as_message();
                tracing::warn!(worker = %id, runtime = %record.runtime, error = %reason, "launch failed");
                self.bus.publish(
                    Event::new(EventKind::LaunchFailed)
                        .with_worker(id)
                        .with_runtime(record.runtime)
                        .with_attempt(1)
                        .with_reason(reason.as_str()),
                );
                self.outcomes
                    .record(id, generation, ExitReason::LaunchFailed { reason });
                if let Err(store_err) = self.store.update_status(id, PersistedStatus::Stopped).await {
                    tracing::warn!(worker = %id, error = %store_err, "failed to persist stopped status");
                }
                return Err(e.into());
            }
        };

        let started = process.started_at();
        let pid = process.pid();
        let (phase_tx, phase_rx) = watch::channel(Phase::Running {
            since: started,
            pid,
            streak: 0,
        });
        let cancel = CancellationToken::new();
        let (gate_tx, gate_rx) = oneshot::channel();

        let actor = WorkerActor::new(
            Arc::clone(&self.actors),
            id,
            record.runtime,
            generation,
            output,
            phase_tx,
        );
        let join = tokio::spawn(actor.run(process, cancel.clone(), gate_rx));

        let handle = ExecutionHandle {
            runtime: record.runtime,
            generation,
            cancel,
            join,
            phase: phase_rx,
        };
        if let Some(stale) = self.registry.register(id, handle).await {
            self.release_handle(id, stale, ExitReason::UserStopped).await;
        }

        // The actor may give up and persist `Stopped` as soon as the gate
        // opens, so `Running` has to land first.
        if let Err(e) = self.store.update_status(id, PersistedStatus::Running).await {
            drop(gate_tx);
            if let Some(handle) = self.registry.unregister(id).await {
                handle.release(self.cfg.stop_grace + RELEASE_MARGIN).await;
            }
            return Err(e.into());
        }

        self.remember_validated(id, record.runtime, &record.source);
        tracing::info!(worker = %id, runtime = %record.runtime, pid = ?pid, "worker running");
        self.bus.publish(
            Event::new(EventKind::WorkerRunning)
                .with_worker(id)
                .with_runtime(record.runtime),
        );
        let _ = gate_tx.send(());
        Ok(())
    }

    // ---------------------------
    // Validation cache / output logs
    // ---------------------------

    /// Runs the validator unless this exact source already launched for `id`.
    async fn validate(
        &self,
        id: Option<WorkerId>,
        runtime: RuntimeKind,
        source: &str,
    ) -> Result<(), SupervisorError> {
        if let Some(id) = id {
            let known = self
                .validated
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .get(&id)
                .copied();
            if known == Some(fingerprint(runtime, source)) {
                return Ok(());
            }
        }

        match self.validator.validate(source, runtime).await {
            Ok(validation) => {
                for warning in &validation.warnings {
                    tracing::info!(worker = ?id, runtime = %runtime, warning = %warning, "validation warning");
                }
                Ok(())
            }
            Err(rejection) => {
                let mut ev = Event::new(EventKind::ValidationRejected)
                    .with_runtime(runtime)
                    .with_reason(rejection.reason.as_str());
                if let Some(id) = id {
                    ev = ev.with_worker(id);
                }
                self.bus.publish(ev);
                Err(rejection.into())
            }
        }
    }

    fn remember_validated(&self, id: WorkerId, runtime: RuntimeKind, source: &str) {
        self.validated
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id, fingerprint(runtime, source));
    }

    fn output_log(&self, id: WorkerId) -> Arc<OutputLog> {
        let mut outputs = self.outputs.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(
            outputs
                .entry(id)
                .or_insert_with(|| Arc::new(OutputLog::new(self.cfg.output_lines))),
        )
    }

    fn output_if_known(&self, id: WorkerId) -> Option<Arc<OutputLog>> {
        let outputs = self.outputs.lock().unwrap_or_else(|p| p.into_inner());
        outputs.get(&id).cloned()
    }

    fn forget(&self, id: WorkerId) {
        self.outcomes.forget(id);
        self.validated
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
        self.outputs
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&id);
    }
}

fn fingerprint(runtime: RuntimeKind, source: &str) -> u64 {
    let mut h = DefaultHasher::new();
    runtime.hash(&mut h);
    source.hash(&mut h);
    h.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_runtime_and_source() {
        let a = fingerprint(RuntimeKind::Shell, "echo hi");
        assert_eq!(a, fingerprint(RuntimeKind::Shell, "echo hi"));
        assert_ne!(a, fingerprint(RuntimeKind::Shell, "echo hi!"));
        assert_ne!(a, fingerprint(RuntimeKind::Python, "echo hi"));
    }
}
