//! # Worker registry: at most one live execution handle per worker id.
//!
//! The registry is the only structure mutated by both the lifecycle API and
//! the per-worker actors. Every mutation is a single write-locked map
//! operation:
//!
//! ```text
//! register(id, h)          → insert, returning the superseded handle (caller releases it)
//! unregister(id)           → remove unconditionally (stop / delete / shutdown)
//! unregister_if(id, gen)   → remove only if the entry still belongs to `gen` (actor give-up)
//! ```
//!
//! ## Rules
//! - The registry never cancels or joins anything itself; whoever removes a
//!   handle owns it and must call [`ExecutionHandle::release`].
//! - Probing ([`WorkerRegistry::probe_all`]) reads the actor's phase channel
//!   and never touches the process.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::outcome::ExitReason;
use crate::runtime::RuntimeKind;
use crate::store::WorkerId;

/// Where a supervised worker currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// A relaunch is in progress.
    Starting { streak: u32 },
    /// The process passed its readiness check.
    Running {
        since: Instant,
        pid: Option<u32>,
        streak: u32,
    },
    /// The process exited; a relaunch is scheduled after `retry_in`.
    Crashed { streak: u32, retry_in: Duration },
    /// Supervision ended.
    Stopped,
}

impl Phase {
    pub fn streak(&self) -> u32 {
        match self {
            Phase::Starting { streak }
            | Phase::Running { streak, .. }
            | Phase::Crashed { streak, .. } => *streak,
            Phase::Stopped => 0,
        }
    }
}

/// Why an actor task returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
    /// Cancelled by the lifecycle API.
    Cancelled,
    /// The record disappeared while a relaunch was pending.
    Orphaned,
    /// The actor stopped supervising on its own.
    GaveUp(ExitReason),
}

/// Liveness verdict for one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    Unhealthy,
}

/// How [`ExecutionHandle::release`] finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Released {
    /// The actor returned on its own after cancellation.
    Joined(ActorExit),
    /// The actor panicked.
    Panicked,
    /// The actor did not return in time and was aborted.
    Aborted,
}

/// Live resources backing one running worker: its actor task and the
/// token that stops it.
pub struct ExecutionHandle {
    pub(crate) runtime: RuntimeKind,
    pub(crate) generation: u64,
    pub(crate) cancel: CancellationToken,
    pub(crate) join: JoinHandle<ActorExit>,
    pub(crate) phase: watch::Receiver<Phase>,
}

/// Snapshot of a registered handle.
#[derive(Debug, Clone)]
pub struct HandleInfo {
    pub runtime: RuntimeKind,
    pub generation: u64,
    pub phase: Phase,
}

impl ExecutionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn info(&self) -> HandleInfo {
        HandleInfo {
            runtime: self.runtime,
            generation: self.generation,
            phase: self.phase.borrow().clone(),
        }
    }

    /// Side-effect free liveness probe.
    pub fn probe(&self) -> Liveness {
        if self.join.is_finished() {
            return Liveness::Unhealthy;
        }
        match *self.phase.borrow() {
            Phase::Running { .. } => Liveness::Healthy,
            _ => Liveness::Unhealthy,
        }
    }

    /// Cancels the actor and waits up to `wait` for it to tear the worker down.
    ///
    /// An actor that does not return in time is aborted; dropping its state
    /// still kills the process group and removes the working directory.
    pub async fn release(self, wait: Duration) -> Released {
        self.cancel.cancel();
        let abort = self.join.abort_handle();
        match tokio::time::timeout(wait, self.join).await {
            Ok(Ok(exit)) => Released::Joined(exit),
            Ok(Err(e)) if e.is_panic() => Released::Panicked,
            Ok(Err(_)) => Released::Aborted,
            Err(_) => {
                abort.abort();
                Released::Aborted
            }
        }
    }
}

/// Concurrent map of worker id to its single live [`ExecutionHandle`].
#[derive(Default)]
pub struct WorkerRegistry {
    handles: RwLock<HashMap<WorkerId, ExecutionHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`, returning whatever it superseded.
    pub async fn register(&self, id: WorkerId, handle: ExecutionHandle) -> Option<ExecutionHandle> {
        self.handles.write().await.insert(id, handle)
    }

    pub async fn lookup(&self, id: WorkerId) -> Option<HandleInfo> {
        self.handles.read().await.get(&id).map(ExecutionHandle::info)
    }

    pub async fn unregister(&self, id: WorkerId) -> Option<ExecutionHandle> {
        self.handles.write().await.remove(&id)
    }

    /// Removes the entry only if it still belongs to `generation`.
    pub async fn unregister_if(&self, id: WorkerId, generation: u64) -> Option<ExecutionHandle> {
        let mut handles = self.handles.write().await;
        match handles.get(&id) {
            Some(h) if h.generation == generation => handles.remove(&id),
            _ => None,
        }
    }

    pub async fn all_ids(&self) -> BTreeSet<WorkerId> {
        self.handles.read().await.keys().copied().collect()
    }

    pub async fn count(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn contains(&self, id: WorkerId) -> bool {
        self.handles.read().await.contains_key(&id)
    }

    /// Liveness of every registered handle.
    pub async fn probe_all(&self) -> Vec<(WorkerId, RuntimeKind, Liveness)> {
        let handles = self.handles.read().await;
        handles
            .iter()
            .map(|(id, h)| (*id, h.runtime, h.probe()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(generation: u64, phase: Phase) -> (ExecutionHandle, watch::Sender<Phase>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            token.cancelled().await;
            ActorExit::Cancelled
        });
        let (tx, rx) = watch::channel(phase);
        let h = ExecutionHandle {
            runtime: RuntimeKind::Shell,
            generation,
            cancel,
            join,
            phase: rx,
        };
        (h, tx)
    }

    fn running() -> Phase {
        Phase::Running {
            since: Instant::now(),
            pid: None,
            streak: 0,
        }
    }

    #[tokio::test]
    async fn register_supersedes_and_returns_previous() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::new();

        let (first, _tx1) = handle(1, running());
        let (second, _tx2) = handle(2, running());

        assert!(reg.register(id, first).await.is_none());
        let old = reg.register(id, second).await.expect("superseded handle");
        assert_eq!(old.generation(), 1);
        assert_eq!(reg.count().await, 1);
        assert_eq!(reg.lookup(id).await.unwrap().generation, 2);

        assert_eq!(
            old.release(Duration::from_secs(1)).await,
            Released::Joined(ActorExit::Cancelled)
        );
    }

    #[tokio::test]
    async fn unregister_if_ignores_stale_generation() {
        let reg = WorkerRegistry::new();
        let id = WorkerId::new();
        let (h, _tx) = handle(7, running());
        reg.register(id, h).await;

        assert!(reg.unregister_if(id, 6).await.is_none());
        assert!(reg.contains(id).await);
        assert!(reg.unregister_if(id, 7).await.is_some());
        assert!(reg.all_ids().await.is_empty());
    }

    #[tokio::test]
    async fn probe_follows_phase() {
        let reg = WorkerRegistry::new();
        let a = WorkerId::new();
        let b = WorkerId::new();
        let (ha, _txa) = handle(1, running());
        let (hb, txb) = handle(2, running());
        reg.register(a, ha).await;
        reg.register(b, hb).await;

        txb.send_replace(Phase::Crashed {
            streak: 1,
            retry_in: Duration::from_secs(5),
        });

        let mut probes = reg.probe_all().await;
        probes.sort_by_key(|(id, _, _)| *id == b);
        assert_eq!(probes[0].2, Liveness::Healthy);
        assert_eq!(probes[1].2, Liveness::Unhealthy);
        assert_eq!(reg.lookup(b).await.unwrap().phase.streak(), 1);
    }

    #[tokio::test]
    async fn release_aborts_an_actor_that_ignores_cancellation() {
        let (tx, rx) = watch::channel(running());
        let h = ExecutionHandle {
            runtime: RuntimeKind::Shell,
            generation: 1,
            cancel: CancellationToken::new(),
            join: tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ActorExit::Cancelled
            }),
            phase: rx,
        };
        drop(tx);
        assert_eq!(h.release(Duration::from_millis(20)).await, Released::Aborted);
    }
}
