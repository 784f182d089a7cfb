//! Reports returned by the lifecycle API.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::outcome::ExitReason;
use crate::core::registry::Phase;
use crate::runtime::RuntimeKind;
use crate::store::{PersistedStatus, WorkerId};

/// Observable state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Running,
    Crashed,
    Stopped,
}

impl From<&Phase> for WorkerState {
    fn from(phase: &Phase) -> Self {
        match phase {
            Phase::Starting { .. } => WorkerState::Starting,
            Phase::Running { .. } => WorkerState::Running,
            Phase::Crashed { .. } => WorkerState::Crashed,
            Phase::Stopped => WorkerState::Stopped,
        }
    }
}

/// Answer to [`Supervisor::status`](crate::Supervisor::status).
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub id: WorkerId,
    pub runtime: RuntimeKind,
    pub state: WorkerState,
    /// What the store says; differs from `state` after a host shutdown.
    pub persisted: PersistedStatus,
    /// Zero unless running.
    pub uptime: Duration,
    pub pid: Option<u32>,
    /// Why supervision last ended, if it has since this host started.
    pub last_exit: Option<ExitReason>,
    /// Crashes counted toward the restart ceiling by the live actor.
    pub crash_streak: u32,
    pub error_count: u32,
    pub restart_count: u32,
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }
}

/// Healthy/unhealthy counts for one runtime kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub healthy: usize,
    pub unhealthy: usize,
}

/// Answer to [`Supervisor::health_check`](crate::Supervisor::health_check).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub by_runtime: BTreeMap<RuntimeKind, HealthCounts>,
}

impl HealthReport {
    pub fn healthy(&self) -> usize {
        self.by_runtime.values().map(|c| c.healthy).sum()
    }

    pub fn unhealthy(&self) -> usize {
        self.by_runtime.values().map(|c| c.unhealthy).sum()
    }
}

/// Answer to [`Supervisor::stop_all`](crate::Supervisor::stop_all).
#[derive(Debug, Clone, Default)]
pub struct StopAllReport {
    /// Workers whose actor returned after cancellation.
    pub stopped: Vec<WorkerId>,
    /// Workers whose actor had to be aborted or had panicked.
    pub forced: Vec<WorkerId>,
}

/// Answer to [`Supervisor::resume`](crate::Supervisor::resume).
#[derive(Debug, Default)]
pub struct ResumeReport {
    pub started: Vec<WorkerId>,
    pub failed: Vec<(WorkerId, crate::error::SupervisorError)>,
}
