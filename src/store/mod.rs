//! # Worker records and the persistence collaborator.
//!
//! The supervisor does not own a storage format. It talks to a
//! [`WorkerStore`] and ships two implementations:
//! - [`MemoryStore`]: process-local map (tests, embedding);
//! - [`JsonFileStore`]: a single JSON document rewritten atomically.
//!
//! ```text
//! create ──► save_worker ──► start ──► update_status(Running)
//! crash  ──► increment_error_count
//! relaunch ──► increment_restart_count
//! edit   ──► update_source
//! ```

mod file;
mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::credential::{Credential, Identity};
use crate::runtime::RuntimeKind;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Opaque worker identifier (UUIDv7, time ordered).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Allocates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.as_simple().fmt(f)
    }
}

impl FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the submitting principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub i64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Status as persisted by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistedStatus {
    Stopped,
    Running,
}

/// Everything the platform remembers about one worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub owner: OwnerId,
    pub runtime: RuntimeKind,
    pub source: String,
    pub credential: Credential,
    #[serde(default)]
    pub identity: Option<Identity>,
    pub status: PersistedStatus,
    pub error_count: u32,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_restart_at: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    /// Builds a new stopped record with zeroed counters.
    pub fn new(
        owner: OwnerId,
        runtime: RuntimeKind,
        source: impl Into<String>,
        credential: Credential,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkerId::new(),
            owner,
            runtime,
            source: source.into(),
            credential,
            identity: None,
            status: PersistedStatus::Stopped,
            error_count: 0,
            restart_count: 0,
            created_at: now,
            updated_at: now,
            last_restart_at: None,
        }
    }

    /// Attaches the identity reported by the credential verifier.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub(crate) fn set_status(&mut self, status: PersistedStatus) {
        let now = Utc::now();
        if status == PersistedStatus::Running {
            self.last_restart_at = Some(now);
        }
        self.status = status;
        self.updated_at = now;
    }

    pub(crate) fn set_source(&mut self, source: &str) {
        self.source = source.to_string();
        self.updated_at = Utc::now();
    }

    pub(crate) fn bump_errors(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        self.updated_at = Utc::now();
    }

    pub(crate) fn bump_restarts(&mut self) {
        let now = Utc::now();
        self.restart_count = self.restart_count.saturating_add(1);
        self.last_restart_at = Some(now);
        self.updated_at = now;
    }
}

/// Errors raised by store implementations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("worker {0} not found in store")]
    NotFound(WorkerId),

    #[error("store i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Persistence collaborator consumed by the supervisor.
///
/// Mutating calls on a missing id return [`StoreError::NotFound`].
#[async_trait]
pub trait WorkerStore: Send + Sync + 'static {
    async fn get_worker(&self, id: WorkerId) -> Result<Option<WorkerRecord>, StoreError>;

    /// Inserts or replaces the record with the same id.
    async fn save_worker(&self, record: &WorkerRecord) -> Result<(), StoreError>;

    async fn update_status(&self, id: WorkerId, status: PersistedStatus) -> Result<(), StoreError>;

    async fn update_source(&self, id: WorkerId, source: &str) -> Result<(), StoreError>;

    async fn increment_error_count(&self, id: WorkerId) -> Result<(), StoreError>;

    async fn increment_restart_count(&self, id: WorkerId) -> Result<(), StoreError>;

    /// Removes the record; removing a missing id is not an error.
    async fn delete_worker(&self, id: WorkerId) -> Result<(), StoreError>;

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<WorkerRecord>, StoreError>;

    /// Records persisted as running (used to resume after a restart of the host).
    async fn list_running(&self) -> Result<Vec<WorkerRecord>, StoreError>;
}
