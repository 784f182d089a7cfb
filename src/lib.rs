//! # workervisor
//!
//! **Workervisor** hosts user-submitted worker programs: it checks the
//! source, launches it as a child process with the worker's messaging
//! credential, watches it, restarts it on crashes and stops it on request.
//!
//! ## Architecture
//! ```text
//!   intake (create / edit)           operator (start / stop / restart / status / health)
//!            │                                       │
//!            ▼                                       ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor (lifecycle API, per-id serialized)                    │
//! │  - Validator   (denylist, markers, toolchain syntax check)        │
//! │  - Launcher    (workspace, compile, sandbox hook, readiness)      │
//! │  - WorkerRegistry (one live ExecutionHandle per worker id)        │
//! │  - WorkerStore / CredentialVerifier (collaborators)               │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   ┌─────────────┐   ┌─────────────┐   ┌─────────────┐
//!   │ WorkerActor │   │ WorkerActor │   │ WorkerActor │   one per live worker
//!   │  (child #1) │   │  (child #2) │   │  (child #3) │
//!   └──────┬──────┘   └──────┬──────┘   └──────┬──────┘
//!          │ WorkerCrashed / RestartScheduled / WorkerRestarted / RestartExhausted
//!          ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                          SubscriberSet (per-subscriber queues)
//!                          ├─► LogWriter
//!                          └─► user subscribers (notifications, ...)
//! ```
//!
//! ## Worker lifecycle
//! ```text
//! start ──► Starting ──ready──► Running ──exit──► Crashed ──policy allows──► Starting
//!                │                  │                 └──ceiling reached──► Stopped (RestartExhausted)
//!                └──launch error──► Stopped           stop at any point ──► Stopped (UserStopped)
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use workervisor::{Config, JsonFileStore, LogWriter, Subscribe, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::from_env()?;
//!     let store = Arc::new(JsonFileStore::open("workers.json").await?);
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!
//!     let sup = Supervisor::builder(cfg)
//!         .with_store(store)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     sup.resume().await?;
//!     sup.run_until_shutdown().await?;
//!     Ok(())
//! }
//! ```

mod core;
mod credential;
mod error;
mod events;
mod policies;
mod runtime;
mod store;
mod subscribers;

pub use crate::core::{
    wait_for_shutdown_signal, ActorExit, Config, ConfigError, ExecutionHandle, ExitReason,
    HandleInfo, HealthCounts, HealthReport, Liveness, NewWorker, Phase, Released, ResumeReport,
    StopAllReport, Supervisor, SupervisorBuilder, WorkerRegistry, WorkerState, WorkerStatus,
    DEFAULT_FOOTER, ENV_PREFIX,
};
pub use credential::{Credential, CredentialError, CredentialVerifier, Identity, TokenShapeVerifier};
pub use error::{truncate_reason, LaunchError, RuntimeError, SupervisorError, MAX_REASON_LEN};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, CrashLedger, JitterPolicy, RestartPolicy, DEFAULT_RESTART_CEILING};
pub use runtime::{
    Family, LaunchRequest, Launcher, NoSandbox, OutputLog, ProcessGroup, Readiness, Rejection,
    RuntimeKind, RuntimeSpec, RuntimeTable, Sandbox, SandboxContext, Termination, UnknownRuntime,
    Validation, Validator, WorkerProcess, CREDENTIAL_ENV, DEFAULT_OUTPUT_LINES, READY_MARKER,
};
pub use store::{
    JsonFileStore, MemoryStore, OwnerId, PersistedStatus, StoreError, WorkerId, WorkerRecord,
    WorkerStore,
};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
