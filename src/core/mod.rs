//! Supervision core.
//!
//! - [`supervisor`]: lifecycle API (create/start/stop/restart/edit/delete/status/...);
//! - [`builder`]: wires the supervisor and its collaborators;
//! - [`actor`]: per-worker crash detection and restart policy;
//! - [`runner`]: watches one launched process;
//! - [`registry`]: at most one live handle per worker id;
//! - [`outcome`]: why each worker last stopped;
//! - [`status`]: reports returned to callers;
//! - [`config`]: runtime configuration;
//! - [`shutdown`]: OS signal handling.

mod actor;
mod builder;
mod config;
mod locks;
mod outcome;
mod registry;
mod runner;
mod shutdown;
mod status;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{Config, ConfigError, DEFAULT_FOOTER, ENV_PREFIX};
pub use outcome::ExitReason;
pub use registry::{ActorExit, ExecutionHandle, HandleInfo, Liveness, Phase, Released, WorkerRegistry};
pub use shutdown::wait_for_shutdown_signal;
pub use status::{HealthCounts, HealthReport, ResumeReport, StopAllReport, WorkerState, WorkerStatus};
pub use supervisor::{NewWorker, Supervisor};
