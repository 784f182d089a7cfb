//! Runtime layer: what a worker program is, whether it is acceptable, and how
//! it becomes a running child process.
//!
//! - [`table`]: closed set of runtime kinds and their static descriptions;
//! - [`validator`]: denylist, structural markers and toolchain syntax check;
//! - [`prelude`]: host wrapper for the embedded-client family;
//! - [`launcher`]: workspace, compile, spawn and readiness;
//! - [`process`]: the launched child and the resources it owns;
//! - [`sandbox`]: hook applied to every worker command;
//! - [`output`]: per-worker ring buffer of recent output lines.

pub mod launcher;
pub mod output;
pub mod prelude;
pub mod process;
pub mod sandbox;
pub mod table;
pub mod validator;

pub use launcher::{LaunchRequest, Launcher, CREDENTIAL_ENV};
pub use output::{OutputLog, DEFAULT_OUTPUT_LINES};
pub use process::{Termination, WorkerProcess};
pub use sandbox::{NoSandbox, ProcessGroup, Sandbox, SandboxContext};
pub use table::{
    Family, Pattern, Readiness, RuntimeKind, RuntimeSpec, RuntimeTable, UnknownRuntime,
    READY_MARKER,
};
pub use validator::{Rejection, Validation, Validator};
