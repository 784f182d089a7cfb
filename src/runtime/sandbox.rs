//! # Sandbox hook applied to every worker command.
//!
//! The launcher builds the command (program, args, scrubbed environment,
//! working directory) and then lets the configured [`Sandbox`] adjust it
//! before spawning: wrap it in a container runtime, drop privileges, attach
//! rlimits. The default [`ProcessGroup`] only moves the child into a session
//! of its own, so stop/crash handling can signal the whole process tree.

use std::io;
use std::path::Path;

use tokio::process::Command;

use crate::runtime::table::RuntimeKind;
use crate::store::WorkerId;

/// What a sandbox knows about the worker it is preparing.
#[derive(Debug, Clone, Copy)]
pub struct SandboxContext<'a> {
    pub worker: WorkerId,
    pub runtime: RuntimeKind,
    pub workdir: &'a Path,
}

pub trait Sandbox: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Adjusts `cmd` before it is spawned.
    fn prepare(&self, cmd: &mut Command, ctx: &SandboxContext<'_>) -> io::Result<()>;
}

/// Runs each worker as the leader of a new session (and process group).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroup;

impl Sandbox for ProcessGroup {
    fn name(&self) -> &'static str {
        "process-group"
    }

    fn prepare(&self, cmd: &mut Command, _ctx: &SandboxContext<'_>) -> io::Result<()> {
        #[cfg(unix)]
        unsafe {
            // Only async-signal-safe calls between fork and exec.
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        #[cfg(not(unix))]
        let _ = cmd;
        Ok(())
    }
}

/// Spawns the command as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSandbox;

impl Sandbox for NoSandbox {
    fn name(&self) -> &'static str {
        "none"
    }

    fn prepare(&self, _cmd: &mut Command, _ctx: &SandboxContext<'_>) -> io::Result<()> {
        Ok(())
    }
}
