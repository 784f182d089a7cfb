//! # A launched worker process and everything it owns.
//!
//! [`WorkerProcess`] bundles the child, its output pumps and its private
//! working directory. Releasing it (explicitly via [`WorkerProcess::release`],
//! or by dropping it) kills whatever is left of the process group and removes
//! the directory, whichever way supervision ended.
//!
//! ```text
//! terminate(grace):
//!   SIGTERM → process group if the child leads one, else the pid
//!   wait ≤ grace ──exited──► Graceful
//!        └──timeout──► SIGKILL → group, wait ──► Killed
//! ```

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::runtime::output::OutputLog;

/// How a termination request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Needed SIGKILL.
    Killed,
    /// Had already exited before we asked.
    AlreadyExited,
}

#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    /// Set when the child leads its own process group.
    pgid: Option<i32>,
    started_at: Instant,
    output: Arc<OutputLog>,
    pumps: Vec<JoinHandle<()>>,
    workdir: Option<TempDir>,
}

impl WorkerProcess {
    pub(crate) fn new(
        child: Child,
        output: Arc<OutputLog>,
        pumps: Vec<JoinHandle<()>>,
        workdir: TempDir,
    ) -> Self {
        let pid = child.id();
        Self {
            pid,
            pgid: pid.and_then(own_group),
            child,
            started_at: Instant::now(),
            output,
            pumps,
            workdir: Some(workdir),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn output(&self) -> &Arc<OutputLog> {
        &self.output
    }

    pub fn workdir(&self) -> Option<&std::path::Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    /// Waits for the child to exit. Cancel safe.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Exit status if the child has already exited.
    pub fn try_exit(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// SIGTERM, up to `grace` to exit, then SIGKILL.
    pub async fn terminate(&mut self, grace: Duration) -> Termination {
        if matches!(self.child.try_wait(), Ok(Some(_))) {
            return Termination::AlreadyExited;
        }

        self.signal(Signal::Term);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => Termination::Graceful,
            Err(_) => {
                tracing::debug!(pid = ?self.pid, ?grace, "worker ignored SIGTERM, killing");
                self.signal(Signal::Kill);
                if let Err(e) = self.child.start_kill() {
                    tracing::debug!(pid = ?self.pid, error = %e, "start_kill after SIGKILL");
                }
                let _ = self.child.wait().await;
                Termination::Killed
            }
        }
    }

    /// Kills stragglers, drains the pumps and removes the working directory.
    pub async fn release(mut self) {
        // Grandchildren may outlive the session leader; take the group down
        // while the leader is still unreaped if we can.
        self.signal(Signal::Kill);
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;

        for pump in self.pumps.drain(..) {
            let abort = pump.abort_handle();
            if tokio::time::timeout(Duration::from_secs(1), pump).await.is_err() {
                tracing::debug!(pid = ?self.pid, "output pipe held open by a stray process");
                abort.abort();
            }
        }

        if let Some(dir) = self.workdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove worker directory");
            }
        }
    }

    fn signal(&mut self, sig: Signal) {
        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            let signo = match sig {
                Signal::Term => libc::SIGTERM,
                Signal::Kill => libc::SIGKILL,
            };
            let unreaped = self.child.id().is_some();
            // An unreaped leader pins the group id. Once it is reaped the id
            // stays ours only while some member is left in the group.
            if let Some(pgid) = self.pgid {
                if unreaped || group_alive(pgid) {
                    unsafe {
                        libc::kill(-pgid, signo);
                    }
                }
            } else if unreaped {
                unsafe {
                    libc::kill(pid, signo);
                }
            }
        }
        #[cfg(not(unix))]
        if matches!(sig, Signal::Kill) {
            let _ = self.child.start_kill();
        }
    }
}

/// `Some(pid)` if `pid` leads its own process group.
#[cfg(unix)]
fn own_group(pid: u32) -> Option<i32> {
    let pid = i32::try_from(pid).ok()?;
    let pgid = unsafe { libc::getpgid(pid) };
    (pgid == pid).then_some(pid)
}

#[cfg(not(unix))]
fn own_group(_pid: u32) -> Option<i32> {
    None
}

#[cfg(unix)]
fn group_alive(pgid: i32) -> bool {
    unsafe { libc::kill(-pgid, 0) == 0 }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.workdir.is_some() {
            self.signal(Signal::Kill);
        }
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

#[derive(Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use std::process::Stdio;

    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::process::Command;

    use super::*;
    use crate::runtime::sandbox::{ProcessGroup, Sandbox, SandboxContext};
    use crate::runtime::RuntimeKind;
    use crate::store::WorkerId;

    fn spawn_grouped(script: &str, dir: &std::path::Path) -> Child {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let ctx = SandboxContext {
            worker: WorkerId::new(),
            runtime: RuntimeKind::Shell,
            workdir: dir,
        };
        ProcessGroup.prepare(&mut cmd, &ctx).unwrap();
        cmd.spawn().unwrap()
    }

    /// Dead or a zombie waiting for whoever inherited it.
    fn gone(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Err(_) => true,
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        }
    }

    #[tokio::test]
    async fn reaped_leader_with_empty_group_is_not_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let child = spawn_grouped("exit 0", dir.path());
        let mut process = WorkerProcess::new(child, Arc::new(OutputLog::new(10)), Vec::new(), dir);

        let pgid = process.pgid.unwrap();
        assert_eq!(Some(pgid), process.pid().and_then(|p| i32::try_from(p).ok()));
        process.wait().await.unwrap();
        assert!(!group_alive(pgid));

        let workdir = process.workdir().unwrap().to_path_buf();
        process.release().await;
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn release_after_leader_exit_still_kills_stragglers() {
        let dir = tempfile::tempdir().unwrap();
        let mut child = spawn_grouped("sleep 30 &\necho $!", dir.path());
        let stdout = child.stdout.take().unwrap();
        let mut process = WorkerProcess::new(child, Arc::new(OutputLog::new(10)), Vec::new(), dir);

        let line = BufReader::new(stdout).lines().next_line().await.unwrap().unwrap();
        let straggler: i32 = line.trim().parse().unwrap();
        let pgid = process.pgid.unwrap();

        process.wait().await.unwrap();
        assert!(!gone(straggler));
        assert!(group_alive(pgid));

        process.release().await;
        let deadline = Instant::now() + Duration::from_secs(2);
        while !gone(straggler) {
            assert!(Instant::now() < deadline, "straggler {straggler} survived release");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
