//! # Worker launcher: from source text to a confirmed-alive child process.
//!
//! ```text
//! launch(req)
//!   ├─► tempdir  <work_root>/worker-<id>-XXXX
//!   ├─► write    main.<ext>   (prelude::render for the embedded family)
//!   ├─► compile  (compiled kinds, bounded by compile_timeout)
//!   ├─► command  env_clear + PATH/HOME/WORKER_ID/WORKER_FOOTER/forwarded + BOT_TOKEN
//!   ├─► sandbox.prepare(cmd)
//!   ├─► spawn + stdout/stderr pumps into the worker's OutputLog
//!   └─► readiness
//!         Settle:  still alive after spawn_settle
//!         Marker:  READY_MARKER on stdout within ready_timeout
//! ```
//!
//! Any failure after the directory exists releases it before returning.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::Config;
use crate::credential::Credential;
use crate::error::{truncate_reason, LaunchError};
use crate::runtime::output::OutputLog;
use crate::runtime::prelude;
use crate::runtime::process::WorkerProcess;
use crate::runtime::sandbox::{Sandbox, SandboxContext};
use crate::runtime::table::{CompileStep, Readiness, RuntimeKind, RuntimeTable};
use crate::store::WorkerId;

/// Variable carrying the messaging credential into the worker.
pub const CREDENTIAL_ENV: &str = "BOT_TOKEN";

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const OUTPUT_TAIL_LINES: usize = 20;

/// Everything needed for one launch attempt.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub id: WorkerId,
    pub runtime: RuntimeKind,
    pub source: &'a str,
    pub credential: &'a Credential,
    pub output: Arc<OutputLog>,
}

pub struct Launcher {
    table: RuntimeTable,
    sandbox: Arc<dyn Sandbox>,
    work_root: PathBuf,
    spawn_settle: Duration,
    ready_timeout: Duration,
    compile_timeout: Duration,
    footer: String,
    forward_env: Vec<String>,
}

impl Launcher {
    pub fn new(cfg: &Config, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            table: cfg.runtime_table(),
            sandbox,
            work_root: cfg.work_root.clone(),
            spawn_settle: cfg.spawn_settle,
            ready_timeout: cfg.ready_timeout,
            compile_timeout: cfg.compile_timeout,
            footer: cfg.footer.clone(),
            forward_env: cfg.forward_env.clone(),
        }
    }

    pub fn sandbox_name(&self) -> &'static str {
        self.sandbox.name()
    }

    /// Brings the worker up, or explains why it could not.
    pub async fn launch(&self, req: &LaunchRequest<'_>) -> Result<WorkerProcess, LaunchError> {
        let spec = req.runtime.spec();

        tokio::fs::create_dir_all(&self.work_root)
            .await
            .map_err(|e| LaunchError::io("prepare work root", e))?;
        let prefix = format!("worker-{}-", req.id);
        let workdir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(&self.work_root)
            .map_err(|e| LaunchError::io("create workspace", e))?;

        let src_path = workdir.path().join(format!("main.{}", spec.extension));
        let rendered = prelude::render(req.runtime, req.source);
        tokio::fs::write(&src_path, rendered.as_bytes())
            .await
            .map_err(|e| LaunchError::io("write source", e))?;

        let (program, args): (OsString, Vec<OsString>) = match spec.compile {
            Some(step) => {
                let bin = workdir.path().join("main");
                self.compile(req, step, &src_path, &bin, workdir.path()).await?;
                (bin.into_os_string(), Vec::new())
            }
            None => {
                let mut args: Vec<OsString> = spec.run_args.iter().map(OsString::from).collect();
                args.push(src_path.clone().into_os_string());
                (self.table.program(req.runtime), args)
            }
        };

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(workdir.path())
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into()))
            .env("HOME", workdir.path())
            .env("WORKER_ID", req.id.to_string())
            .env("WORKER_FOOTER", &self.footer);
        for name in &self.forward_env {
            if let Some(value) = std::env::var_os(name) {
                cmd.env(name, value);
            }
        }
        cmd.env(CREDENTIAL_ENV, req.credential.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let ctx = SandboxContext {
            worker: req.id,
            runtime: req.runtime,
            workdir: workdir.path(),
        };
        self.sandbox
            .prepare(&mut cmd, &ctx)
            .map_err(|e| LaunchError::io("sandbox", e))?;

        let mut child = cmd.spawn().map_err(|e| LaunchError::io("spawn", e))?;
        tracing::debug!(
            worker = %req.id,
            runtime = %req.runtime,
            pid = ?child.id(),
            sandbox = self.sandbox.name(),
            "worker spawned"
        );

        let marker = match spec.readiness {
            Readiness::Marker(line) => Some(line),
            Readiness::Settle => None,
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(stdout, "stdout", req, marker.map(|m| (m, ready_tx))));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(stderr, "stderr", req, None));
        }

        let process = WorkerProcess::new(child, Arc::clone(&req.output), pumps, workdir);
        match spec.readiness {
            Readiness::Settle => self.await_settle(process).await,
            Readiness::Marker(_) => self.await_marker(process, ready_rx).await,
        }
    }

    async fn compile(
        &self,
        req: &LaunchRequest<'_>,
        step: CompileStep,
        src: &Path,
        bin: &Path,
        workdir: &Path,
    ) -> Result<(), LaunchError> {
        let spec = req.runtime.spec();
        let program = if step.program == spec.program {
            self.table.program(req.runtime)
        } else {
            OsString::from(step.program)
        };
        let args: Vec<OsString> = step
            .args
            .iter()
            .map(|a| match *a {
                "{src}" => src.as_os_str().to_os_string(),
                "{bin}" => bin.as_os_str().to_os_string(),
                other => OsString::from(other),
            })
            .collect();

        let child = Command::new(&program)
            .args(&args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LaunchError::io("compile", e))?;

        let out = match tokio::time::timeout(self.compile_timeout, child.wait_with_output()).await {
            Err(_) => {
                return Err(LaunchError::CompileTimeout {
                    timeout: self.compile_timeout,
                })
            }
            Ok(res) => res.map_err(|e| LaunchError::io("compile", e))?,
        };

        if out.status.success() {
            tracing::debug!(worker = %req.id, runtime = %req.runtime, "compiled");
            return Ok(());
        }
        let mut diagnostic = String::from_utf8_lossy(&out.stderr).into_owned();
        if diagnostic.trim().is_empty() {
            diagnostic = String::from_utf8_lossy(&out.stdout).into_owned();
        }
        if diagnostic.trim().is_empty() {
            diagnostic = format!("compiler exited with {}", out.status);
        }
        Err(LaunchError::Compile {
            diagnostic: truncate_reason(&diagnostic),
        })
    }

    async fn await_settle(&self, mut process: WorkerProcess) -> Result<WorkerProcess, LaunchError> {
        tokio::time::sleep(self.spawn_settle).await;
        match process.try_exit() {
            Ok(None) => Ok(process),
            Ok(Some(status)) => Err(exited_early(process, status).await),
            Err(e) => {
                process.release().await;
                Err(LaunchError::io("wait", e))
            }
        }
    }

    async fn await_marker(
        &self,
        mut process: WorkerProcess,
        ready: oneshot::Receiver<()>,
    ) -> Result<WorkerProcess, LaunchError> {
        enum Handshake {
            Ready,
            StdoutClosed,
            Exited(std::io::Result<ExitStatus>),
            TimedOut,
        }

        let outcome = tokio::select! {
            r = ready => match r {
                Ok(()) => Handshake::Ready,
                Err(_) => Handshake::StdoutClosed,
            },
            status = process.wait() => Handshake::Exited(status),
            _ = tokio::time::sleep(self.ready_timeout) => Handshake::TimedOut,
        };

        match outcome {
            Handshake::Ready => Ok(process),
            Handshake::Exited(Ok(status)) => Err(exited_early(process, status).await),
            Handshake::Exited(Err(e)) => {
                process.release().await;
                Err(LaunchError::io("wait", e))
            }
            Handshake::StdoutClosed => {
                // Closing stdout usually means the process is on its way out.
                let exited = tokio::time::timeout(Duration::from_secs(1), process.wait()).await;
                match exited {
                    Ok(Ok(status)) => Err(exited_early(process, status).await),
                    _ => {
                        process.release().await;
                        Err(LaunchError::NotReady {
                            reason: "stdout closed before the ready marker".into(),
                        })
                    }
                }
            }
            Handshake::TimedOut => {
                let tail = process.output().tail_text(OUTPUT_TAIL_LINES);
                process.release().await;
                let mut reason = format!("no ready marker within {:?}", self.ready_timeout);
                if !tail.is_empty() {
                    reason.push_str("; last output: ");
                    reason.push_str(&tail);
                }
                Err(LaunchError::NotReady {
                    reason: truncate_reason(&reason),
                })
            }
        }
    }
}

async fn exited_early(process: WorkerProcess, status: ExitStatus) -> LaunchError {
    let output = Arc::clone(process.output());
    // Releasing drains the pumps, so the tail includes the final lines.
    process.release().await;
    LaunchError::ExitedEarly {
        status: status.to_string(),
        output: truncate_reason(&output.tail_text(OUTPUT_TAIL_LINES)),
    }
}

fn pump<R>(
    stream: R,
    name: &'static str,
    req: &LaunchRequest<'_>,
    mut marker: Option<(&'static str, oneshot::Sender<()>)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let id = req.id;
    let output = Arc::clone(&req.output);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if marker.as_ref().is_some_and(|(m, _)| line.trim() == *m) {
                        if let Some((_, tx)) = marker.take() {
                            let _ = tx.send(());
                        }
                        continue;
                    }
                    tracing::debug!(worker = %id, stream = name, "{line}");
                    output.push(line);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(worker = %id, stream = name, error = %e, "output pump stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sandbox::ProcessGroup;
    use crate::runtime::table::READY_MARKER;

    fn launcher(root: &Path) -> Launcher {
        let cfg = Config {
            work_root: root.to_path_buf(),
            spawn_settle: Duration::from_millis(150),
            ..Config::default()
        };
        Launcher::new(&cfg, Arc::new(ProcessGroup))
    }

    fn request<'a>(source: &'a str, credential: &'a Credential) -> LaunchRequest<'a> {
        LaunchRequest {
            id: WorkerId::new(),
            runtime: RuntimeKind::Shell,
            source,
            credential,
            output: Arc::new(OutputLog::new(50)),
        }
    }

    #[tokio::test]
    async fn long_running_shell_worker_comes_up_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let cred = Credential::new("42:secret-token-value");
        let req = request("echo \"token=$BOT_TOKEN id=$WORKER_ID\"; sleep 30", &cred);

        let process = launcher(root.path()).launch(&req).await.unwrap();
        assert!(process.pid().is_some());
        let workdir = process.workdir().unwrap().to_path_buf();
        assert!(workdir.starts_with(root.path()));
        assert!(workdir.join("main.sh").exists());

        process.release().await;
        assert!(!workdir.exists());
        let printed = req.output.tail(10).join("\n");
        assert!(printed.contains("token=42:secret-token-value"));
        assert!(printed.contains(&format!("id={}", req.id)));
    }

    #[tokio::test]
    async fn instant_exit_is_reported_with_output() {
        let root = tempfile::tempdir().unwrap();
        let cred = Credential::new("1:x");
        let req = request("echo 'missing config file' >&2; exit 7", &cred);

        let err = launcher(root.path()).launch(&req).await.unwrap_err();
        match err {
            LaunchError::ExitedEarly { status, output } => {
                assert!(status.contains('7'), "{status}");
                assert!(output.contains("missing config file"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn host_environment_does_not_leak() {
        let root = tempfile::tempdir().unwrap();
        let cred = Credential::new("1:x");
        let req = request("echo \"cargo=${CARGO_PKG_NAME:-unset}\"; sleep 30", &cred);

        let process = launcher(root.path()).launch(&req).await.unwrap();
        process.release().await;
        assert!(req.output.tail(10).iter().any(|l| l == "cargo=unset"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_an_io_error() {
        let root = tempfile::tempdir().unwrap();
        let mut cfg = Config {
            work_root: root.path().to_path_buf(),
            ..Config::default()
        };
        cfg.programs
            .insert(RuntimeKind::Shell, PathBuf::from("/nonexistent/sh-for-tests"));
        let launcher = Launcher::new(&cfg, Arc::new(ProcessGroup));
        let cred = Credential::new("1:x");

        let err = launcher.launch(&request("sleep 30", &cred)).await.unwrap_err();
        assert!(matches!(err, LaunchError::Io { stage: "spawn", .. }), "{err:?}");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compile_failure_surfaces_truncated_diagnostic() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let tools = tempfile::tempdir().unwrap();
        let compiler = tools.path().join("rustc");
        std::fs::write(
            &compiler,
            "#!/bin/sh\ni=0\nwhile [ $i -lt 100 ]; do\n  echo \"error[E0425]: cannot find value nope in this scope ($i)\" >&2\n  i=$((i+1))\ndone\nexit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&compiler, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut cfg = Config {
            work_root: root.path().to_path_buf(),
            ..Config::default()
        };
        cfg.programs.insert(RuntimeKind::Rust, compiler);
        let launcher = Launcher::new(&cfg, Arc::new(ProcessGroup));
        let cred = Credential::new("1:x");
        let mut req = request("fn main() { nope }", &cred);
        req.runtime = RuntimeKind::Rust;

        match launcher.launch(&req).await {
            Err(LaunchError::Compile { diagnostic }) => {
                assert!(diagnostic.starts_with("error[E0425]"), "{diagnostic}");
                assert!(diagnostic.chars().count() <= crate::error::MAX_REASON_LEN);
                assert!(diagnostic.ends_with('…'));
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("stand-in compiler always fails"),
        }
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    /// Runs `script` under `sh` and waits for the ready marker on its stdout.
    async fn handshake(
        launcher: &Launcher,
        script: &str,
        output: Arc<OutputLog>,
    ) -> (Result<WorkerProcess, LaunchError>, PathBuf) {
        let workdir = tempfile::Builder::new()
            .prefix("marker-")
            .tempdir_in(&launcher.work_root)
            .unwrap();
        let path = workdir.path().to_path_buf();
        let cred = Credential::new("1:x");
        let mut req = request("", &cred);
        req.output = output;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .current_dir(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let ctx = SandboxContext {
            worker: req.id,
            runtime: RuntimeKind::PythonClient,
            workdir: &path,
        };
        ProcessGroup.prepare(&mut cmd, &ctx).unwrap();
        let mut child = cmd.spawn().unwrap();

        let (ready_tx, ready_rx) = oneshot::channel();
        let pumps = vec![
            pump(child.stdout.take().unwrap(), "stdout", &req, Some((READY_MARKER, ready_tx))),
            pump(child.stderr.take().unwrap(), "stderr", &req, None),
        ];
        let process = WorkerProcess::new(child, Arc::clone(&req.output), pumps, workdir);
        (launcher.await_marker(process, ready_rx).await, path)
    }

    fn marker_launcher(root: &Path) -> Launcher {
        let cfg = Config {
            work_root: root.to_path_buf(),
            ready_timeout: Duration::from_millis(400),
            ..Config::default()
        };
        Launcher::new(&cfg, Arc::new(ProcessGroup))
    }

    #[tokio::test]
    async fn ready_marker_confirms_the_worker() {
        let root = tempfile::tempdir().unwrap();
        let launcher = marker_launcher(root.path());
        let output = Arc::new(OutputLog::new(10));
        let script = format!("echo connecting\necho '{READY_MARKER}'\nsleep 30");

        let (res, workdir) = handshake(&launcher, &script, Arc::clone(&output)).await;
        let process = res.unwrap();
        assert!(process.pid().is_some());
        assert!(workdir.exists());

        process.release().await;
        assert!(!workdir.exists());
        let lines = output.tail(10);
        assert!(lines.iter().any(|l| l == "connecting"));
        assert!(!lines.iter().any(|l| l.contains(READY_MARKER)));
    }

    #[tokio::test]
    async fn missing_ready_marker_times_out() {
        let root = tempfile::tempdir().unwrap();
        let launcher = marker_launcher(root.path());
        let script = "echo 'still logging in'\nsleep 30";

        let (res, workdir) = handshake(&launcher, script, Arc::new(OutputLog::new(10))).await;
        match res {
            Err(LaunchError::NotReady { reason }) => {
                assert!(reason.contains("no ready marker"), "{reason}");
                assert!(reason.contains("still logging in"), "{reason}");
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("worker never printed the marker"),
        }
        assert!(!workdir.exists());
    }

    #[tokio::test]
    async fn exit_before_ready_marker_is_exited_early() {
        let root = tempfile::tempdir().unwrap();
        let launcher = marker_launcher(root.path());
        let script = "echo 'invalid token' >&2\nexit 4";

        let (res, workdir) = handshake(&launcher, script, Arc::new(OutputLog::new(10))).await;
        match res {
            Err(LaunchError::ExitedEarly { status, output }) => {
                assert!(status.contains('4'), "{status}");
                assert!(output.contains("invalid token"), "{output}");
            }
            Err(other) => panic!("unexpected {other:?}"),
            Ok(_) => panic!("worker exited without the marker"),
        }
        assert!(!workdir.exists());
    }
}
