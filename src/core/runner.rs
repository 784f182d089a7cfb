//! # Watch one launched process until it ends.
//!
//! ```text
//! select! {
//!   token cancelled  → terminate(stop_grace) → Cancelled(termination)
//!   child exited     → Exited(status)
//!   wait() failed    → Lost(error)
//! }
//! ```
//!
//! The caller still owns the process afterwards and must release it.

use std::process::ExitStatus;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::runtime::{Termination, WorkerProcess};

/// How one supervised attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptEnd {
    /// Stop requested; the process was terminated.
    Cancelled(Termination),
    /// The process exited by itself.
    Exited(ExitStatus),
    /// Waiting on the child failed; treated as a crash.
    Lost(std::io::Error),
}

impl AttemptEnd {
    /// Exit code (when the process exited normally) and a printable description.
    pub(crate) fn describe(&self) -> (Option<i32>, String) {
        match self {
            AttemptEnd::Cancelled(t) => (None, format!("cancelled ({t:?})")),
            AttemptEnd::Exited(status) => (status.code(), status.to_string()),
            AttemptEnd::Lost(e) => (None, format!("wait failed: {e}")),
        }
    }
}

pub(crate) async fn watch_once(
    process: &mut WorkerProcess,
    token: &CancellationToken,
    stop_grace: Duration,
) -> AttemptEnd {
    let exited = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        res = process.wait() => Some(res),
    };

    match exited {
        None => AttemptEnd::Cancelled(process.terminate(stop_grace).await),
        Some(Ok(status)) => AttemptEnd::Exited(status),
        Some(Err(e)) => AttemptEnd::Lost(e),
    }
}
