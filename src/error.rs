//! Error types used by the workervisor runtime.
//!
//! - [`SupervisorError`]: returned synchronously by the lifecycle API.
//! - [`LaunchError`]: a worker could not be brought to the running state.
//! - [`RuntimeError`]: failures of the supervisor runtime itself (shutdown).
//!
//! Crashes and restart exhaustion are asynchronous and never show up here;
//! they surface through [`WorkerStatus`](crate::WorkerStatus) and the event bus.
//!
//! Every enum offers `as_label` (stable snake_case for logs/metrics).

use std::time::Duration;

use thiserror::Error;

use crate::credential::CredentialError;
use crate::runtime::Rejection;
use crate::store::{OwnerId, StoreError, WorkerId};

/// Upper bound for diagnostics that are surfaced to users verbatim.
pub const MAX_REASON_LEN: usize = 300;

/// Truncates `text` to at most [`MAX_REASON_LEN`] characters, the trailing `…` included.
pub fn truncate_reason(text: &str) -> String {
    let text = text.trim();
    if text.char_indices().nth(MAX_REASON_LEN).is_none() {
        return text.to_string();
    }
    match text.char_indices().nth(MAX_REASON_LEN - 1) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// # Errors produced by the lifecycle API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The worker source was refused by the validator; nothing was started.
    #[error("validation rejected: {reason}")]
    ValidationRejected {
        /// Human readable reason, already truncated.
        reason: String,
    },

    /// The worker could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The referenced worker does not exist.
    #[error("worker {0} not found")]
    NotFound(WorkerId),

    /// The credential verifier refused the credential.
    #[error("invalid credential: {reason}")]
    InvalidCredential {
        /// Verifier message.
        reason: String,
    },

    /// The owner already hosts the maximum number of workers.
    #[error("owner {owner} already hosts {limit} workers")]
    QuotaExceeded {
        /// Submitting principal.
        owner: OwnerId,
        /// Configured per-owner limit.
        limit: usize,
    },

    /// The persistence collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::ValidationRejected { .. } => "validation_rejected",
            SupervisorError::Launch(e) => e.as_label(),
            SupervisorError::NotFound(_) => "worker_not_found",
            SupervisorError::InvalidCredential { .. } => "invalid_credential",
            SupervisorError::QuotaExceeded { .. } => "quota_exceeded",
            SupervisorError::Store(_) => "store_failed",
        }
    }
}

impl From<Rejection> for SupervisorError {
    fn from(r: Rejection) -> Self {
        SupervisorError::ValidationRejected { reason: r.reason }
    }
}

impl From<CredentialError> for SupervisorError {
    fn from(e: CredentialError) -> Self {
        SupervisorError::InvalidCredential {
            reason: e.to_string(),
        }
    }
}

/// # Errors produced while bringing a worker up.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Filesystem or spawn failure at the given stage.
    #[error("{stage} failed: {source}")]
    Io {
        /// Launch stage ("workspace", "write source", "spawn", ...).
        stage: &'static str,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The compiler rejected the program.
    #[error("compilation failed: {diagnostic}")]
    Compile {
        /// Compiler diagnostic, truncated.
        diagnostic: String,
    },

    /// The compiler did not finish in time.
    #[error("compilation timed out after {timeout:?}")]
    CompileTimeout {
        /// Configured compile timeout.
        timeout: Duration,
    },

    /// The process exited before it was confirmed alive.
    #[error("worker exited during startup ({status}): {output}")]
    ExitedEarly {
        /// Exit status description.
        status: String,
        /// Tail of the captured output, truncated.
        output: String,
    },

    /// The process stayed up but never reported readiness.
    #[error("worker not ready: {reason}")]
    NotReady {
        /// What went wrong with the handshake.
        reason: String,
    },
}

impl LaunchError {
    pub(crate) fn io(stage: &'static str, source: std::io::Error) -> Self {
        LaunchError::Io { stage, source }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LaunchError::Io { .. } => "launch_io",
            LaunchError::Compile { .. } => "launch_compile",
            LaunchError::CompileTimeout { .. } => "launch_compile_timeout",
            LaunchError::ExitedEarly { .. } => "launch_exited_early",
            LaunchError::NotReady { .. } => "launch_not_ready",
        }
    }

    /// Returns the message surfaced to the submitting user.
    pub fn as_message(&self) -> String {
        truncate_reason(&self.to_string())
    }
}

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some workers were still registered.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers that did not stop in time.
        stuck: Vec<WorkerId>,
    },

    /// Installing the OS signal handlers failed.
    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reason_is_untouched() {
        assert_eq!(truncate_reason("  boom \n"), "boom");
    }

    #[test]
    fn long_reason_is_cut_on_char_boundary() {
        let text = "é".repeat(MAX_REASON_LEN + 50);
        let cut = truncate_reason(&text);
        assert_eq!(cut.chars().count(), MAX_REASON_LEN);
        assert!(cut.ends_with('…'));

        let exact = "x".repeat(MAX_REASON_LEN);
        assert_eq!(truncate_reason(&exact), exact);
    }

    #[test]
    fn launch_labels_are_stable() {
        let err = LaunchError::Compile {
            diagnostic: "expected `;`".into(),
        };
        assert_eq!(err.as_label(), "launch_compile");
        let err: SupervisorError = err.into();
        assert_eq!(err.as_label(), "launch_compile");
    }
}
