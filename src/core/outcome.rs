//! # Why each worker last stopped.
//!
//! The persisted status only says `stopped`. The [`OutcomeBoard`] keeps the
//! reason in memory so `status` can tell a user stop apart from an exhausted
//! restart budget. Writes carry the handle generation they belong to; a
//! write for an older generation than the stored one is ignored.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::store::WorkerId;

/// Reason supervision of a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// `stop`, `restart`, `edit` or `delete` from the lifecycle API.
    UserStopped,
    /// Crash streak reached the restart ceiling.
    RestartExhausted {
        crashes: u32,
        /// Description of the final exit status.
        last: String,
    },
    /// An automatic relaunch failed before the worker became ready.
    RelaunchFailed { reason: String },
    /// An explicit start failed.
    LaunchFailed { reason: String },
    /// The host shut down.
    Shutdown,
}

impl ExitReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExitReason::UserStopped => "user_stopped",
            ExitReason::RestartExhausted { .. } => "restart_exhausted",
            ExitReason::RelaunchFailed { .. } => "relaunch_failed",
            ExitReason::LaunchFailed { .. } => "launch_failed",
            ExitReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Default)]
pub struct OutcomeBoard {
    inner: Mutex<HashMap<WorkerId, (u64, ExitReason)>>,
}

impl OutcomeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `reason` unless a newer generation already reported.
    pub fn record(&self, id: WorkerId, generation: u64, reason: ExitReason) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match map.get(&id) {
            Some((stored, _)) if *stored > generation => {}
            _ => {
                map.insert(id, (generation, reason));
            }
        }
    }

    pub fn get(&self, id: WorkerId) -> Option<ExitReason> {
        let map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.get(&id).map(|(_, r)| r.clone())
    }

    pub fn forget(&self, id: WorkerId) {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_generation_does_not_overwrite() {
        let board = OutcomeBoard::new();
        let id = WorkerId::new();

        board.record(id, 3, ExitReason::UserStopped);
        board.record(
            id,
            2,
            ExitReason::RelaunchFailed {
                reason: "late".into(),
            },
        );
        assert_eq!(board.get(id), Some(ExitReason::UserStopped));

        board.record(id, 3, ExitReason::Shutdown);
        assert_eq!(board.get(id), Some(ExitReason::Shutdown));

        board.forget(id);
        assert_eq!(board.get(id), None);
    }
}
