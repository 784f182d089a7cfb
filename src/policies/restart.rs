//! # Restart policy for crashed workers.
//!
//! [`RestartPolicy`] decides whether a crashed worker is relaunched, given the
//! length of its current crash streak. The streak itself is kept by a
//! [`CrashLedger`] owned by the worker's actor.
//!
//! ```text
//! RestartPolicy::Never                              → first crash is terminal
//! RestartPolicy::OnCrash { ceiling: 5, window: None }
//!     → crashes 1..=4 are relaunched, the 5th is terminal
//! RestartPolicy::OnCrash { ceiling: 5, window: Some(10min) }
//!     → only crashes in the trailing 10 minutes count toward the ceiling
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Default number of crashes after which a worker is left stopped.
pub const DEFAULT_RESTART_CEILING: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never relaunch automatically.
    Never,
    /// Relaunch while the crash streak stays below `ceiling`.
    OnCrash {
        ceiling: u32,
        /// Only crashes within this trailing window count. `None` counts
        /// every crash since the last explicit start.
        window: Option<Duration>,
    },
}

impl Default for RestartPolicy {
    /// `OnCrash { ceiling: 5, window: None }`.
    fn default() -> Self {
        RestartPolicy::OnCrash {
            ceiling: DEFAULT_RESTART_CEILING,
            window: None,
        }
    }
}

impl RestartPolicy {
    /// True if a worker whose crash streak just reached `streak` may be relaunched.
    pub fn allows(&self, streak: u32) -> bool {
        match *self {
            RestartPolicy::Never => false,
            RestartPolicy::OnCrash { ceiling, .. } => streak < ceiling,
        }
    }

    pub fn window(&self) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::OnCrash { window, .. } => window,
        }
    }

    /// Fresh ledger configured for this policy.
    pub fn ledger(&self) -> CrashLedger {
        CrashLedger::new(self.window())
    }
}

/// Crash timestamps of one supervision run.
#[derive(Debug, Clone)]
pub struct CrashLedger {
    window: Option<Duration>,
    crashes: VecDeque<Instant>,
}

impl CrashLedger {
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            crashes: VecDeque::new(),
        }
    }

    /// Records a crash at `now` and returns the resulting streak.
    pub fn record(&mut self, now: Instant) -> u32 {
        self.crashes.push_back(now);
        self.prune(now);
        self.streak()
    }

    /// Crashes currently counted toward the ceiling.
    pub fn streak(&self) -> u32 {
        u32::try_from(self.crashes.len()).unwrap_or(u32::MAX)
    }

    fn prune(&mut self, now: Instant) {
        let Some(window) = self.window else {
            return;
        };
        while let Some(&oldest) = self.crashes.front() {
            if now.saturating_duration_since(oldest) > window {
                self.crashes.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_exclusive() {
        let p = RestartPolicy::OnCrash {
            ceiling: 3,
            window: None,
        };
        assert!(p.allows(1));
        assert!(p.allows(2));
        assert!(!p.allows(3));
        assert!(!p.allows(4));
        assert!(!RestartPolicy::Never.allows(1));
    }

    #[test]
    fn lifetime_ledger_never_forgets() {
        let mut ledger = CrashLedger::new(None);
        let t0 = Instant::now();
        assert_eq!(ledger.record(t0), 1);
        assert_eq!(ledger.record(t0 + Duration::from_secs(3600)), 2);
        assert_eq!(ledger.record(t0 + Duration::from_secs(7200)), 3);
    }

    #[test]
    fn windowed_ledger_drops_old_crashes() {
        let mut ledger = CrashLedger::new(Some(Duration::from_secs(60)));
        let t0 = Instant::now();
        assert_eq!(ledger.record(t0), 1);
        assert_eq!(ledger.record(t0 + Duration::from_secs(30)), 2);
        assert_eq!(ledger.record(t0 + Duration::from_secs(80)), 2);
        assert_eq!(ledger.record(t0 + Duration::from_secs(300)), 1);
    }
}
