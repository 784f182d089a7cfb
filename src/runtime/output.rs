use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Default number of output lines kept per worker.
pub const DEFAULT_OUTPUT_LINES: usize = 200;

/// Ring buffer of a worker's most recent stdout/stderr lines.
///
/// Survives relaunches: the supervisor hands the same log to every attempt,
/// so `logs()` after a crash still shows what the previous attempt printed.
#[derive(Debug)]
pub struct OutputLog {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl OutputLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let mut lines = self.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    /// Up to `limit` most recent lines, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<String> {
        let lines = self.lock();
        let skip = lines.len().saturating_sub(limit);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Tail joined into one string, for error reports.
    pub fn tail_text(&self, limit: usize) -> String {
        self.tail(limit).join("\n")
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<String>> {
        // A pump that panicked mid-push leaves a consistent deque behind.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_LINES)
    }
}
