//! Per-worker operation locks.
//!
//! Lifecycle calls on the same id run one at a time (tokio mutexes are FIFO,
//! so a `stop` queued behind an in-flight `start` runs after it finishes).
//! Calls on different ids never contend. Entries whose lock nobody holds are
//! pruned lazily.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::store::WorkerId;

const PRUNE_THRESHOLD: usize = 256;

#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<WorkerId, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, id: WorkerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            if map.len() >= PRUNE_THRESHOLD {
                // Only the map itself references an idle entry.
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }
}
