use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{OwnerId, PersistedStatus, StoreError, WorkerId, WorkerRecord, WorkerStore};

/// In-process store keyed by worker id.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<WorkerId, WorkerRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify(
        &self,
        id: WorkerId,
        f: impl FnOnce(&mut WorkerRecord),
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let rec = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        f(rec);
        Ok(())
    }
}

#[async_trait]
impl WorkerStore for MemoryStore {
    async fn get_worker(&self, id: WorkerId) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn save_worker(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn update_status(&self, id: WorkerId, status: PersistedStatus) -> Result<(), StoreError> {
        self.modify(id, |r| r.set_status(status)).await
    }

    async fn update_source(&self, id: WorkerId, source: &str) -> Result<(), StoreError> {
        self.modify(id, |r| r.set_source(source)).await
    }

    async fn increment_error_count(&self, id: WorkerId) -> Result<(), StoreError> {
        self.modify(id, WorkerRecord::bump_errors).await
    }

    async fn increment_restart_count(&self, id: WorkerId) -> Result<(), StoreError> {
        self.modify(id, WorkerRecord::bump_restarts).await
    }

    async fn delete_worker(&self, id: WorkerId) -> Result<(), StoreError> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<WorkerRecord>, StoreError> {
        let records = self.records.read().await;
        let mut out: Vec<WorkerRecord> = records
            .values()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }

    async fn list_running(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        let records = self.records.read().await;
        let mut out: Vec<WorkerRecord> = records
            .values()
            .filter(|r| r.status == PersistedStatus::Running)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.id);
        Ok(out)
    }
}
