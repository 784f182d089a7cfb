//! JSON-file backed store.
//!
//! The whole collection lives in memory and every mutation rewrites the file:
//! serialize to `<path>.tmp`, then rename over `<path>`. Good for a single
//! host with a few thousand workers; swap in a database-backed
//! [`WorkerStore`] beyond that.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{OwnerId, PersistedStatus, StoreError, WorkerId, WorkerRecord, WorkerStore};

pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<BTreeMap<WorkerId, WorkerRecord>>,
}

impl JsonFileStore {
    /// Opens (or creates on first write) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => {
                let list: Vec<WorkerRecord> = serde_json::from_slice(&bytes)?;
                list.into_iter().map(|r| (r.id, r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), workers = records.len(), "worker store opened");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &BTreeMap<WorkerId, WorkerRecord>) -> Result<(), StoreError> {
        let list: Vec<&WorkerRecord> = records.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn modify(
        &self,
        id: WorkerId,
        f: impl FnOnce(&mut WorkerRecord),
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut rec = records.get(&id).cloned().ok_or(StoreError::NotFound(id))?;
        f(&mut rec);
        self.commit(&mut records, |staged| {
            staged.insert(id, rec);
        })
        .await
    }

    /// Applies `change` to a copy of the map; the copy replaces `records` only
    /// once it is on disk.
    async fn commit(
        &self,
        records: &mut BTreeMap<WorkerId, WorkerRecord>,
        change: impl FnOnce(&mut BTreeMap<WorkerId, WorkerRecord>),
    ) -> Result<(), StoreError> {
        let mut staged = records.clone();
        change(&mut staged);
        self.persist(&staged).await?;
        *records = staged;
        Ok(())
    }

    async fn filtered(&self, keep: impl Fn(&WorkerRecord) -> bool) -> Vec<WorkerRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkerStore for JsonFileStore {
    async fn get_worker(&self, id: WorkerId) -> Result<Option<WorkerRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn save_worker(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        self.commit(&mut records, |staged| {
            staged.insert(record.id, record.clone());
        })
        .await
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
        let mut records = self.records.write().await;
        if !records.contains_key(&id) {
            return Ok(());
        }
        self.commit(&mut records, |staged| {
            staged.remove(&id);
        })
        .await
    }

    async fn list_by_owner(&self, owner: OwnerId) -> Result<Vec<WorkerRecord>, StoreError> {
        Ok(self.filtered(|r| r.owner == owner).await)
    }

    async fn list_running(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        Ok(self
            .filtered(|r| r.status == PersistedStatus::Running)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use crate::runtime::RuntimeKind;

    #[tokio::test]
    async fn records_survive_reopen_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.json");
        let ascii = "while true; do sleep 1; done\n";
        let unicode = "# 日本語のコメント\necho \"Grüße, мир 🚀\"\n";

        let store = JsonFileStore::open(&path).await.unwrap();
        let a = WorkerRecord::new(OwnerId(1), RuntimeKind::Shell, ascii, Credential::new("1:a"));
        let b = WorkerRecord::new(OwnerId(1), RuntimeKind::Shell, unicode, Credential::new("1:b"));
        store.save_worker(&a).await.unwrap();
        store.save_worker(&b).await.unwrap();
        store
            .update_status(b.id, PersistedStatus::Running)
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let a2 = reopened.get_worker(a.id).await.unwrap().unwrap();
        let b2 = reopened.get_worker(b.id).await.unwrap().unwrap();
        assert_eq!(a2.source.as_bytes(), ascii.as_bytes());
        assert_eq!(b2.source.as_bytes(), unicode.as_bytes());
        assert_eq!(b2.credential.expose(), "1:b");

        let running = reopened.list_running().await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);
    }

    #[tokio::test]
    async fn delete_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workers.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        let rec = WorkerRecord::new(
            OwnerId(3),
            RuntimeKind::Node,
            "console.log('hi')",
            Credential::new("3:x"),
        );
        store.save_worker(&rec).await.unwrap();
        store.delete_worker(rec.id).await.unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).await.unwrap();
        assert!(reopened.get_worker(rec.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workers.json");
        let store = JsonFileStore::open(&path).await.unwrap();
        let rec = WorkerRecord::new(OwnerId(4), RuntimeKind::Shell, "sleep 1", Credential::new("4:x"));
        store.save_worker(&rec).await.unwrap();

        // A non-empty directory in place of the file makes the rename fail.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), b"").unwrap();

        assert!(store
            .update_status(rec.id, PersistedStatus::Running)
            .await
            .is_err());
        assert!(store.increment_error_count(rec.id).await.is_err());
        let after = store.get_worker(rec.id).await.unwrap().unwrap();
        assert_eq!(after.status, rec.status);
        assert_eq!(after.error_count, 0);
        assert!(store.list_running().await.unwrap().is_empty());

        assert!(store.delete_worker(rec.id).await.is_err());
        assert!(store.get_worker(rec.id).await.unwrap().is_some());
    }
}
