// src/recovery.rs

use crate::models::{TaskId, TaskState};
use crate::saver::{DiskSaver, SaveError, SaveReport};
use crate::store::{StoreError, TaskStore};
use tracing::{info, warn};

/// A stored transfer whose file was never confirmed saved.
#[derive(Debug, Clone, PartialEq)]
pub struct Recoverable {
    pub id: TaskId,
    pub filename: String,
    pub mime_type: String,
    pub total_bytes: u64,
    /// Last known state, `None` when no progress record survived.
    pub state: Option<TaskState>,
}

/// Finds chunk records left behind by an earlier run and offers them for save or discard.
pub struct RecoveryScanner {
    store: TaskStore,
}

impl RecoveryScanner {
    pub fn new(store: TaskStore) -> Self {
        Self { store }
    }

    /// Lists recoverable records, oldest first.
    ///
    /// A record is recoverable unless its progress record says the file was
    /// saved. Saved records whose release was cut short are deleted here.
    pub async fn scan(&self) -> Result<Vec<Recoverable>, StoreError> {
        let mut found = Vec::new();
        for id in self.store.list_chunk_ids().await? {
            let progress = self.store.load_progress(id).await?;
            if progress.as_ref().is_some_and(|p| p.saved) {
                info!(task_id = id, "releasing chunks of an already saved task");
                self.store.delete_chunks(id).await?;
                continue;
            }
            let Some(info) = self.store.chunk_info(id).await? else {
                continue;
            };
            found.push(Recoverable {
                id,
                filename: info.filename,
                mime_type: info.mime_type,
                total_bytes: info.total_bytes,
                state: progress.map(|p| p.snapshot.state),
            });
        }
        if !found.is_empty() {
            warn!(count = found.len(), "found unsaved downloads");
        }
        Ok(found)
    }

    /// Saves a recoverable record through the same path as a normal completion.
    pub async fn save(&self, saver: &DiskSaver, id: TaskId) -> Result<SaveReport, SaveError> {
        info!(task_id = id, "recovering download");
        saver.save(id).await
    }

    /// Drops a record without saving it. Returns `false` if there was nothing to drop.
    pub async fn discard(&self, id: TaskId) -> Result<bool, StoreError> {
        if self.store.chunk_info(id).await?.is_none() {
            return Ok(false);
        }
        self.store.delete_chunks(id).await?;
        info!(task_id = id, "download discarded");
        Ok(true)
    }
}
