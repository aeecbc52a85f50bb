//! Durable running-state storage using redb.
//!
//! A single `RUNNING` table maps store id to the JSON-encoded document.
//! redb serialises write transactions, so the read-modify-write in
//! [`RedbStore::write_blocking`] is the merge critical section.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use super::{StateStore, StoreError};
use crate::running::{RunningPatch, RunningState, WriteMode};

const RUNNING: TableDefinition<&str, &[u8]> = TableDefinition::new("running");

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        let db = Database::create(path).map_err(backend)?;
        // Ensure the table exists before any reads
        let wt = db.begin_write().map_err(backend)?;
        wt.open_table(RUNNING).map_err(backend)?;
        wt.commit().map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn read_blocking(&self, store_id: &str) -> Result<Option<RunningState>, StoreError> {
        let rt = self.db.begin_read().map_err(backend)?;
        let table = rt.open_table(RUNNING).map_err(backend)?;
        let Some(raw) = table.get(store_id).map_err(backend)? else {
            return Ok(None);
        };
        decode(store_id, raw.value()).map(Some)
    }

    pub fn write_blocking(
        &self,
        store_id: &str,
        patch: &RunningPatch,
        mode: WriteMode,
    ) -> Result<RunningState, StoreError> {
        let wt = self.db.begin_write().map_err(backend)?;
        let doc = {
            let mut table = wt.open_table(RUNNING).map_err(backend)?;
            let existing = match table.get(store_id).map_err(backend)? {
                Some(raw) => Some(decode(store_id, raw.value())?),
                None => None,
            };
            let doc = RunningState::write(existing, patch, mode);
            let value = serde_json::to_vec(&doc).map_err(backend)?;
            table.insert(store_id, value.as_slice()).map_err(backend)?;
            doc
        };
        wt.commit().map_err(backend)?;
        Ok(doc)
    }

    /// Every store id with a document, in key order.
    pub fn list_stores(&self) -> Result<Vec<String>, StoreError> {
        let rt = self.db.begin_read().map_err(backend)?;
        let table = rt.open_table(RUNNING).map_err(backend)?;
        let mut ids = Vec::new();
        for entry in table.iter().map_err(backend)? {
            let (k, _) = entry.map_err(backend)?;
            ids.push(k.value().to_string());
        }
        Ok(ids)
    }
}

fn decode(store_id: &str, raw: &[u8]) -> Result<RunningState, StoreError> {
    serde_json::from_slice(raw).map_err(|e| StoreError::Corrupt {
        store_id: store_id.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl StateStore for RedbStore {
    async fn read(&self, store_id: &str) -> Result<Option<RunningState>, StoreError> {
        let this = self.clone();
        let id = store_id.to_string();
        tokio::task::spawn_blocking(move || this.read_blocking(&id))
            .await
            .map_err(|e| StoreError::Backend(format!("task join error: {e}")))?
    }

    async fn write(
        &self,
        store_id: &str,
        patch: &RunningPatch,
        mode: WriteMode,
    ) -> Result<RunningState, StoreError> {
        let this = self.clone();
        let id = store_id.to_string();
        let patch = patch.clone();
        tokio::task::spawn_blocking(move || this.write_blocking(&id, &patch, mode))
            .await
            .map_err(|e| StoreError::Backend(format!("task join error: {e}")))?
    }
}
