use super::{StateStore, StoreError};
use crate::running::{RunningPatch, RunningState, WriteMode};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, RunningState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a document verbatim, bypassing merge semantics.
    pub fn insert(&self, store_id: impl Into<String>, doc: RunningState) {
        self.lock().insert(store_id.into(), doc);
    }

    pub fn get(&self, store_id: &str) -> Option<RunningState> {
        self.lock().get(store_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RunningState>> {
        self.docs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn read(&self, store_id: &str) -> Result<Option<RunningState>, StoreError> {
        Ok(self.get(store_id))
    }

    async fn write(
        &self,
        store_id: &str,
        patch: &RunningPatch,
        mode: WriteMode,
    ) -> Result<RunningState, StoreError> {
        let mut docs = self.lock();
        let existing = docs.remove(store_id);
        let doc = RunningState::write(existing, patch, mode);
        docs.insert(store_id.to_string(), doc.clone());
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::running::CountUpdate;
    use crate::trigger::ResourceKey;
    use chrono::Utc;

    #[tokio::test]
    async fn read_of_unknown_store_is_none() {
        let store = MemoryStore::new();
        assert!(store.read("1011").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_are_isolated_per_store() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let key = ResourceKey::new("products", "p1");
        store
            .write(
                "1011",
                &RunningPatch::at(now).count(CountUpdate::Set(2)).init(&key, now),
                WriteMode::Merge,
            )
            .await
            .unwrap();

        assert_eq!(store.read("1011").await.unwrap().unwrap().count, 2);
        assert!(store.read("2022").await.unwrap().is_none());
    }
}
