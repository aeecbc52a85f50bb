//! Shared running-state storage.
//!
//! Provides the `StateStore` contract plus two backends: `MemoryStore` for
//! single-process use and tests, and `RedbStore` for a durable file shared by
//! restarts of the relay.

pub mod memory;
pub mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::running::{RunningPatch, RunningState, WriteMode};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state backend error: {0}")]
    Backend(String),

    #[error("corrupt running-state document for store {store_id}: {reason}")]
    Corrupt { store_id: String, reason: String },
}

/// Key-addressed document store holding one running-state document per store.
///
/// Writes are read-modify-write inside the backend's own critical section;
/// there are no multi-document transactions.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self, store_id: &str) -> Result<Option<RunningState>, StoreError>;

    /// Apply `patch` and return the document as written.
    async fn write(
        &self,
        store_id: &str,
        patch: &RunningPatch,
        mode: WriteMode,
    ) -> Result<RunningState, StoreError>;
}
