//! Synchronization handler contract and registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::app_config::{AppConfig, Namespace, SyncAction};
use crate::media::MediaError;
use crate::platform::{PlatformError, StoreAuth};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("source system error: {0}")]
    Source(String),
}

/// Tenant context a handler runs under.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub store_id: String,
    pub auth: StoreAuth,
}

/// One unit of work picked by the resolver: the head id of one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub namespace: Namespace,
    pub queue: String,
    pub id: String,
    pub allow_create: bool,
    /// Taken from the store's persisted queues rather than built from the trigger.
    pub from_app_queue: bool,
}

impl WorkItem {
    /// Work drained from a hidden (re-queued) namespace.
    pub fn is_requeue(&self) -> bool {
        self.namespace.is_hidden()
    }
}

/// Performs the cross-system write for one work item.
///
/// Handlers may push follow-up ids into hidden queues of `app`; the caller
/// persists `app` when it changed.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &SyncContext,
        work: &WorkItem,
        app: &mut AppConfig,
    ) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(SyncAction, String), Arc<dyn SyncHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `queue` (matched case-insensitively) under `action`.
    pub fn register(
        mut self,
        action: SyncAction,
        queue: &str,
        handler: Arc<dyn SyncHandler>,
    ) -> Self {
        self.handlers
            .insert((action, queue.to_lowercase()), handler);
        self
    }

    pub fn get(&self, action: SyncAction, queue: &str) -> Option<Arc<dyn SyncHandler>> {
        self.handlers
            .get(&(action, queue.to_lowercase()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(action, queue)| format!("{}/{}", action.as_str(), queue))
            .collect();
        keys.sort();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &keys)
            .finish()
    }
}
