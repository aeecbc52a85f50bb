use std::sync::Arc;
use std::time::Duration;

use relay_core::app_config::SyncAction;
use relay_core::config::RelayConfig;
use relay_core::guard::Guard;
use relay_core::handler::HandlerRegistry;
use relay_core::import::{HttpProductSource, ProductImport};
use relay_core::media::{MediaPipeline, StorageClient};
use relay_core::platform::{HttpPlatform, PlatformApi};
use relay_core::store::{MemoryStore, RedbStore, StateStore};
use relay_core::Relay;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    /// Pause before answering a coordination failure.
    pub coordination_error_delay: Duration,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, coordination_error_delay: Duration) -> Self {
        Self {
            relay,
            coordination_error_delay,
        }
    }

    /// Wire the production stack described by `config`.
    pub fn from_config(config: &RelayConfig) -> anyhow::Result<Self> {
        config.guard.validate()?;

        let store: Arc<dyn StateStore> = match &config.server.state_db {
            Some(path) => Arc::new(RedbStore::open(path)?),
            None => {
                tracing::warn!("no state_db configured, running state is kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        let platform: Arc<dyn PlatformApi> = Arc::new(HttpPlatform::new(&config.platform)?);
        let media = Arc::new(MediaPipeline::new(
            Arc::new(StorageClient::new(&config.media)?),
            Duration::from_millis(config.media.retry_delay_ms),
        ));

        let mut registry = HandlerRegistry::new();
        if config.source.base_url.is_some() {
            let source = Arc::new(HttpProductSource::new(&config.source)?);
            registry = registry.register(
                SyncAction::Importation,
                "skus",
                Arc::new(ProductImport::new(source, platform.clone(), media)),
            );
        }
        if registry.is_empty() {
            tracing::warn!("no sync handlers registered, triggers will be acknowledged only");
        }

        let guard = Guard::new(store, config.guard.clone());
        let relay = Relay::new(guard, platform, registry);
        Ok(Self::new(
            Arc::new(relay),
            Duration::from_millis(config.server.coordination_error_delay_ms),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_in_memory_state() {
        let state = AppState::from_config(&RelayConfig::default()).unwrap();
        assert_eq!(state.coordination_error_delay, Duration::from_millis(250));
    }

    #[test]
    fn state_db_path_opens_redb_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RelayConfig::default();
        config.server.state_db = Some(dir.path().join("running.redb"));
        AppState::from_config(&config).unwrap();
        assert!(dir.path().join("running.redb").exists());
    }
}
