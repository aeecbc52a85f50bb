use anyhow::Result;
use relay_core::RelayConfig;
use relay_server::AppState;
use std::path::Path;

pub fn run(config_path: Option<&Path>, port: Option<u16>) -> Result<()> {
    let config = RelayConfig::load_or_default(config_path)?;
    let port = port.unwrap_or(config.server.port);
    let state = AppState::from_config(&config)?;

    if config.platform.stores.is_empty() {
        tracing::warn!("no store credentials configured, every trigger will fail upstream");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(relay_server::serve(state, port))
}
