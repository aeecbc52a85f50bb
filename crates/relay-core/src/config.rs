use crate::platform::StoreAuth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid config value: {0}")]
    Invalid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

// ---------------------------------------------------------------------------
// GuardConfig
// ---------------------------------------------------------------------------

/// Arbitration thresholds. All values are empirical; keep them tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// A running-state document younger than this is trusted as live.
    #[serde(default = "default_fresh_window_ms")]
    pub fresh_window_ms: u64,
    /// A document older than this is treated as abandoned and replaced.
    #[serde(default = "default_stale_ceiling_ms")]
    pub stale_ceiling_ms: u64,
    /// Abandon when more than this many triggers are already running.
    #[serde(default = "default_max_running")]
    pub max_running: u32,
    /// Minimum spacing between two admissions of the same resource key.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
    /// Re-check delay per trigger already running.
    #[serde(default = "default_recheck_step_ms")]
    pub recheck_step_ms: u64,
}

fn default_fresh_window_ms() -> u64 {
    15_000
}

fn default_stale_ceiling_ms() -> u64 {
    60_000
}

fn default_max_running() -> u32 {
    3
}

fn default_min_spacing_ms() -> u64 {
    1_000
}

fn default_recheck_step_ms() -> u64 {
    1_500
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            fresh_window_ms: default_fresh_window_ms(),
            stale_ceiling_ms: default_stale_ceiling_ms(),
            max_running: default_max_running(),
            min_spacing_ms: default_min_spacing_ms(),
            recheck_step_ms: default_recheck_step_ms(),
        }
    }
}

impl GuardConfig {
    pub fn fresh_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.fresh_window_ms as i64)
    }

    pub fn stale_ceiling(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.stale_ceiling_ms as i64)
    }

    pub fn min_spacing(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.min_spacing_ms as i64)
    }

    pub fn recheck_delay(&self, running: u32) -> Duration {
        Duration::from_millis(self.recheck_step_ms.saturating_mul(running as u64))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fresh_window_ms > self.stale_ceiling_ms {
            return Err(ConfigError::Invalid(format!(
                "guard.fresh_window_ms ({}) must not exceed guard.stale_ceiling_ms ({})",
                self.fresh_window_ms, self.stale_ceiling_ms
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MediaConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_storage_url")]
    pub storage_base_url: String,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_storage_url() -> String {
    "https://apx-storage.e-com.plus".to_string()
}

fn default_upload_timeout_secs() -> u64 {
    35
}

fn default_retry_delay_ms() -> u64 {
    700
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            storage_base_url: default_storage_url(),
            upload_timeout_secs: default_upload_timeout_secs(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// PlatformConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_url")]
    pub api_base_url: String,
    /// Platform id of this application; its hidden data holds per-store settings.
    #[serde(default)]
    pub application_id: String,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
    /// Credentials keyed by store id.
    #[serde(default)]
    pub stores: HashMap<String, StoreAuth>,
}

fn default_api_url() -> String {
    "https://api.e-com.plus/v1".to_string()
}

fn default_api_timeout_secs() -> u64 {
    30
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_url(),
            application_id: String::new(),
            timeout_secs: default_api_timeout_secs(),
            stores: HashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

/// Where the product import handler reads source products from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_api_timeout_secs")]
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// redb file for running-state documents. In-memory when unset.
    #[serde(default)]
    pub state_db: Option<PathBuf>,
    /// Delay before answering 502 so the platform does not re-deliver hot.
    #[serde(default = "default_coordination_error_delay_ms")]
    pub coordination_error_delay_ms: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_coordination_error_delay_ms() -> u64 {
    250
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            state_db: None,
            coordination_error_delay_ms: default_coordination_error_delay_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// RelayConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = serde_yaml::from_str(data)?;
        config.guard.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
