//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl CadenceConfig {
    /// Load config from the default path (~/.cadence/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// Polling scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between due-set scans. Coarse by design — the engine
    /// schedules on multi-minute granularity.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Max registrations picked up per tick. Overflow waits for the next
    /// tick so one overloaded tenant cannot starve the others.
    #[serde(default = "default_scan_batch")]
    pub scan_batch_size: usize,
    /// Worker-pool cap for syncs within one tick.
    #[serde(default = "default_max_syncs")]
    pub max_concurrent_syncs: usize,
}

fn default_tick_secs() -> u64 {
    300
}
fn default_scan_batch() -> usize {
    50
}
fn default_max_syncs() -> usize {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            scan_batch_size: default_scan_batch(),
            max_concurrent_syncs: default_max_syncs(),
        }
    }
}

/// Channel adapter configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub chat: Option<ChatChannelConfig>,
    #[serde(default)]
    pub documents: Option<DocumentProducerConfig>,
    /// Path to the tenant user-directory file (JSON map of
    /// tenant id → external user ref → DM destination).
    #[serde(default)]
    pub directory_path: Option<PathBuf>,
}

/// Workspace-chat channel (message posts and direct messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChannelConfig {
    pub api_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tenant id → workspace token, registered with the chat client at
    /// startup. Tenants can also connect at runtime.
    #[serde(default)]
    pub workspace_tokens: HashMap<String, String>,
}

/// External document producer (render + upload endpoints).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentProducerConfig {
    pub render_url: String,
    pub upload_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Sync provider endpoints, keyed by the provider name that data-source
/// registrations reference.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderEndpointConfig>,
}

/// One external provider's REST endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    pub fetch_url: String,
    /// Shared access token. A per-tenant entry in `tenant_tokens` wins.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub tenant_tokens: HashMap<String, String>,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    CadenceConfig::home_dir().join("cadence.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_true() -> bool {
    true
}
