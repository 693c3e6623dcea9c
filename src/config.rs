//! Configuration for the opsdeck service

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::queue::{DEFAULT_HISTORY_CAPACITY, FailedItemPolicy};
use crate::registry::{Module, Registry};

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    /// Replaces the built-in module catalog when non-empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite state file
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Wait after reconnecting before draining the queue
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Number of drain summaries kept
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// `drop` or `retain` items whose replay failed
    #[serde(default)]
    pub failed_items: FailedItemPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL queued changes are replayed against
    #[serde(default)]
    pub url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    /// Connectivity assumed at startup
    #[serde(default = "default_initially_online")]
    pub initially_online: bool,

    /// Poll the backend this often to detect connectivity (disabled if unset)
    #[serde(default)]
    pub probe_interval_secs: Option<u64>,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3040
}

fn default_store_path() -> PathBuf {
    PathBuf::from("opsdeck.sqlite")
}

fn default_settle_delay_ms() -> u64 {
    2000
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_initially_online() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            history_capacity: default_history_capacity(),
            failed_items: FailedItemPolicy::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            initially_online: default_initially_online(),
            probe_interval_secs: None,
        }
    }
}

impl SyncConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Default config path
    pub fn default_path() -> Result<PathBuf> {
        // Check environment variable first
        if let Ok(env_path) = std::env::var("OPSDECK_CONFIG") {
            return Ok(PathBuf::from(env_path));
        }

        // Then the working directory
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(local);
        }

        // Fall back to XDG config dir
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("opsdeck");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from default path
    pub fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save config to specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // Add helpful comments

        let with_comments = format!(
            "# opsdeck configuration\n\n\
             {}\n\n\
             # Override the module catalog with [[modules]] entries:\n\
             # [[modules]]\n\
             # id = \"tickets\"\n\
             # title = \"Tickets\"\n\
             # allowed_roles = [\"admin\", \"technician\"]\n",
            content
        );

        std::fs::write(path, with_comments).context("Failed to write config file")?;

        Ok(())
    }

    /// Module catalog: the configured one, or the built-in default
    pub fn registry(&self) -> Result<Registry> {
        if self.modules.is_empty() {
            Ok(Registry::default())
        } else {
            Registry::new(self.modules.clone()).context("Invalid module catalog in config")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Role;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3040);
        assert_eq!(config.sync.settle_delay(), Duration::from_secs(2));
        assert_eq!(config.sync.history_capacity, DEFAULT_HISTORY_CAPACITY);
        assert_eq!(config.sync.failed_items, FailedItemPolicy::Drop);
        assert!(config.connectivity.initially_online);
        assert!(config.backend.url.is_none());
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn sections_and_modules_parse() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            settle_delay_ms = 500
            failed_items = "retain"

            [backend]
            url = "https://backend.example/api"

            [[modules]]
            id = "tickets"
            title = "Tickets"
            allowed_roles = ["technician"]
            "#,
        )
        .unwrap();

        assert_eq!(config.sync.settle_delay_ms, 500);
        assert_eq!(config.sync.failed_items, FailedItemPolicy::Retain);
        assert_eq!(config.backend.timeout(), Duration::from_secs(10));

        let registry = config.registry().unwrap();
        assert_eq!(registry.modules().len(), 1);
        assert_eq!(registry.visible(Role::Admin).count(), 0);
    }

    #[test]
    fn duplicate_configured_modules_rejected() {
        let config: Config = toml::from_str(
            r#"
            [[modules]]
            id = "crm"
            title = "CRM"
            allowed_roles = ["admin"]

            [[modules]]
            id = "crm"
            title = "CRM"
            allowed_roles = ["manager"]
            "#,
        )
        .unwrap();

        assert!(config.registry().is_err());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 4100;
        config.connectivity.probe_interval_secs = Some(15);
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.server.port, 4100);
        assert_eq!(loaded.connectivity.probe_interval_secs, Some(15));
    }
}
