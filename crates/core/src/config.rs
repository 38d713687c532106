//! Node configuration
//!
//! Supports a YAML config file plus environment variable overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::node::NodeRole;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "NODEMESH_";

/// Config file name inside the base directory
pub const CONFIG_FILE: &str = "node.yaml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parse failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Main node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this node inside the subnet
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub subnet_id: Option<String>,

    #[serde(default)]
    pub role: NodeRole,

    /// Where members look nodes up
    #[serde(default)]
    pub hub_url: Option<String>,

    /// Address other nodes use to reach this one
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub hostname: Option<String>,

    /// Value of the `X-AdaOS-Token` header on node-to-node calls
    #[serde(default = "default_token")]
    pub token: String,

    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_node_id() -> String {
    "local".to_string()
}

fn default_token() -> String {
    "dev-local-token".to_string()
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".nodemesh"))
        .unwrap_or_else(|| PathBuf::from(".nodemesh"))
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            subnet_id: None,
            role: NodeRole::default(),
            hub_url: None,
            base_url: None,
            hostname: None,
            token: default_token(),
            base_dir: default_base_dir(),
            router: RouterConfig::default(),
            directory: DirectoryConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Rules file; defaults to `<base_dir>/router/rules.yaml`
    #[serde(default)]
    pub rules_file: Option<PathBuf>,

    /// Timeout for relay and hub lookup calls (ms)
    #[serde(default = "default_relay_timeout_ms")]
    pub relay_timeout_ms: u64,

    /// How often the rules file is polled for changes (ms)
    #[serde(default = "default_watch_interval_ms")]
    pub watch_interval_ms: u64,
}

fn default_relay_timeout_ms() -> u64 {
    2500
}

fn default_watch_interval_ms() -> u64 {
    1000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            rules_file: None,
            relay_timeout_ms: default_relay_timeout_ms(),
            watch_interval_ms: default_watch_interval_ms(),
        }
    }
}

impl RouterConfig {
    pub fn rules_path(&self, base_dir: &Path) -> PathBuf {
        self.rules_file
            .clone()
            .unwrap_or_else(|| base_dir.join("router").join("rules.yaml"))
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms.max(1))
    }
}

/// Presence directory configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Silence after which a node counts as offline (s)
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Period of the background staleness sweep (s)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    45
}

fn default_sweep_interval_secs() -> u64 {
    15
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl DirectoryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Sqlite,
}

/// Registry storage configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub storage_type: StorageType,

    /// Database path; defaults to `<base_dir>/registry.db`
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn db_path(&self, base_dir: &Path) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| base_dir.join("registry.db"))
    }
}

impl NodeConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load configuration from `path`, or from `<base_dir>/node.yaml` when no
    /// path is given, then apply process environment overrides.
    ///
    /// An explicit path must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`NodeConfig::load`] with a custom environment lookup
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let base_dir = lookup(&env_key("BASE_DIR"))
                    .map(PathBuf::from)
                    .unwrap_or_else(default_base_dir);
                let candidate = base_dir.join(CONFIG_FILE);
                candidate.exists().then_some(candidate)
            }
        };

        let mut config = match file {
            Some(file) => {
                let content = std::fs::read_to_string(&file).map_err(|source| ConfigError::Io {
                    path: file.clone(),
                    source,
                })?;
                tracing::debug!(path = %file.display(), "loaded node config");
                Self::from_yaml_str(&content)?
            }
            None => Self::default(),
        };

        config.apply_env_with(lookup)?;
        Ok(config)
    }

    /// Apply `NODEMESH_*` overrides
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup(&env_key("NODE_ID")).filter(|v| !v.is_empty()) {
            self.node_id = node_id;
        }
        if let Some(role) = lookup(&env_key("ROLE")).filter(|v| !v.is_empty()) {
            self.role = role.parse().map_err(|reason| ConfigError::InvalidValue {
                key: env_key("ROLE"),
                reason,
            })?;
        }
        if let Some(hub_url) = lookup(&env_key("HUB_URL")).filter(|v| !v.is_empty()) {
            self.hub_url = Some(hub_url);
        }
        if let Some(token) = lookup(&env_key("TOKEN")).filter(|v| !v.is_empty()) {
            self.token = token;
        }
        if let Some(base_dir) = lookup(&env_key("BASE_DIR")).filter(|v| !v.is_empty()) {
            self.base_dir = PathBuf::from(base_dir);
        }
        Ok(())
    }

    pub fn is_hub(&self) -> bool {
        self.role == NodeRole::Hub
    }

    pub fn rules_path(&self) -> PathBuf {
        self.router.rules_path(&self.base_dir)
    }

    pub fn scenarios_dir(&self) -> PathBuf {
        self.base_dir.join("scenarios")
    }
}

fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}
