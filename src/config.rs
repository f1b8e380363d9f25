//! WolfReplica Configuration
//!
//! This module provides configuration structures for a replica node.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::replica_name;
use crate::replication::ReplicaLocation;

/// Main WolfReplica configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Transport configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Transaction buffer configuration
    #[serde(default)]
    pub transactions: TransactionConfig,

    /// Naming registry
    #[serde(default)]
    pub registry: RegistryConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Replica identifier
    pub id: u32,

    /// Address to bind for client, peer and control calls
    pub bind_address: String,

    /// Data directory; files live under `<data_dir>/Replica<id>`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Advertised address for other nodes to connect
    #[serde(default)]
    pub advertise_address: Option<String>,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request timeout in milliseconds (0 = wait indefinitely)
    #[serde(default)]
    pub request_timeout_ms: u64,
}

/// Transaction buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Drop transactions idle for this many seconds (0 = never)
    #[serde(default)]
    pub idle_timeout_secs: u64,

    /// How often to look for idle transactions
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

/// Static naming registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Known replicas
    #[serde(default)]
    pub replicas: Vec<ReplicaLocation>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP status API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfreplica")
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_reap_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: 0,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 0,
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                id: 1,
                bind_address: "0.0.0.0:7700".to_string(),
                data_dir: default_data_dir(),
                advertise_address: None,
            },
            network: NetworkConfig::default(),
            transactions: TransactionConfig::default(),
            registry: RegistryConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `None` when requests may wait indefinitely
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

impl ReplicaConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: ReplicaConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if self.node.data_dir.as_os_str().is_empty() {
            return Err(crate::Error::Config("node.data_dir cannot be empty".into()));
        }

        if self.transactions.idle_timeout_secs > 0 && self.transactions.reap_interval_secs == 0 {
            return Err(crate::Error::Config(
                "transactions.reap_interval_secs must be positive when idle_timeout_secs is set".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for replica in &self.registry.replicas {
            if !seen.insert(replica.id) {
                return Err(crate::Error::Config(format!(
                    "registry lists replica {} more than once",
                    replica.id
                )));
            }
        }

        Ok(())
    }

    /// Get the advertised address (or bind address if not set)
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// This node's location
    pub fn location(&self) -> ReplicaLocation {
        ReplicaLocation::new(self.node.id, self.advertise_address())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.node.data_dir
    }

    /// Directory holding this node's files
    pub fn storage_dir(&self) -> PathBuf {
        self.node.data_dir.join(replica_name(self.node.id))
    }

    /// Idle limit for open transactions, if reaping is enabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.transactions.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.transactions.idle_timeout_secs))
    }

    /// Interval between idle-transaction sweeps
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.transactions.reap_interval_secs)
    }
}
