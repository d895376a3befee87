//! Configuration for the key-value and node storage adapters
//!
//! Both structs deserialize from TOML (or any serde format); every field
//! has a default so partial files are accepted.

use crate::client::{ClientOptions, ReservedThroughput};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Key-value adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStorageConfig {
    /// Service instance name
    pub instance: String,
    /// Table holding the rows
    pub table_name: String,
    /// Passed through to the client constructor
    pub client_options: ClientOptions,
    /// Rows older than this are no longer returned (seconds)
    #[serde(with = "duration_secs_opt")]
    pub default_ttl: Option<Duration>,
    /// Compression strategy name (`zlib` or `zstd`)
    pub compression: Option<String>,
    /// Reserved capacity units of the table
    pub reserved_throughput: ReservedThroughput,
    /// Request chunk sizes
    pub batch: BatchLimits,
}

impl Default for KvStorageConfig {
    fn default() -> Self {
        KvStorageConfig {
            instance: "sentry".to_string(),
            table_name: "nodestore".to_string(),
            client_options: ClientOptions::new(),
            default_ttl: None,
            compression: None,
            reserved_throughput: ReservedThroughput::default(),
            batch: BatchLimits::default(),
        }
    }
}

impl KvStorageConfig {
    pub fn new(instance: impl Into<String>, table_name: impl Into<String>) -> Self {
        KvStorageConfig {
            instance: instance.into(),
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn with_compression(mut self, name: impl Into<String>) -> Self {
        self.compression = Some(name.into());
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&contents)
    }
}

/// Request chunk sizes imposed by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    /// Rows per batch-get request (default: 100)
    pub max_batch_get: usize,
    /// Rows per batch-write request (default: 200)
    pub max_batch_write: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        BatchLimits {
            max_batch_get: 100,
            max_batch_write: 200,
        }
    }
}

/// `compression = true | false | "zlib" | "zstd"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompressionOption {
    Enabled(bool),
    Named(String),
}

impl Default for CompressionOption {
    fn default() -> Self {
        CompressionOption::Enabled(false)
    }
}

impl CompressionOption {
    /// Strategy name to use; `true` means zlib
    pub fn strategy_name(&self) -> Option<String> {
        match self {
            CompressionOption::Enabled(true) => Some("zlib".to_string()),
            CompressionOption::Enabled(false) => None,
            CompressionOption::Named(name) => Some(name.clone()),
        }
    }
}

/// Node storage configuration
///
/// Unrecognised keys are collected as client options, keeping their TOML
/// type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeStorageConfig {
    pub instance: String,
    pub table: String,
    /// Let the table expire rows server-side; reads check the TTL either way
    pub automatic_expiry: bool,
    /// How long nodes are kept and considered valid (seconds)
    #[serde(with = "duration_secs_opt")]
    pub default_ttl: Option<Duration>,
    pub compression: CompressionOption,
    pub reserved_throughput: Option<ReservedThroughput>,
    #[serde(flatten)]
    pub client_options: ClientOptions,
}

impl Default for NodeStorageConfig {
    fn default() -> Self {
        NodeStorageConfig {
            instance: "sentry".to_string(),
            table: "nodestore".to_string(),
            automatic_expiry: false,
            default_ttl: None,
            compression: CompressionOption::default(),
            reserved_throughput: None,
            client_options: ClientOptions::new(),
        }
    }
}

impl NodeStorageConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Parse)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&contents)
    }

    /// Key-value configuration backing this node storage
    pub fn to_kv_config(&self) -> KvStorageConfig {
        KvStorageConfig {
            instance: self.instance.clone(),
            table_name: self.table.clone(),
            client_options: self.client_options.clone(),
            default_ttl: self.default_ttl,
            compression: self.compression.strategy_name(),
            reserved_throughput: self.reserved_throughput.unwrap_or_default(),
            batch: BatchLimits::default(),
        }
    }
}

/// Error loading a configuration file
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde helper for Option<Duration> as whole seconds
mod duration_secs_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
