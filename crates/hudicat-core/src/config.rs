//! Configuration structures for hudicat.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Catalog behaviour
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Hive Metastore connection
    pub metastore: MetastoreConfig,

    /// Object storage used to read Hudi timelines
    #[serde(default)]
    pub storage: StorageConfig,

    /// Resolved table cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Catalog-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog name reported on every schema
    #[serde(default = "default_catalog_name")]
    pub name: String,

    /// Only list tables that carry a Hudi marker
    #[serde(default)]
    pub list_hudi_tables_only: bool,

    /// Warehouse root used when a new schema has no explicit location
    #[serde(default)]
    pub warehouse_path: Option<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            name: default_catalog_name(),
            list_hudi_tables_only: false,
            warehouse_path: None,
        }
    }
}

/// Metastore backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MetastoreBackend {
    /// Hive Metastore over Thrift
    #[default]
    Hms,
    /// Process-local metastore (tests, demos)
    Memory,
}

/// Hive Metastore connection configuration.
///
/// Controls connection pooling, retries and the circuit breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetastoreConfig {
    /// Backend type
    #[serde(default)]
    pub backend: MetastoreBackend,

    /// Metastore URI (thrift://host:port)
    #[serde(default)]
    pub uri: Option<String>,

    /// Maximum number of concurrently leased connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a request waits for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Per-RPC timeout in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Maximum number of retries for idempotent reads
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before each retry in milliseconds (last value repeats)
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: Vec<u64>,

    /// Number of partitions fetched per Metastore round trip
    #[serde(default = "default_partition_batch_size")]
    pub partition_batch_size: usize,

    /// Consecutive transport failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Seconds the circuit stays open before probing again
    #[serde(default = "default_circuit_reset_seconds")]
    pub circuit_reset_seconds: u64,
}

impl Default for MetastoreConfig {
    fn default() -> Self {
        Self {
            backend: MetastoreBackend::default(),
            uri: None,
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            request_timeout_seconds: default_request_timeout_seconds(),
            max_retries: default_max_retries(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            partition_batch_size: default_partition_batch_size(),
            circuit_failure_threshold: default_failure_threshold(),
            circuit_reset_seconds: default_circuit_reset_seconds(),
        }
    }
}

impl MetastoreConfig {
    /// Connection acquisition timeout.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Per-RPC timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let ms = self
            .reconnect_backoff_ms
            .get(attempt)
            .or_else(|| self.reconnect_backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// Object storage configuration for timeline reads.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// AWS region
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub s3_endpoint: Option<String>,

    /// Extra object_store options passed through verbatim
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl StorageConfig {
    /// Flatten into object_store option pairs.
    pub fn to_options(&self) -> HashMap<String, String> {
        let mut options = self.options.clone();
        if let Some(region) = &self.aws_region {
            options.insert("aws_region".into(), region.clone());
        }
        if let Some(key) = &self.aws_access_key_id {
            options.insert("aws_access_key_id".into(), key.clone());
        }
        if let Some(secret) = &self.aws_secret_access_key {
            options.insert("aws_secret_access_key".into(), secret.clone());
        }
        if let Some(endpoint) = &self.s3_endpoint {
            options.insert("aws_endpoint".into(), endpoint.clone());
            if endpoint.starts_with("http://") {
                options.insert("aws_allow_http".into(), "true".into());
            }
        }
        options
    }
}

/// Resolved table cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache resolved tables
    #[serde(default)]
    pub enabled: bool,

    /// Time-to-live for a resolved table in seconds
    #[serde(default = "default_table_ttl_seconds")]
    pub table_ttl_seconds: u64,

    /// Maximum number of cached tables
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            table_ttl_seconds: default_table_ttl_seconds(),
            max_entries: default_max_entries(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive string for an env filter.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_catalog_name() -> String {
    "hudi".to_string()
}
fn default_pool_size() -> usize {
    5
}
fn default_acquire_timeout_ms() -> u64 {
    5000
}
fn default_request_timeout_seconds() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_reconnect_backoff_ms() -> Vec<u64> {
    vec![100, 500, 2000, 5000]
}
fn default_partition_batch_size() -> usize {
    100
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_circuit_reset_seconds() -> u64 {
    30
}
fn default_table_ttl_seconds() -> u64 {
    60
}
fn default_max_entries() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.catalog.name.is_empty() {
            return Err(crate::Error::Config("Catalog name is required".into()));
        }

        if self.metastore.backend == MetastoreBackend::Hms {
            match &self.metastore.uri {
                None => {
                    return Err(crate::Error::Config(
                        "Hive Metastore backend requires metastore.uri".into(),
                    ))
                }
                Some(uri) if uri.is_empty() => {
                    return Err(crate::Error::Config(
                        "Hive Metastore backend requires metastore.uri".into(),
                    ))
                }
                Some(_) => {}
            }
        }

        if self.metastore.pool_size == 0 {
            return Err(crate::Error::Config(
                "metastore.pool_size must be at least 1".into(),
            ));
        }

        if self.metastore.partition_batch_size == 0 || self.metastore.partition_batch_size > 32767
        {
            return Err(crate::Error::Config(
                "metastore.partition_batch_size must be between 1 and 32767".into(),
            ));
        }

        if self.metastore.reconnect_backoff_ms.is_empty() && self.metastore.max_retries > 0 {
            tracing::warn!(
                max_retries = self.metastore.max_retries,
                "Retries configured without backoff; reads will retry immediately"
            );
        }

        if self.cache.enabled && self.cache.table_ttl_seconds == 0 {
            return Err(crate::Error::Config(
                "cache.table_ttl_seconds must be positive when the cache is enabled".into(),
            ));
        }

        Ok(())
    }
}
