//! Hive Metastore access.
//!
//! This module defines the seam between the catalog and the Metastore:
//!
//! - [`MetastoreClient`]: one connection's worth of Metastore RPCs
//! - [`MetastoreConnector`]: opens new connections for the pool
//! - [`ConnectionPool`]: bounded, timeout-guarded connection reuse
//! - [`MetastoreAdapter`]: pooled access with read retries and a circuit breaker
//!
//! Two backends implement the client trait: [`ThriftConnector`] talks to a
//! real Metastore through the `hive_metastore` crate, and
//! [`InMemoryMetastore`] keeps everything in process for tests and demos.

pub mod adapter;
pub mod memory;
pub mod pool;
pub mod thrift;

pub use adapter::{CatalogHealth, MetastoreAdapter};
pub use memory::InMemoryMetastore;
pub use pool::{AcquireError, ConnectionPool, PoolStats, PooledConnection};
pub use thrift::ThriftConnector;

use crate::config::{MetastoreBackend, MetastoreConfig};
use crate::error::{Entity, MetadataError};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Metastore `tableType` for managed tables.
pub const MANAGED_TABLE: &str = "MANAGED_TABLE";
/// Metastore `tableType` for external tables.
pub const EXTERNAL_TABLE: &str = "EXTERNAL_TABLE";
/// Metastore `tableType` for views.
pub const VIRTUAL_VIEW: &str = "VIRTUAL_VIEW";

/// A Metastore database as returned by `get_database`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawDatabase {
    pub name: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub parameters: HashMap<String, String>,
    pub owner: Option<String>,
}

/// A column descriptor (`FieldSchema`).
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub name: String,
    /// Hive type string
    pub type_name: String,
    pub comment: Option<String>,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            comment: None,
        }
    }
}

/// A Metastore table as returned by `get_table`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub database: String,
    pub name: String,
    pub owner: Option<String>,
    /// `MANAGED_TABLE`, `EXTERNAL_TABLE` or `VIRTUAL_VIEW`
    pub table_type: String,
    /// Data columns from the storage descriptor
    pub columns: Vec<RawColumn>,
    pub partition_keys: Vec<RawColumn>,
    pub location: Option<String>,
    pub input_format: Option<String>,
    pub output_format: Option<String>,
    pub serde_lib: Option<String>,
    pub serde_parameters: HashMap<String, String>,
    pub parameters: HashMap<String, String>,
    pub create_time: Option<i32>,
}

impl RawTable {
    /// `database.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.name)
    }

    /// Look up a table parameter.
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// A partition as returned by `get_partitions_by_names`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPartition {
    /// Values in partition-key order
    pub values: Vec<String>,
    pub location: Option<String>,
    pub parameters: HashMap<String, String>,
    pub create_time: Option<i32>,
}

/// One Metastore connection.
///
/// Errors follow the crate taxonomy: Thrift exceptions map to `NotFound`,
/// `AlreadyExists`, `Unauthorized` or `NotEmpty`, and transport failures map
/// to `TransientUnavailable`.
#[async_trait]
pub trait MetastoreClient: Send + Sync {
    async fn get_all_databases(&self) -> Result<Vec<String>>;

    async fn get_database(&self, name: &str) -> Result<RawDatabase>;

    async fn create_database(&self, database: RawDatabase) -> Result<()>;

    async fn drop_database(&self, name: &str, delete_data: bool, cascade: bool) -> Result<()>;

    async fn get_all_tables(&self, database: &str) -> Result<Vec<String>>;

    async fn get_table(&self, database: &str, table: &str) -> Result<RawTable>;

    async fn create_table(&self, table: RawTable) -> Result<()>;

    async fn drop_table(&self, database: &str, table: &str, delete_data: bool) -> Result<()>;

    /// Partition names (`k1=v1/k2=v2`), optionally restricted by leading
    /// partial values where an empty string matches anything.
    async fn get_partition_names(
        &self,
        database: &str,
        table: &str,
        partial_values: Option<&[String]>,
        max_parts: i16,
    ) -> Result<Vec<String>>;

    async fn get_partitions_by_names(
        &self,
        database: &str,
        table: &str,
        names: &[String],
    ) -> Result<Vec<RawPartition>>;
}

/// Exceptions the Metastore declares on the RPCs the catalog uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetastoreException {
    NoSuchObject(String),
    AlreadyExists(String),
    InvalidObject(String),
    InvalidOperation(String),
    Meta(String),
}

/// Map a declared Metastore exception to the crate taxonomy.
///
/// Declared exceptions are deterministic server answers, never
/// `TransientUnavailable`; only transport failures and timeouts are.
pub fn classify_exception(exception: MetastoreException, entity: Entity, name: &str) -> Error {
    match exception {
        MetastoreException::NoSuchObject(_) => Error::not_found(entity, name),
        MetastoreException::AlreadyExists(_) => Error::already_exists(entity, name),
        MetastoreException::InvalidOperation(message) => {
            Error::NotEmpty(format!("{}: {}", name, message))
        }
        MetastoreException::InvalidObject(message) => {
            Error::InvalidArgument(format!("{}: {}", name, message))
        }
        MetastoreException::Meta(message) if is_permission_denied(&message) => {
            Error::Unauthorized(format!("{}: {}", name, message))
        }
        MetastoreException::Meta(message) => {
            Error::invalid_metadata(name, MetadataError::Rejected(message))
        }
    }
}

fn is_permission_denied(message: &str) -> bool {
    let lower = message.to_lowercase();
    message.contains("AccessControlException")
        || lower.contains("permission")
        || lower.contains("not authorized")
        || lower.contains("authorization")
}

/// Opens Metastore connections.
#[async_trait]
pub trait MetastoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn MetastoreClient>>;

    /// Human-readable endpoint for logs and health reports.
    fn endpoint(&self) -> &str;
}

/// Build the connector selected by configuration.
pub fn connector_from_config(config: &MetastoreConfig) -> Result<Arc<dyn MetastoreConnector>> {
    match config.backend {
        MetastoreBackend::Hms => {
            let uri = config.uri.as_deref().ok_or_else(|| {
                Error::Config("metastore backend 'hms' requires metastore.uri".into())
            })?;
            Ok(Arc::new(ThriftConnector::new(uri, config.request_timeout())?))
        }
        MetastoreBackend::Memory => Ok(Arc::new(InMemoryMetastore::new())),
    }
}

/// Render partition values as a Hive partition name (`k1=v1/k2=v2`).
pub fn make_partition_name(keys: &[RawColumn], values: &[String]) -> String {
    keys.iter()
        .zip(values)
        .map(|(k, v)| format!("{}={}", escape_path_name(&k.name), escape_path_name(v)))
        .collect::<Vec<_>>()
        .join("/")
}

/// Hive path escaping for partition names.
pub fn escape_path_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let needs_escape = (c as u32) < 0x20
            || matches!(
                c,
                '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '\u{7f}' | '{'
                    | '[' | ']' | '^'
            );
        if needs_escape {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_partition_name() {
        let keys = vec![RawColumn::new("dt", "string"), RawColumn::new("region", "string")];
        let values = vec!["2024-01-01".to_string(), "us/east".to_string()];
        assert_eq!(make_partition_name(&keys, &values), "dt=2024-01-01/region=us%2Feast");
    }

    #[test]
    fn test_escape_path_name() {
        assert_eq!(escape_path_name("plain-value_1"), "plain-value_1");
        assert_eq!(escape_path_name("a=b"), "a%3Db");
        assert_eq!(escape_path_name("50%"), "50%25");
        assert_eq!(escape_path_name("10:30"), "10%3A30");
    }

    #[test]
    fn test_classify_exception() {
        use crate::ErrorKind;

        let not_found = classify_exception(
            MetastoreException::NoSuchObject("sales.orders table not found".into()),
            Entity::Table,
            "sales.orders",
        );
        assert_eq!(not_found.to_string(), "Table not found: sales.orders");

        let cases = [
            (MetastoreException::AlreadyExists(String::new()), ErrorKind::AlreadyExists),
            (
                MetastoreException::InvalidOperation("Database sales is not empty".into()),
                ErrorKind::NotEmpty,
            ),
            (
                MetastoreException::InvalidObject("invalid column type".into()),
                ErrorKind::InvalidArgument,
            ),
            (
                MetastoreException::Meta("User bob does not have permission".into()),
                ErrorKind::Unauthorized,
            ),
            (
                MetastoreException::Meta(
                    "org.apache.hadoop.security.AccessControlException: denied".into(),
                ),
                ErrorKind::Unauthorized,
            ),
            (
                MetastoreException::Meta("SerDe com.acme.Broken does not exist".into()),
                ErrorKind::InvalidMetadata,
            ),
            (MetastoreException::Meta(String::new()), ErrorKind::InvalidMetadata),
        ];
        for (exception, kind) in cases {
            let err = classify_exception(exception.clone(), Entity::Schema, "sales");
            assert_eq!(err.kind(), kind, "{:?}", exception);
            assert!(!err.is_transient(), "{:?}", exception);
        }
    }

    #[test]
    fn test_connector_from_config_requires_uri() {
        let config = MetastoreConfig::default();
        assert!(connector_from_config(&config).is_err());

        let config = MetastoreConfig {
            backend: MetastoreBackend::Memory,
            ..Default::default()
        };
        assert_eq!(connector_from_config(&config).unwrap().endpoint(), "memory://");
    }
}
