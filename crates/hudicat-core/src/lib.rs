//! hudicat core - Hudi table catalog over the Hive Metastore
//!
//! This library exposes Hudi tables registered in a Hive Metastore through a
//! generic schema/table/partition catalog model:
//!
//! - Pooled, retrying Metastore client with a circuit breaker
//! - Hudi timeline reader over `object_store`
//! - Schema resolution with a fixed Metastore/timeline precedence policy
//! - Lazy partition enumeration with equality pushdown

pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod metastore;
pub mod partitions;
pub mod resolver;
pub mod timeline;
pub mod types;

// Re-export commonly used types
pub use catalog::{
    CatalogSchema, HudiCatalog, PartitionProvider, SchemaProvider, TableDefinition,
    TableProvider,
};
pub use config::Config;
pub use error::{Entity, MetadataError};
pub use error::{Error, ErrorKind, Result};
pub use partitions::{PartitionPredicate, PartitionSpec};
pub use resolver::{CatalogTable, Column, HudiTableType};
pub use types::ColumnType;
