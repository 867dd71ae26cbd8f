//! Catalog facade.
//!
//! [`HudiCatalog`] is the entry point the catalog service talks to. It
//! implements [`SchemaProvider`], [`TableProvider`] and [`PartitionProvider`]
//! by composing the Metastore adapter, the table resolver and the partition
//! enumerator for each request.
//!
//! ## Request lifecycle
//!
//! Every request walks `Received -> MetadataFetched -> Resolved ->
//! (PartitionsEnumerated) -> Returned`, or ends in `Failed` with the first
//! error's kind surfaced unchanged. A call either returns a fully resolved
//! entity or fails.

use crate::cache::TableCache;
use crate::config::{CatalogConfig, Config};
use crate::error::{Entity, Result};
use crate::metastore::{
    CatalogHealth, MetastoreAdapter, RawColumn, RawDatabase, RawTable,
};
use crate::partitions::{parse_partition_name, PartitionEnumerator, PartitionPredicate, PartitionSpec};
use crate::resolver::{
    is_hudi_table, CatalogTable, Column, HudiTableType, TableResolver, TableTypeTag,
    HUDI_INPUT_FORMAT, HUDI_REALTIME_INPUT_FORMAT, HUDI_TABLE_TYPE_PARAM, PARQUET_OUTPUT_FORMAT,
    PARQUET_SERDE, SPARK_PROVIDER_PARAM,
};
use crate::timeline::{HoodieProperties, StorageRegistry};
use crate::types;
use crate::Error;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Input format for plain Parquet tables.
pub const PARQUET_INPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";

/// Names no schema may take.
pub const RESERVED_NAMES: &[&str] = &["system", "*"];

/// Maximum identifier length.
pub const MAX_NAME_LENGTH: usize = 64;

/// Schema operations.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn list_schemas(&self) -> Result<Vec<String>>;

    async fn load_schema(&self, name: &str) -> Result<CatalogSchema>;

    async fn schema_exists(&self, name: &str) -> Result<bool>;

    async fn create_schema(
        &self,
        name: &str,
        comment: Option<&str>,
        properties: HashMap<String, String>,
    ) -> Result<CatalogSchema>;

    /// Drop a schema; without `cascade` a schema holding tables fails with
    /// `NotEmpty`.
    async fn drop_schema(&self, name: &str, cascade: bool) -> Result<()>;
}

/// Table operations.
#[async_trait]
pub trait TableProvider: Send + Sync {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>>;

    async fn load_table(&self, schema: &str, table: &str) -> Result<CatalogTable>;

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool>;

    /// Register a table in the Metastore. Hudi timelines are never written.
    async fn create_table(&self, definition: TableDefinition) -> Result<()>;

    /// Returns `false` when the table did not exist.
    async fn drop_table(&self, schema: &str, table: &str) -> Result<bool>;
}

/// Partition operations.
#[async_trait]
pub trait PartitionProvider: Send + Sync {
    async fn list_partition_names(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    async fn get_partition(&self, schema: &str, table: &str, name: &str) -> Result<PartitionSpec>;

    /// Lazily stream partitions, optionally filtered.
    async fn list_partitions(
        &self,
        schema: &str,
        table: &str,
        predicate: Option<PartitionPredicate>,
    ) -> Result<BoxStream<'static, Result<PartitionSpec>>>;
}

/// A schema (Metastore database) as seen by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSchema {
    pub name: String,
    pub comment: Option<String>,
    pub location: Option<String>,
    pub owner: Option<String>,
    pub properties: HashMap<String, String>,
    /// Owning catalog
    pub catalog: String,
}

impl CatalogSchema {
    fn from_raw(catalog: &str, raw: RawDatabase) -> Self {
        Self {
            name: raw.name,
            comment: raw.description,
            location: raw.location,
            owner: raw.owner,
            properties: raw.parameters,
            catalog: catalog.to_string(),
        }
    }
}

/// Hudi settings for a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct HudiTableOptions {
    pub table_type: HudiTableType,
    pub record_key_fields: Vec<String>,
    pub precombine_field: Option<String>,
    pub base_file_format: Option<String>,
}

impl HudiTableOptions {
    pub fn new(table_type: HudiTableType) -> Self {
        Self {
            table_type,
            record_key_fields: Vec::new(),
            precombine_field: None,
            base_file_format: None,
        }
    }

    pub fn with_record_key(mut self, field: impl Into<String>) -> Self {
        self.record_key_fields.push(field.into());
        self
    }

    pub fn with_precombine_field(mut self, field: impl Into<String>) -> Self {
        self.precombine_field = Some(field.into());
        self
    }
}

/// Request to register a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub schema: String,
    pub name: String,
    /// All columns, partition columns included
    pub columns: Vec<Column>,
    pub partition_keys: Vec<String>,
    /// Defaults to `<schema location>/<table>`
    pub location: Option<String>,
    pub table_type: TableTypeTag,
    pub comment: Option<String>,
    pub properties: HashMap<String, String>,
    pub hudi: Option<HudiTableOptions>,
}

impl TableDefinition {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns,
            partition_keys: Vec::new(),
            location: None,
            table_type: TableTypeTag::External,
            comment: None,
            properties: HashMap::new(),
            hudi: None,
        }
    }

    pub fn with_partition_keys(mut self, keys: Vec<String>) -> Self {
        self.partition_keys = keys;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_hudi(mut self, options: HudiTableOptions) -> Self {
        self.hudi = Some(options);
        self
    }
}

/// Stage a catalog request has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStage {
    Received,
    MetadataFetched,
    Resolved,
    PartitionsEnumerated,
    Returned,
    Failed,
}

impl fmt::Display for RequestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStage::Received => "received",
            RequestStage::MetadataFetched => "metadata_fetched",
            RequestStage::Resolved => "resolved",
            RequestStage::PartitionsEnumerated => "partitions_enumerated",
            RequestStage::Returned => "returned",
            RequestStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks one request through its stages.
#[derive(Debug)]
pub struct RequestTrace {
    operation: &'static str,
    target: String,
    stage: RequestStage,
    started: std::time::Instant,
}

impl RequestTrace {
    pub fn start(operation: &'static str, target: impl Into<String>) -> Self {
        let target = target.into();
        trace!(operation, target = %target, "Request received");
        Self {
            operation,
            target,
            stage: RequestStage::Received,
            started: std::time::Instant::now(),
        }
    }

    pub fn stage(&self) -> RequestStage {
        self.stage
    }

    pub fn advance(&mut self, stage: RequestStage) {
        trace!(
            operation = self.operation,
            target = %self.target,
            from = %self.stage,
            to = %stage,
            "Request advanced"
        );
        self.stage = stage;
    }

    /// Close the request, passing the result through unchanged.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.advance(RequestStage::Returned);
                debug!(
                    operation = self.operation,
                    target = %self.target,
                    elapsed_ms,
                    "Request completed"
                );
            }
            Err(e) => {
                let failed_after = self.stage;
                self.advance(RequestStage::Failed);
                warn!(
                    operation = self.operation,
                    target = %self.target,
                    kind = ?e.kind(),
                    failed_after = %failed_after,
                    elapsed_ms,
                    error = %e,
                    "Request failed"
                );
            }
        }
        result
    }
}

/// Check an identifier against `^\w[\w-]{0,63}$` and return it lowercased.
pub fn validate_name(entity: Entity, name: &str) -> Result<String> {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            word(first)
                && name.len() <= MAX_NAME_LENGTH
                && chars.all(|c| word(c) || c == '-')
        }
        None => false,
    };
    if !valid {
        return Err(Error::InvalidArgument(format!(
            "{} name '{}' must match ^\\w[\\w-]{{0,63}}$",
            entity, name
        )));
    }
    Ok(name.to_lowercase())
}

fn check_not_reserved(entity: Entity, name: &str) -> Result<()> {
    if RESERVED_NAMES.contains(&name) {
        return Err(Error::InvalidArgument(format!(
            "{} name '{}' is reserved",
            entity, name
        )));
    }
    Ok(())
}

fn join_location(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

/// Hudi catalog over a Hive Metastore.
pub struct HudiCatalog {
    config: CatalogConfig,
    adapter: Arc<MetastoreAdapter>,
    storage: Arc<StorageRegistry>,
    resolver: TableResolver,
    partitions: PartitionEnumerator,
    cache: Option<TableCache>,
}

impl HudiCatalog {
    /// Build the catalog for a validated configuration.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        let adapter = Arc::new(MetastoreAdapter::from_config(&config.metastore)?);
        let storage = Arc::new(StorageRegistry::new(config.storage.to_options()));
        Ok(Self::with_components(config, adapter, storage))
    }

    /// Build the catalog over existing components.
    pub fn with_components(
        config: &Config,
        adapter: Arc<MetastoreAdapter>,
        storage: Arc<StorageRegistry>,
    ) -> Self {
        let cache = TableCache::from_config(&config.cache);
        info!(
            catalog = %config.catalog.name,
            hudi_only = config.catalog.list_hudi_tables_only,
            cache_enabled = cache.is_some(),
            "Hudi catalog initialized"
        );

        Self {
            config: config.catalog.clone(),
            resolver: TableResolver::new(storage.clone()),
            partitions: PartitionEnumerator::new(adapter.clone()),
            adapter,
            storage,
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn adapter(&self) -> &Arc<MetastoreAdapter> {
        &self.adapter
    }

    pub fn storage(&self) -> &Arc<StorageRegistry> {
        &self.storage
    }

    pub fn cache(&self) -> Option<&TableCache> {
        self.cache.as_ref()
    }

    pub async fn health_check(&self) -> Result<CatalogHealth> {
        self.adapter.health_check().await
    }

    async fn fetch_and_resolve(
        &self,
        schema: &str,
        table: &str,
        trace: &mut RequestTrace,
    ) -> Result<CatalogTable> {
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(schema, table)) {
            trace.advance(RequestStage::Resolved);
            return Ok(cached);
        }

        let raw = self.adapter.get_table(schema, table).await?;
        trace.advance(RequestStage::MetadataFetched);

        let resolved = self.resolver.resolve(&raw).await?;
        trace.advance(RequestStage::Resolved);

        if let Some(cache) = &self.cache {
            cache.insert(resolved.clone());
        }
        Ok(resolved)
    }

    fn build_raw_table(
        &self,
        definition: &TableDefinition,
        database: &RawDatabase,
    ) -> Result<RawTable> {
        let qualified = format!("{}.{}", database.name, definition.name);
        if definition.columns.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} must have at least one column",
                qualified
            )));
        }

        let mut seen = HashSet::new();
        for column in &definition.columns {
            if !seen.insert(column.name.to_lowercase()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate column '{}' in {}",
                    column.name, qualified
                )));
            }
        }

        let partition_keys: Vec<String> = definition
            .partition_keys
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        for key in &partition_keys {
            if !seen.contains(key) {
                return Err(Error::InvalidArgument(format!(
                    "partition key '{}' is not a column of {}",
                    key, qualified
                )));
            }
        }

        let to_raw = |c: &Column| -> Result<RawColumn> {
            Ok(RawColumn {
                name: c.name.to_lowercase(),
                type_name: types::to_external_type(&c.column_type)?,
                comment: c.comment.clone(),
            })
        };
        let columns = definition
            .columns
            .iter()
            .filter(|c| !partition_keys.contains(&c.name.to_lowercase()))
            .map(to_raw)
            .collect::<Result<Vec<_>>>()?;
        let partition_columns = partition_keys
            .iter()
            .filter_map(|k| definition.columns.iter().find(|c| c.name.eq_ignore_ascii_case(k)))
            .map(to_raw)
            .collect::<Result<Vec<_>>>()?;

        let location = definition.location.clone().or_else(|| {
            database
                .location
                .as_deref()
                .or(self.config.warehouse_path.as_deref())
                .map(|parent| join_location(parent, &definition.name.to_lowercase()))
        });

        let mut parameters = definition.properties.clone();
        if let Some(comment) = &definition.comment {
            parameters.insert("comment".into(), comment.clone());
        }
        if definition.table_type == TableTypeTag::External {
            parameters.insert("EXTERNAL".into(), "TRUE".into());
        }

        let mut serde_parameters = HashMap::new();
        let input_format = match &definition.hudi {
            Some(hudi) => {
                let location = location.as_deref().ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "Hudi table {} needs a location: set one or give the schema a location",
                        qualified
                    ))
                })?;
                for key in hudi
                    .record_key_fields
                    .iter()
                    .chain(hudi.precombine_field.iter())
                {
                    if !seen.contains(&key.to_lowercase()) {
                        return Err(Error::InvalidArgument(format!(
                            "Hudi field '{}' is not a column of {}",
                            key, qualified
                        )));
                    }
                }

                parameters.insert(HUDI_TABLE_TYPE_PARAM.into(), hudi.table_type.as_str().into());
                parameters.insert(SPARK_PROVIDER_PARAM.into(), "hudi".into());
                if !hudi.record_key_fields.is_empty() {
                    parameters.insert(
                        HoodieProperties::RECORD_KEY_FIELDS.into(),
                        hudi.record_key_fields.join(","),
                    );
                }
                if let Some(precombine) = &hudi.precombine_field {
                    parameters.insert(HoodieProperties::PRECOMBINE_FIELD.into(), precombine.clone());
                }
                if let Some(format) = &hudi.base_file_format {
                    parameters.insert(HoodieProperties::BASE_FILE_FORMAT.into(), format.clone());
                }
                serde_parameters.insert("path".to_string(), location.to_string());

                match hudi.table_type {
                    HudiTableType::CopyOnWrite => HUDI_INPUT_FORMAT,
                    HudiTableType::MergeOnRead => HUDI_REALTIME_INPUT_FORMAT,
                }
            }
            None => PARQUET_INPUT_FORMAT,
        };

        Ok(RawTable {
            database: database.name.clone(),
            name: definition.name.to_lowercase(),
            owner: None,
            table_type: definition.table_type.as_metastore_str().to_string(),
            columns,
            partition_keys: partition_columns,
            location,
            input_format: Some(input_format.to_string()),
            output_format: Some(PARQUET_OUTPUT_FORMAT.to_string()),
            serde_lib: Some(PARQUET_SERDE.to_string()),
            serde_parameters,
            parameters,
            create_time: None,
        })
    }
}

#[async_trait]
impl SchemaProvider for HudiCatalog {
    async fn list_schemas(&self) -> Result<Vec<String>> {
        let trace = RequestTrace::start("list_schemas", self.name());
        let result = self.adapter.list_databases().await;
        trace.finish(result)
    }

    async fn load_schema(&self, name: &str) -> Result<CatalogSchema> {
        let name = validate_name(Entity::Schema, name)?;
        let mut trace = RequestTrace::start("load_schema", &name);
        let result = self.adapter.get_database(&name).await.map(|raw| {
            trace.advance(RequestStage::MetadataFetched);
            CatalogSchema::from_raw(self.name(), raw)
        });
        trace.finish(result)
    }

    async fn schema_exists(&self, name: &str) -> Result<bool> {
        match self.load_schema(name).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_schema(
        &self,
        name: &str,
        comment: Option<&str>,
        mut properties: HashMap<String, String>,
    ) -> Result<CatalogSchema> {
        let name = validate_name(Entity::Schema, name)?;
        check_not_reserved(Entity::Schema, &name)?;
        let trace = RequestTrace::start("create_schema", &name);

        let location = properties.remove("location").or_else(|| {
            self.config
                .warehouse_path
                .as_deref()
                .map(|w| join_location(w, &format!("{}.db", name)))
        });
        let database = RawDatabase {
            name: name.clone(),
            description: comment.map(str::to_string),
            location,
            parameters: properties,
            owner: None,
        };

        let result = self
            .adapter
            .create_database(database.clone())
            .await
            .map(|()| CatalogSchema::from_raw(self.name(), database));
        trace.finish(result)
    }

    async fn drop_schema(&self, name: &str, cascade: bool) -> Result<()> {
        let name = validate_name(Entity::Schema, name)?;
        let trace = RequestTrace::start("drop_schema", &name);
        let result = self.adapter.drop_database(&name, cascade).await;
        if result.is_ok() {
            if let Some(cache) = &self.cache {
                cache.invalidate_schema(&name);
            }
        }
        trace.finish(result)
    }
}

#[async_trait]
impl TableProvider for HudiCatalog {
    async fn list_tables(&self, schema: &str) -> Result<Vec<String>> {
        let schema = validate_name(Entity::Schema, schema)?;
        let mut trace = RequestTrace::start("list_tables", &schema);

        let result: Result<Vec<String>> = async {
            let names = self.adapter.list_tables(&schema).await?;
            trace.advance(RequestStage::MetadataFetched);
            if !self.config.list_hudi_tables_only {
                return Ok(names);
            }

            let concurrency = self.adapter.pool_stats().max_size.max(1);
            let checks: Vec<Result<Option<String>>> = stream::iter(names)
                .map(|name| {
                    let schema = schema.as_str();
                    async move {
                        match self.adapter.get_table(schema, &name).await {
                            Ok(raw) => Ok(is_hudi_table(&raw).then_some(name)),
                            // dropped since it was listed
                            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(None),
                            Err(e) => Err(e),
                        }
                    }
                })
                .buffered(concurrency)
                .collect()
                .await;

            let mut hudi_tables = Vec::new();
            for check in checks {
                if let Some(name) = check? {
                    hudi_tables.push(name);
                }
            }
            Ok(hudi_tables)
        }
        .await;

        trace.finish(result)
    }

    async fn load_table(&self, schema: &str, table: &str) -> Result<CatalogTable> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        let mut trace = RequestTrace::start("load_table", format!("{}.{}", schema, table));
        let result = self.fetch_and_resolve(&schema, &table, &mut trace).await;
        trace.finish(result)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> Result<bool> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        if self.cache.as_ref().and_then(|c| c.get(&schema, &table)).is_some() {
            return Ok(true);
        }
        match self.adapter.get_table(&schema, &table).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_table(&self, definition: TableDefinition) -> Result<()> {
        let schema = validate_name(Entity::Schema, &definition.schema)?;
        let table = validate_name(Entity::Table, &definition.name)?;
        for column in &definition.columns {
            validate_name(Entity::Table, &column.name).map_err(|_| {
                Error::InvalidArgument(format!("invalid column name '{}'", column.name))
            })?;
        }
        let mut trace = RequestTrace::start("create_table", format!("{}.{}", schema, table));

        let result: Result<()> = async {
            let database = self.adapter.get_database(&schema).await?;
            trace.advance(RequestStage::MetadataFetched);
            let raw = self.build_raw_table(&definition, &database)?;
            trace.advance(RequestStage::Resolved);
            self.adapter.create_table(raw).await
        }
        .await;

        if let Some(cache) = &self.cache {
            cache.invalidate(&schema, &table);
        }
        trace.finish(result)
    }

    async fn drop_table(&self, schema: &str, table: &str) -> Result<bool> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        let trace = RequestTrace::start("drop_table", format!("{}.{}", schema, table));

        let result = match self.adapter.drop_table(&schema, &table, false).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == crate::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        };
        if let Some(cache) = &self.cache {
            cache.invalidate(&schema, &table);
        }
        trace.finish(result)
    }
}

#[async_trait]
impl PartitionProvider for HudiCatalog {
    async fn list_partition_names(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        let mut trace =
            RequestTrace::start("list_partition_names", format!("{}.{}", schema, table));

        let result: Result<Vec<String>> = async {
            let resolved = self.fetch_and_resolve(&schema, &table, &mut trace).await?;
            let names = self.partitions.partition_names(&resolved, None).await?;
            trace.advance(RequestStage::PartitionsEnumerated);
            Ok(names)
        }
        .await;
        trace.finish(result)
    }

    async fn get_partition(&self, schema: &str, table: &str, name: &str) -> Result<PartitionSpec> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        let mut trace = RequestTrace::start("get_partition", format!("{}.{}/{}", schema, table, name));

        let result: Result<PartitionSpec> = async {
            let resolved = self.fetch_and_resolve(&schema, &table, &mut trace).await?;
            let values = parse_partition_name(name).ok_or_else(|| {
                Error::InvalidArgument(format!("malformed partition name '{}'", name))
            })?;
            let keys: Vec<&str> = values.iter().map(|(k, _)| k.as_str()).collect();
            let expected: Vec<String> =
                resolved.partition_keys.iter().map(|k| k.to_lowercase()).collect();
            if keys != expected {
                return Err(Error::InvalidArgument(format!(
                    "partition name '{}' does not match partition keys ({})",
                    name,
                    resolved.partition_keys.join(", ")
                )));
            }

            let partitions = self
                .adapter
                .get_partitions_by_names(&schema, &table, &[name.to_string()])
                .await?;
            trace.advance(RequestStage::PartitionsEnumerated);
            partitions
                .into_iter()
                .next()
                .map(|p| PartitionSpec::from_raw(&resolved.partition_keys, p))
                .ok_or_else(|| {
                    Error::not_found(
                        Entity::Partition,
                        format!("{}/{}", resolved.qualified_name(), name),
                    )
                })
        }
        .await;
        trace.finish(result)
    }

    async fn list_partitions(
        &self,
        schema: &str,
        table: &str,
        predicate: Option<PartitionPredicate>,
    ) -> Result<BoxStream<'static, Result<PartitionSpec>>> {
        let schema = validate_name(Entity::Schema, schema)?;
        let table = validate_name(Entity::Table, table)?;
        let mut trace = RequestTrace::start("list_partitions", format!("{}.{}", schema, table));

        let result: Result<BoxStream<'static, Result<PartitionSpec>>> = async {
            let resolved = self.fetch_and_resolve(&schema, &table, &mut trace).await?;
            if let Some(p) = &predicate {
                debug!(table = %resolved.qualified_name(), predicate = %p, "Enumerating partitions");
            }
            let stream = self.partitions.enumerate(&resolved, predicate)?;
            trace.advance(RequestStage::PartitionsEnumerated);
            Ok(stream)
        }
        .await;
        trace.finish(result)
    }
}
