//! Table metadata resolution.
//!
//! Turns a [`RawTable`] from the Metastore into a [`CatalogTable`]. Plain
//! Hive tables map column-for-column. Hudi tables take their schema from the
//! latest commit on the timeline and combine Metastore and `hoodie.properties`
//! values under [`MetadataPrecedence`].

use crate::error::{MetadataError, Result};
use crate::metastore::{RawColumn, RawTable, EXTERNAL_TABLE, MANAGED_TABLE, VIRTUAL_VIEW};
use crate::timeline::{HoodieProperties, SchemaSource, StorageRegistry};
use crate::types::{self, AvroSchemaError, ColumnType, StructField};
use crate::Error;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of the bookkeeping columns Hudi adds to every record.
pub const HOODIE_META_COLUMN_PREFIX: &str = "_hoodie_";

/// Input format of copy-on-write tables and read-optimized views.
pub const HUDI_INPUT_FORMAT: &str = "org.apache.hudi.hadoop.HoodieParquetInputFormat";
/// Input format of merge-on-read snapshot views.
pub const HUDI_REALTIME_INPUT_FORMAT: &str =
    "org.apache.hudi.hadoop.realtime.HoodieParquetRealtimeInputFormat";
pub const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";
pub const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";

/// Table parameter naming the Hudi table type.
pub const HUDI_TABLE_TYPE_PARAM: &str = "hudi.table.type";
/// Spark datasource provider parameter.
pub const SPARK_PROVIDER_PARAM: &str = "spark.sql.sources.provider";

/// Hudi storage strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HudiTableType {
    CopyOnWrite,
    MergeOnRead,
}

impl HudiTableType {
    /// Accepts `COPY_ON_WRITE`/`MERGE_ON_READ` and Spark's `cow`/`mor`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "COPY_ON_WRITE" | "COW" => Some(HudiTableType::CopyOnWrite),
            "MERGE_ON_READ" | "MOR" => Some(HudiTableType::MergeOnRead),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HudiTableType::CopyOnWrite => "COPY_ON_WRITE",
            HudiTableType::MergeOnRead => "MERGE_ON_READ",
        }
    }
}

impl fmt::Display for HudiTableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalog table-type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableTypeTag {
    Managed,
    External,
}

impl TableTypeTag {
    fn from_metastore(raw: &RawTable) -> Self {
        match raw.table_type.as_str() {
            EXTERNAL_TABLE => TableTypeTag::External,
            MANAGED_TABLE => TableTypeTag::Managed,
            _ if raw
                .parameter("EXTERNAL")
                .is_some_and(|v| v.eq_ignore_ascii_case("true")) =>
            {
                TableTypeTag::External
            }
            _ => TableTypeTag::Managed,
        }
    }

    /// Metastore `tableType` string.
    pub fn as_metastore_str(&self) -> &'static str {
        match self {
            TableTypeTag::Managed => MANAGED_TABLE,
            TableTypeTag::External => EXTERNAL_TABLE,
        }
    }
}

/// A resolved column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub comment: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            comment: None,
        }
    }
}

impl From<StructField> for Column {
    fn from(field: StructField) -> Self {
        Self {
            name: field.name,
            column_type: field.field_type,
            nullable: field.nullable,
            comment: field.comment,
        }
    }
}

/// Hudi-specific part of a resolved table.
#[derive(Debug, Clone, PartialEq)]
pub struct HudiMetadata {
    pub table_type: HudiTableType,
    pub record_key_fields: Vec<String>,
    pub precombine_field: Option<String>,
    /// Table base path holding `.hoodie`
    pub base_path: String,
    pub base_file_format: String,
    pub schema_source: SchemaSource,
    /// Differences between the Metastore column list and the timeline schema
    pub schema_drift: Vec<String>,
}

/// A fully resolved catalog table.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogTable {
    pub schema: String,
    pub name: String,
    /// Ordered columns; partition keys are among them
    pub columns: Vec<Column>,
    /// Ordered partition column names
    pub partition_keys: Vec<String>,
    pub location: Option<String>,
    pub table_type: TableTypeTag,
    pub comment: Option<String>,
    pub properties: HashMap<String, String>,
    pub hudi: Option<HudiMetadata>,
}

impl CatalogTable {
    /// `schema.table`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_hudi(&self) -> bool {
        self.hudi.is_some()
    }
}

/// Whether the Metastore descriptor marks a Hudi table.
pub fn is_hudi_table(raw: &RawTable) -> bool {
    raw.parameters.contains_key(HUDI_TABLE_TYPE_PARAM)
        || raw.parameters.keys().any(|k| k.starts_with("hoodie."))
        || raw
            .parameter(SPARK_PROVIDER_PARAM)
            .is_some_and(|p| p.eq_ignore_ascii_case("hudi"))
        || raw
            .input_format
            .as_deref()
            .is_some_and(|f| f.starts_with("org.apache.hudi"))
}

/// Look a key up in table parameters, then in SerDe parameters.
fn metastore_value<'a>(raw: &'a RawTable, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| {
            raw.parameters
                .get(*key)
                .or_else(|| raw.serde_parameters.get(*key))
        })
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Which source wins for each piece of table metadata.
///
/// - Schema: the timeline. `_hoodie_*` meta columns are dropped and
///   Metastore partition columns missing from the timeline are appended.
/// - Existence, location, table-type tag and partition keys: the Metastore.
///   `hoodie.table.partition.fields` is used only when the Metastore declares
///   no partition keys.
/// - Hudi table type, record key and precombine field: Metastore parameters
///   first, `hoodie.properties` second. Disagreement is an error.
/// - Drift between Metastore columns and the timeline schema is reported,
///   never used as a fallback.
pub struct MetadataPrecedence;

impl MetadataPrecedence {
    /// Pick a Hudi property present on either side.
    pub fn pick<T, F>(
        property: &str,
        metastore: Option<&str>,
        timeline: Option<&str>,
        parse: F,
    ) -> std::result::Result<Option<T>, MetadataError>
    where
        T: PartialEq,
        F: Fn(&str) -> Option<T>,
    {
        let from_metastore = metastore.map(|v| (v, parse(v)));
        let from_timeline = timeline.map(|v| (v, parse(v)));

        match (from_metastore, from_timeline) {
            (Some((raw, None)), _) | (None, Some((raw, None))) => Err(
                MetadataError::InvalidProperties(format!("invalid {}: '{}'", property, raw)),
            ),
            (Some((m_raw, Some(m))), Some((t_raw, t))) => match t {
                Some(t) if t == m => Ok(Some(m)),
                _ => Err(MetadataError::Conflict {
                    property: property.to_string(),
                    metastore: m_raw.to_string(),
                    timeline: t_raw.to_string(),
                }),
            },
            (Some((_, m)), None) => Ok(m),
            (None, Some((_, t))) => Ok(t),
            (None, None) => Ok(None),
        }
    }

    /// Partition key names.
    pub fn partition_keys(raw: &RawTable, properties: &HoodieProperties) -> Vec<String> {
        if !raw.partition_keys.is_empty() {
            return raw.partition_keys.iter().map(|k| k.name.clone()).collect();
        }
        properties.partition_fields()
    }

    /// Timeline fields without meta columns, plus Metastore-only partition
    /// columns.
    pub fn columns(
        qualified: &str,
        timeline_fields: Vec<StructField>,
        raw: &RawTable,
        partition_keys: &[String],
    ) -> Result<(Vec<Column>, Vec<String>)> {
        let mut columns: Vec<Column> = timeline_fields
            .into_iter()
            .filter(|f| !f.name.starts_with(HOODIE_META_COLUMN_PREFIX))
            .map(Column::from)
            .collect();

        let mut keys = Vec::with_capacity(partition_keys.len());
        for key in partition_keys {
            if columns.iter().any(|c| c.name.eq_ignore_ascii_case(key)) {
                keys.push(key.clone());
                continue;
            }
            match raw.partition_keys.iter().find(|c| c.name.eq_ignore_ascii_case(key)) {
                Some(metastore_key) => {
                    columns.push(map_raw_column(qualified, metastore_key)?);
                    keys.push(key.clone());
                }
                None => warn!(
                    table = %qualified,
                    partition_field = %key,
                    "Partition field is not a column of the timeline schema, ignoring"
                ),
            }
        }

        Ok((columns, keys))
    }

    /// Human-readable differences between the Metastore data columns and the
    /// resolved columns.
    pub fn schema_drift(raw: &RawTable, columns: &[Column], partition_keys: &[String]) -> Vec<String> {
        let is_partition = |name: &str| partition_keys.iter().any(|k| k.eq_ignore_ascii_case(name));
        let mut drift = Vec::new();

        let metastore_columns: Vec<&RawColumn> = raw
            .columns
            .iter()
            .filter(|c| !c.name.starts_with(HOODIE_META_COLUMN_PREFIX) && !is_partition(&c.name))
            .collect();

        for column in columns.iter().filter(|c| !is_partition(&c.name)) {
            match metastore_columns
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case(&column.name))
            {
                None => drift.push(format!("column '{}' missing from metastore", column.name)),
                Some(m) => match types::to_catalog_type(&m.type_name) {
                    Ok(t) if t == column.column_type => {}
                    Ok(t) => drift.push(format!(
                        "column '{}' is {} in metastore, {} on timeline",
                        column.name, t, column.column_type
                    )),
                    Err(_) => drift.push(format!(
                        "column '{}' has unreadable metastore type '{}'",
                        column.name, m.type_name
                    )),
                },
            }
        }

        for m in metastore_columns {
            if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(&m.name)) {
                drift.push(format!("column '{}' missing from timeline", m.name));
            }
        }

        drift
    }
}

fn map_raw_column(qualified: &str, raw: &RawColumn) -> Result<Column> {
    let column_type = types::to_catalog_type(&raw.type_name).map_err(|e| match e {
        Error::UnsupportedType(message) => {
            Error::UnsupportedType(format!("{} column '{}': {}", qualified, raw.name, message))
        }
        other => other,
    })?;
    Ok(Column {
        name: raw.name.clone(),
        column_type,
        nullable: true,
        comment: raw.comment.clone(),
    })
}

/// Resolves raw Metastore tables into catalog tables.
pub struct TableResolver {
    storage: Arc<StorageRegistry>,
}

impl TableResolver {
    pub fn new(storage: Arc<StorageRegistry>) -> Self {
        Self { storage }
    }

    /// Resolve a Metastore table.
    pub async fn resolve(&self, raw: &RawTable) -> Result<CatalogTable> {
        let qualified = raw.qualified_name();

        if raw.table_type == VIRTUAL_VIEW {
            return Err(Error::invalid_metadata(
                qualified,
                MetadataError::Unrepresentable("views are not supported".into()),
            ));
        }

        if is_hudi_table(raw) {
            self.resolve_hudi(raw).await
        } else {
            debug!(table = %qualified, "Resolving plain Hive table");
            Self::resolve_plain(raw)
        }
    }

    fn resolve_plain(raw: &RawTable) -> Result<CatalogTable> {
        let qualified = raw.qualified_name();
        let columns = raw
            .columns
            .iter()
            .chain(raw.partition_keys.iter())
            .map(|c| map_raw_column(&qualified, c))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::assemble(
            raw,
            columns,
            raw.partition_keys.iter().map(|k| k.name.clone()).collect(),
            None,
        ))
    }

    async fn resolve_hudi(&self, raw: &RawTable) -> Result<CatalogTable> {
        let qualified = raw.qualified_name();
        let base_path = raw
            .location
            .clone()
            .or_else(|| raw.serde_parameters.get("path").cloned())
            .ok_or_else(|| {
                Error::invalid_metadata(
                    &qualified,
                    MetadataError::Unrepresentable("Hudi table without a location".into()),
                )
            })?;

        let timeline = self.storage.timeline(&base_path)?;
        let properties = timeline.table_properties().await?;
        let schema = timeline.latest_schema_with(&properties).await?;

        let invalid = |source: MetadataError| Error::invalid_metadata(&base_path, source);

        let table_type = MetadataPrecedence::pick(
            HoodieProperties::TABLE_TYPE,
            metastore_value(raw, &[HUDI_TABLE_TYPE_PARAM, HoodieProperties::TABLE_TYPE, "type"]),
            properties.table_type(),
            HudiTableType::parse,
        )
        .map_err(invalid)?
        .unwrap_or_else(|| {
            debug!(table = %qualified, "No Hudi table type recorded, assuming COPY_ON_WRITE");
            HudiTableType::CopyOnWrite
        });

        let record_key_fields = MetadataPrecedence::pick(
            HoodieProperties::RECORD_KEY_FIELDS,
            metastore_value(raw, &[HoodieProperties::RECORD_KEY_FIELDS, "primaryKey"]),
            properties.get(HoodieProperties::RECORD_KEY_FIELDS),
            |v| {
                Some(
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect::<Vec<_>>(),
                )
            },
        )
        .map_err(invalid)?
        .unwrap_or_default();

        let precombine_field = MetadataPrecedence::pick(
            HoodieProperties::PRECOMBINE_FIELD,
            metastore_value(raw, &[HoodieProperties::PRECOMBINE_FIELD, "preCombineField"]),
            properties.precombine_field(),
            |v| Some(v.trim().to_string()),
        )
        .map_err(invalid)?;

        let fields = types::fields_from_avro_schema(&schema.avro_schema).map_err(|e| match e {
            AvroSchemaError::Malformed(msg) => invalid(MetadataError::MalformedSchema(msg)),
            AvroSchemaError::Unsupported(msg) => {
                Error::UnsupportedType(format!("{}: {}", qualified, msg))
            }
        })?;

        let partition_keys = MetadataPrecedence::partition_keys(raw, &properties);
        let (columns, partition_keys) =
            MetadataPrecedence::columns(&qualified, fields, raw, &partition_keys)?;

        let schema_drift = MetadataPrecedence::schema_drift(raw, &columns, &partition_keys);
        if !schema_drift.is_empty() {
            warn!(
                table = %qualified,
                source = %schema.source,
                drift = ?schema_drift,
                "Metastore columns differ from the timeline schema, using the timeline"
            );
        }

        debug!(
            table = %qualified,
            table_type = %table_type,
            source = %schema.source,
            columns = columns.len(),
            "Resolved Hudi table"
        );

        let hudi = HudiMetadata {
            table_type,
            record_key_fields,
            precombine_field,
            base_path: base_path.clone(),
            base_file_format: properties.base_file_format().to_string(),
            schema_source: schema.source,
            schema_drift,
        };

        Ok(Self::assemble(raw, columns, partition_keys, Some(hudi)))
    }

    fn assemble(
        raw: &RawTable,
        columns: Vec<Column>,
        partition_keys: Vec<String>,
        hudi: Option<HudiMetadata>,
    ) -> CatalogTable {
        CatalogTable {
            schema: raw.database.clone(),
            name: raw.name.clone(),
            columns,
            partition_keys,
            location: raw.location.clone(),
            table_type: TableTypeTag::from_metastore(raw),
            comment: raw.parameter("comment").map(String::from),
            properties: raw.parameters.clone(),
            hudi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use object_store::memory::InMemory;
    use object_store::path::Path;
    use object_store::{ObjectStore, PutPayload};

    const LOCATION: &str = "s3://lake/sales/orders";

    const ORDERS_SCHEMA: &str = r#"{"type":"record","name":"orders_record","fields":[
        {"name":"_hoodie_commit_time","type":["null","string"]},
        {"name":"_hoodie_record_key","type":["null","string"]},
        {"name":"order_id","type":"long"},
        {"name":"amount","type":{"type":"bytes","logicalType":"decimal","precision":10,"scale":2}},
        {"name":"updated_at","type":{"type":"long","logicalType":"timestamp-micros"}},
        {"name":"dt","type":"string"}
    ]}"#;

    async fn put(store: &InMemory, relative: &str, content: &str) {
        store
            .put(
                &Path::from(format!("sales/orders/{}", relative)),
                PutPayload::from(content.as_bytes().to_vec()),
            )
            .await
            .unwrap();
    }

    fn commit(schema: &str) -> String {
        serde_json::json!({"extraMetadata": {"schema": schema}}).to_string()
    }

    async fn resolver_with(properties: &str, schema: &str) -> TableResolver {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", properties).await;
        put(&store, ".hoodie/20240102000000000.deltacommit", &commit(schema)).await;
        let storage = StorageRegistry::new(HashMap::new());
        storage.register("s3://lake", store).unwrap();
        TableResolver::new(Arc::new(storage))
    }

    fn orders_table() -> RawTable {
        let mut parameters = HashMap::new();
        parameters.insert(HUDI_TABLE_TYPE_PARAM.to_string(), "MERGE_ON_READ".to_string());
        RawTable {
            database: "sales".into(),
            name: "orders".into(),
            table_type: EXTERNAL_TABLE.into(),
            columns: vec![
                RawColumn::new("_hoodie_commit_time", "string"),
                RawColumn::new("order_id", "bigint"),
                RawColumn::new("amount", "decimal(10,2)"),
                RawColumn::new("updated_at", "timestamp"),
            ],
            partition_keys: vec![RawColumn::new("dt", "string")],
            location: Some(LOCATION.into()),
            input_format: Some(HUDI_REALTIME_INPUT_FORMAT.into()),
            parameters,
            ..Default::default()
        }
    }

    const MOR_PROPERTIES: &str = "hoodie.table.name=orders\n\
        hoodie.table.type=MERGE_ON_READ\n\
        hoodie.table.recordkey.fields=order_id\n\
        hoodie.table.precombine.field=updated_at\n\
        hoodie.table.partition.fields=dt\n";

    #[test]
    fn test_hudi_marker_detection() {
        let mut raw = RawTable::default();
        assert!(!is_hudi_table(&raw));

        raw.input_format = Some(HUDI_INPUT_FORMAT.into());
        assert!(is_hudi_table(&raw));

        let mut raw = RawTable::default();
        raw.parameters
            .insert(SPARK_PROVIDER_PARAM.into(), "HUDI".into());
        assert!(is_hudi_table(&raw));

        let mut raw = RawTable::default();
        raw.parameters
            .insert("hoodie.datasource.write.operation".into(), "upsert".into());
        assert!(is_hudi_table(&raw));
    }

    #[test]
    fn test_precedence_pick() {
        let parse = HudiTableType::parse;
        assert_eq!(
            MetadataPrecedence::pick("t", Some("mor"), Some("MERGE_ON_READ"), parse).unwrap(),
            Some(HudiTableType::MergeOnRead)
        );
        assert_eq!(
            MetadataPrecedence::pick("t", None, Some("COPY_ON_WRITE"), parse).unwrap(),
            Some(HudiTableType::CopyOnWrite)
        );
        assert_eq!(MetadataPrecedence::pick("t", None, None, parse).unwrap(), None);
        assert!(matches!(
            MetadataPrecedence::pick("t", Some("cow"), Some("MERGE_ON_READ"), parse),
            Err(MetadataError::Conflict { .. })
        ));
        assert!(matches!(
            MetadataPrecedence::pick("t", Some("sideways"), None, parse),
            Err(MetadataError::InvalidProperties(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_plain_table() {
        let resolver = TableResolver::new(Arc::new(StorageRegistry::new(HashMap::new())));
        let raw = RawTable {
            database: "default".into(),
            name: "people".into(),
            table_type: MANAGED_TABLE.into(),
            columns: vec![RawColumn::new("id", "int"), RawColumn::new("name", "string")],
            location: Some("hdfs://nn/warehouse/people".into()),
            ..Default::default()
        };

        let table = resolver.resolve(&raw).await.unwrap();
        assert!(table.hudi.is_none());
        assert_eq!(table.table_type, TableTypeTag::Managed);
        assert_eq!(
            table.columns,
            vec![
                Column::new("id", ColumnType::Integer),
                Column::new("name", ColumnType::String)
            ]
        );
    }

    #[tokio::test]
    async fn test_plain_table_with_unsupported_type_fails() {
        let resolver = TableResolver::new(Arc::new(StorageRegistry::new(HashMap::new())));
        let raw = RawTable {
            database: "default".into(),
            name: "shapes".into(),
            columns: vec![RawColumn::new("area", "geometry")],
            ..Default::default()
        };

        let err = resolver.resolve(&raw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
        let message = err.to_string();
        assert!(message.contains("area"));
        assert_eq!(message.matches("Unsupported type").count(), 1, "{}", message);
    }

    #[tokio::test]
    async fn test_resolve_merge_on_read_table() {
        let resolver = resolver_with(MOR_PROPERTIES, ORDERS_SCHEMA).await;

        let table = resolver.resolve(&orders_table()).await.unwrap();
        let hudi = table.hudi.as_ref().unwrap();
        assert_eq!(hudi.table_type, HudiTableType::MergeOnRead);
        assert_eq!(hudi.record_key_fields, vec!["order_id"]);
        assert_eq!(hudi.precombine_field.as_deref(), Some("updated_at"));
        assert_eq!(hudi.base_path, LOCATION);
        assert_eq!(hudi.base_file_format, "PARQUET");
        assert!(hudi.schema_drift.is_empty(), "{:?}", hudi.schema_drift);

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["order_id", "amount", "updated_at", "dt"]);
        assert_eq!(table.partition_keys, vec!["dt"]);
        assert_eq!(table.table_type, TableTypeTag::External);
    }

    #[tokio::test]
    async fn test_timeline_schema_wins_over_metastore_columns() {
        let schema = r#"{"type":"record","name":"r","fields":[
            {"name":"order_id","type":"long"},
            {"name":"amount","type":{"type":"bytes","logicalType":"decimal","precision":10,"scale":2}},
            {"name":"updated_at","type":{"type":"long","logicalType":"timestamp-micros"}},
            {"name":"channel","type":["null","string"]}
        ]}"#;
        let resolver = resolver_with(MOR_PROPERTIES, schema).await;

        let mut raw = orders_table();
        raw.columns[1] = RawColumn::new("order_id", "int");

        let table = resolver.resolve(&raw).await.unwrap();
        assert_eq!(table.column("order_id").unwrap().column_type, ColumnType::Long);
        assert!(table.column("channel").unwrap().nullable);
        // dt exists only in the metastore and is appended
        assert_eq!(table.columns.last().unwrap().name, "dt");

        let drift = &table.hudi.as_ref().unwrap().schema_drift;
        assert_eq!(drift.len(), 2, "{:?}", drift);
        assert!(drift.iter().any(|d| d.contains("order_id")));
        assert!(drift.iter().any(|d| d.contains("channel")));
    }

    #[tokio::test]
    async fn test_conflicting_table_type_fails() {
        let properties = MOR_PROPERTIES.replace("MERGE_ON_READ", "COPY_ON_WRITE");
        let resolver = resolver_with(&properties, ORDERS_SCHEMA).await;

        let err = resolver.resolve(&orders_table()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert!(err.to_string().contains("Invalid metadata"));
    }

    #[tokio::test]
    async fn test_missing_table_type_defaults_to_copy_on_write() {
        let properties = "hoodie.table.name=orders\nhoodie.table.recordkey.fields=order_id\n";
        let resolver = resolver_with(properties, ORDERS_SCHEMA).await;

        let mut raw = orders_table();
        raw.parameters.clear();
        raw.input_format = Some(HUDI_INPUT_FORMAT.into());

        let table = resolver.resolve(&raw).await.unwrap();
        assert_eq!(table.hudi.unwrap().table_type, HudiTableType::CopyOnWrite);
    }

    #[tokio::test]
    async fn test_partition_fields_from_properties_when_metastore_has_none() {
        let resolver = resolver_with(MOR_PROPERTIES, ORDERS_SCHEMA).await;

        let mut raw = orders_table();
        raw.partition_keys.clear();

        let table = resolver.resolve(&raw).await.unwrap();
        assert_eq!(table.partition_keys, vec!["dt"]);
        assert_eq!(table.column("dt").unwrap().column_type, ColumnType::String);
    }

    #[tokio::test]
    async fn test_missing_timeline_fails() {
        let storage = StorageRegistry::new(HashMap::new());
        storage.register("s3://lake", Arc::new(InMemory::new())).unwrap();
        let resolver = TableResolver::new(Arc::new(storage));

        let err = resolver.resolve(&orders_table()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
    }

    #[tokio::test]
    async fn test_views_are_rejected() {
        let resolver = TableResolver::new(Arc::new(StorageRegistry::new(HashMap::new())));
        let raw = RawTable {
            database: "sales".into(),
            name: "recent_orders".into(),
            table_type: VIRTUAL_VIEW.into(),
            ..Default::default()
        };

        let err = resolver.resolve(&raw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
    }

    #[tokio::test]
    async fn test_unsupported_timeline_type_fails_closed() {
        let schema = r#"{"type":"record","name":"r","fields":[
            {"name":"dt","type":"string"},
            {"name":"big","type":{"type":"bytes","logicalType":"decimal","precision":60,"scale":0}}
        ]}"#;
        let resolver = resolver_with(MOR_PROPERTIES, schema).await;

        let err = resolver.resolve(&orders_table()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedType);
    }
}
