//! Hive Metastore Thrift backend.
//!
//! Talks to HMS through the `hive_metastore` crate. Each [`ThriftClient`] is
//! one Thrift connection; the pool decides how many exist.

use super::{
    classify_exception, MetastoreClient, MetastoreConnector, MetastoreException, RawColumn,
    RawDatabase, RawPartition, RawTable,
};
use crate::error::Entity;
use crate::{Error, Result};
use ahash::AHashMap;
use async_trait::async_trait;
use faststr::FastStr;
use hive_metastore::{ThriftHiveMetastoreClient, ThriftHiveMetastoreClientBuilder};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};
use volo_thrift::MaybeException;

/// Opens Thrift connections to a Hive Metastore.
pub struct ThriftConnector {
    uri: String,
    host: String,
    port: u16,
    request_timeout: Duration,
}

impl ThriftConnector {
    /// Create a connector for `thrift://host:port`.
    pub fn new(uri: &str, request_timeout: Duration) -> Result<Self> {
        let (host, port) = parse_thrift_uri(uri)?;
        Ok(Self {
            uri: uri.to_string(),
            host,
            port,
            request_timeout,
        })
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                Error::TransientUnavailable(format!(
                    "failed to resolve Hive Metastore host {}: {}",
                    self.host, e
                ))
            })?;
        addrs.next().ok_or_else(|| {
            Error::TransientUnavailable(format!("no address for Hive Metastore host {}", self.host))
        })
    }
}

#[async_trait]
impl MetastoreConnector for ThriftConnector {
    async fn connect(&self) -> Result<Arc<dyn MetastoreClient>> {
        let address = self.resolve().await?;
        debug!(uri = %self.uri, address = %address, "Connecting to Hive Metastore");

        let client = ThriftHiveMetastoreClientBuilder::new("hudicat")
            .address(address)
            .build();

        info!(uri = %self.uri, "Connected to Hive Metastore");
        Ok(Arc::new(ThriftClient {
            client,
            request_timeout: self.request_timeout,
        }))
    }

    fn endpoint(&self) -> &str {
        &self.uri
    }
}

/// Parse a Thrift URI (thrift://host:port) into host and port.
pub fn parse_thrift_uri(uri: &str) -> Result<(String, u16)> {
    let uri = uri.strip_prefix("thrift://").unwrap_or(uri);

    let parts: Vec<&str> = uri.split(':').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(Error::Config(format!(
            "Invalid Hive Metastore URI format: {}. Expected thrift://host:port",
            uri
        )));
    }

    let host = parts[0].to_string();
    let port = parts[1].parse::<u16>().map_err(|_| {
        Error::Config(format!("Invalid port in Hive Metastore URI: {}", parts[1]))
    })?;

    Ok((host, port))
}

/// One Thrift connection.
pub struct ThriftClient {
    client: ThriftHiveMetastoreClient,
    request_timeout: Duration,
}

impl ThriftClient {
    /// Run one RPC under the request timeout.
    ///
    /// Transport failures become `TransientUnavailable`; a declared
    /// exception is handed back for classification by the caller.
    async fn rpc<T, E, CE, Fut>(
        &self,
        op: &'static str,
        call: Fut,
    ) -> Result<std::result::Result<T, MetastoreException>>
    where
        E: Into<MetastoreException>,
        CE: Display,
        Fut: Future<Output = std::result::Result<MaybeException<T, E>, CE>>,
    {
        match timeout(self.request_timeout, call).await {
            Err(_) => Err(Error::TransientUnavailable(format!(
                "{} timed out after {}s",
                op,
                self.request_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(Error::TransientUnavailable(format!("{} failed: {}", op, e))),
            Ok(Ok(MaybeException::Ok(value))) => Ok(Ok(value)),
            Ok(Ok(MaybeException::Exception(e))) => Ok(Err(e.into())),
        }
    }
}

fn message(message: Option<FastStr>) -> String {
    message.map(|m| m.to_string()).unwrap_or_default()
}

/// `From` impls for the per-RPC exception enums of the Metastore IDL.
macro_rules! declared_exceptions {
    ($($rpc:ident { $($variant:ident => $kind:ident),+ $(,)? })+) => {
        $(
            impl From<hive_metastore::$rpc> for MetastoreException {
                fn from(exception: hive_metastore::$rpc) -> Self {
                    match exception {
                        $(hive_metastore::$rpc::$variant(e) => MetastoreException::$kind(message(e.message)),)+
                    }
                }
            }
        )+
    };
}

declared_exceptions! {
    ThriftHiveMetastoreGetAllDatabasesException { O1 => Meta }
    ThriftHiveMetastoreGetDatabaseException { O1 => NoSuchObject, O2 => Meta }
    ThriftHiveMetastoreCreateDatabaseException {
        O1 => AlreadyExists,
        O2 => InvalidObject,
        O3 => Meta,
    }
    ThriftHiveMetastoreDropDatabaseException {
        O1 => NoSuchObject,
        O2 => InvalidOperation,
        O3 => Meta,
    }
    ThriftHiveMetastoreGetAllTablesException { O1 => Meta }
    ThriftHiveMetastoreGetTableException { O1 => Meta, O2 => NoSuchObject }
    ThriftHiveMetastoreCreateTableException {
        O1 => AlreadyExists,
        O2 => InvalidObject,
        O3 => Meta,
        O4 => NoSuchObject,
    }
    ThriftHiveMetastoreDropTableException { O1 => NoSuchObject, O3 => Meta }
    ThriftHiveMetastoreGetPartitionNamesException { O2 => Meta }
    ThriftHiveMetastoreGetPartitionNamesPsException { O1 => Meta, O2 => NoSuchObject }
    ThriftHiveMetastoreGetPartitionsByNamesException { O1 => Meta, O2 => NoSuchObject }
}

#[async_trait]
impl MetastoreClient for ThriftClient {
    async fn get_all_databases(&self) -> Result<Vec<String>> {
        let databases = self
            .rpc("get_all_databases", self.client.get_all_databases())
            .await?
            .map_err(|e| classify_exception(e, Entity::Schema, "*"))?;
        Ok(databases.into_iter().map(|s| s.to_string()).collect())
    }

    async fn get_database(&self, name: &str) -> Result<RawDatabase> {
        let database = self
            .rpc("get_database", self.client.get_database(fs(name)))
            .await?
            .map_err(|e| classify_exception(e, Entity::Schema, name))?;
        Ok(database_from_thrift(database))
    }

    async fn create_database(&self, database: RawDatabase) -> Result<()> {
        let name = database.name.clone();
        self.rpc(
            "create_database",
            self.client.create_database(database_to_thrift(database)),
        )
        .await?
        .map_err(|e| classify_exception(e, Entity::Schema, &name))
    }

    async fn drop_database(&self, name: &str, delete_data: bool, cascade: bool) -> Result<()> {
        self.rpc(
            "drop_database",
            self.client.drop_database(fs(name), delete_data, cascade),
        )
        .await?
        .map_err(|e| classify_exception(e, Entity::Schema, name))
    }

    async fn get_all_tables(&self, database: &str) -> Result<Vec<String>> {
        let tables = self
            .rpc("get_all_tables", self.client.get_all_tables(fs(database)))
            .await?
            .map_err(|e| classify_exception(e, Entity::Schema, database))?;
        Ok(tables.into_iter().map(|s| s.to_string()).collect())
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<RawTable> {
        let qualified = format!("{}.{}", database, table);
        let hive_table = self
            .rpc("get_table", self.client.get_table(fs(database), fs(table)))
            .await?
            .map_err(|e| classify_exception(e, Entity::Table, &qualified))?;
        Ok(table_from_thrift(hive_table))
    }

    async fn create_table(&self, table: RawTable) -> Result<()> {
        let qualified = table.qualified_name();
        self.rpc("create_table", self.client.create_table(table_to_thrift(table)))
            .await?
            .map_err(|e| classify_exception(e, Entity::Table, &qualified))
    }

    async fn drop_table(&self, database: &str, table: &str, delete_data: bool) -> Result<()> {
        let qualified = format!("{}.{}", database, table);
        self.rpc(
            "drop_table",
            self.client.drop_table(fs(database), fs(table), delete_data),
        )
        .await?
        .map_err(|e| classify_exception(e, Entity::Table, &qualified))
    }

    async fn get_partition_names(
        &self,
        database: &str,
        table: &str,
        partial_values: Option<&[String]>,
        max_parts: i16,
    ) -> Result<Vec<String>> {
        let qualified = format!("{}.{}", database, table);
        let names = match partial_values {
            Some(values) => {
                let values: Vec<FastStr> = values.iter().map(|v| fs(v)).collect();
                self.rpc(
                    "get_partition_names_ps",
                    self.client
                        .get_partition_names_ps(fs(database), fs(table), values, max_parts),
                )
                .await?
            }
            None => {
                self.rpc(
                    "get_partition_names",
                    self.client
                        .get_partition_names(fs(database), fs(table), max_parts),
                )
                .await?
            }
        }
        .map_err(|e| classify_exception(e, Entity::Table, &qualified))?;
        Ok(names.into_iter().map(|s| s.to_string()).collect())
    }

    async fn get_partitions_by_names(
        &self,
        database: &str,
        table: &str,
        names: &[String],
    ) -> Result<Vec<RawPartition>> {
        let qualified = format!("{}.{}", database, table);
        let names: Vec<FastStr> = names.iter().map(|n| fs(n)).collect();
        let partitions = self
            .rpc(
                "get_partitions_by_names",
                self.client
                    .get_partitions_by_names(fs(database), fs(table), names),
            )
            .await?
            .map_err(|e| classify_exception(e, Entity::Partition, &qualified))?;
        Ok(partitions.into_iter().map(partition_from_thrift).collect())
    }
}

fn fs(value: &str) -> FastStr {
    FastStr::from(value.to_string())
}

fn opt_string(value: Option<FastStr>) -> Option<String> {
    value.map(|s| s.to_string())
}

fn map_from_thrift(params: Option<AHashMap<FastStr, FastStr>>) -> HashMap<String, String> {
    params
        .map(|p| {
            p.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn map_to_thrift(params: HashMap<String, String>) -> Option<AHashMap<FastStr, FastStr>> {
    if params.is_empty() {
        return None;
    }
    Some(
        params
            .into_iter()
            .map(|(k, v)| (FastStr::from(k), FastStr::from(v)))
            .collect(),
    )
}

fn columns_from_thrift(cols: Option<Vec<hive_metastore::FieldSchema>>) -> Vec<RawColumn> {
    cols.unwrap_or_default()
        .into_iter()
        .map(|c| RawColumn {
            name: c.name.map(|s| s.to_string()).unwrap_or_default(),
            type_name: c.r#type.map(|s| s.to_string()).unwrap_or_default(),
            comment: opt_string(c.comment),
        })
        .collect()
}

fn columns_to_thrift(cols: Vec<RawColumn>) -> Vec<hive_metastore::FieldSchema> {
    cols.into_iter()
        .map(|c| hive_metastore::FieldSchema {
            name: Some(c.name.into()),
            r#type: Some(c.type_name.into()),
            comment: c.comment.map(|s| s.into()),
        })
        .collect()
}

fn database_from_thrift(database: hive_metastore::Database) -> RawDatabase {
    RawDatabase {
        name: database.name.map(|s| s.to_string()).unwrap_or_default(),
        description: opt_string(database.description),
        location: opt_string(database.location_uri),
        parameters: map_from_thrift(database.parameters),
        owner: opt_string(database.owner_name),
    }
}

fn database_to_thrift(database: RawDatabase) -> hive_metastore::Database {
    hive_metastore::Database {
        name: Some(database.name.into()),
        description: database.description.map(|s| s.into()),
        location_uri: database.location.map(|s| s.into()),
        parameters: map_to_thrift(database.parameters),
        owner_name: database.owner.map(|s| s.into()),
        ..Default::default()
    }
}

fn table_from_thrift(table: hive_metastore::Table) -> RawTable {
    let sd = table.sd.unwrap_or_default();
    let serde_info = sd.serde_info.unwrap_or_default();

    RawTable {
        database: table.db_name.map(|s| s.to_string()).unwrap_or_default(),
        name: table.table_name.map(|s| s.to_string()).unwrap_or_default(),
        owner: opt_string(table.owner),
        table_type: table.table_type.map(|s| s.to_string()).unwrap_or_default(),
        columns: columns_from_thrift(sd.cols),
        partition_keys: columns_from_thrift(table.partition_keys),
        location: opt_string(sd.location),
        input_format: opt_string(sd.input_format),
        output_format: opt_string(sd.output_format),
        serde_lib: opt_string(serde_info.serialization_lib),
        serde_parameters: map_from_thrift(serde_info.parameters),
        parameters: map_from_thrift(table.parameters),
        create_time: table.create_time,
    }
}

fn table_to_thrift(table: RawTable) -> hive_metastore::Table {
    let storage_descriptor = hive_metastore::StorageDescriptor {
        cols: Some(columns_to_thrift(table.columns)),
        location: table.location.map(|s| s.into()),
        input_format: table.input_format.map(|s| s.into()),
        output_format: table.output_format.map(|s| s.into()),
        serde_info: Some(hive_metastore::SerDeInfo {
            name: None,
            serialization_lib: table.serde_lib.map(|s| s.into()),
            parameters: map_to_thrift(table.serde_parameters),
            ..Default::default()
        }),
        compressed: Some(false),
        num_buckets: Some(-1),
        stored_as_sub_directories: Some(false),
        ..Default::default()
    };

    hive_metastore::Table {
        table_name: Some(table.name.into()),
        db_name: Some(table.database.into()),
        owner: table.owner.map(|s| s.into()),
        create_time: table.create_time,
        last_access_time: Some(0),
        retention: Some(0),
        sd: Some(storage_descriptor),
        partition_keys: Some(columns_to_thrift(table.partition_keys)),
        parameters: map_to_thrift(table.parameters),
        table_type: Some(table.table_type.into()),
        temporary: Some(false),
        ..Default::default()
    }
}

fn partition_from_thrift(partition: hive_metastore::Partition) -> RawPartition {
    RawPartition {
        values: partition
            .values
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.to_string())
            .collect(),
        location: partition.sd.and_then(|sd| sd.location).map(|s| s.to_string()),
        parameters: map_from_thrift(partition.parameters),
        create_time: partition.create_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_parse_thrift_uri() {
        let (host, port) = parse_thrift_uri("thrift://localhost:9083").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 9083);

        let (host, port) = parse_thrift_uri("hms.internal:9083").unwrap();
        assert_eq!(host, "hms.internal");
        assert_eq!(port, 9083);
    }

    #[test]
    fn test_parse_thrift_uri_invalid() {
        assert!(parse_thrift_uri("thrift://localhost").is_err());
        assert!(parse_thrift_uri("thrift://localhost:notaport").is_err());
        assert!(parse_thrift_uri("thrift://:9083").is_err());
    }

    #[test]
    fn test_declared_exceptions_are_decoded() {
        use hive_metastore::{
            MetaException, NoSuchObjectException, ThriftHiveMetastoreDropDatabaseException,
            ThriftHiveMetastoreGetTableException, InvalidOperationException,
        };

        let missing = ThriftHiveMetastoreGetTableException::O2(NoSuchObjectException {
            message: Some("sales.orders table not found".into()),
        });
        assert_eq!(
            MetastoreException::from(missing),
            MetastoreException::NoSuchObject("sales.orders table not found".into())
        );

        let serde = ThriftHiveMetastoreGetTableException::O1(MetaException {
            message: Some("ClassNotFoundException: com.acme.BrokenSerDe".into()),
        });
        let err = classify_exception(serde.into(), Entity::Table, "sales.orders");
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert!(err.to_string().contains("sales.orders"));

        let not_empty = ThriftHiveMetastoreDropDatabaseException::O2(InvalidOperationException {
            message: Some("Database sales is not empty".into()),
        });
        let err = classify_exception(not_empty.into(), Entity::Schema, "sales");
        assert_eq!(err.kind(), ErrorKind::NotEmpty);

        let no_message = ThriftHiveMetastoreDropDatabaseException::O3(MetaException { message: None });
        assert_eq!(
            MetastoreException::from(no_message),
            MetastoreException::Meta(String::new())
        );
    }

    #[test]
    fn test_table_conversion_round_trip() {
        let mut parameters = HashMap::new();
        parameters.insert("hoodie.table.type".to_string(), "MERGE_ON_READ".to_string());

        let raw = RawTable {
            database: "sales".into(),
            name: "orders".into(),
            owner: Some("etl".into()),
            table_type: super::super::EXTERNAL_TABLE.into(),
            columns: vec![RawColumn::new("order_id", "bigint")],
            partition_keys: vec![RawColumn::new("dt", "string")],
            location: Some("s3://lake/sales/orders".into()),
            input_format: Some("org.apache.hudi.hadoop.HoodieParquetInputFormat".into()),
            output_format: None,
            serde_lib: None,
            serde_parameters: HashMap::new(),
            parameters,
            create_time: Some(1_700_000_000),
        };

        let thrift = table_to_thrift(raw.clone());
        assert_eq!(thrift.table_type.as_deref(), Some("EXTERNAL_TABLE"));
        assert_eq!(table_from_thrift(thrift), raw);
    }

    #[test]
    fn test_partition_conversion() {
        let partition = hive_metastore::Partition {
            values: Some(vec!["2024-01-01".into()]),
            sd: Some(hive_metastore::StorageDescriptor {
                location: Some("s3://lake/sales/orders/dt=2024-01-01".into()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let raw = partition_from_thrift(partition);
        assert_eq!(raw.values, vec!["2024-01-01".to_string()]);
        assert_eq!(
            raw.location.as_deref(),
            Some("s3://lake/sales/orders/dt=2024-01-01")
        );
    }

    #[tokio::test]
    #[ignore = "requires Hive Metastore"]
    async fn test_thrift_list_databases() {
        let connector = ThriftConnector::new("thrift://localhost:9083", Duration::from_secs(5))
            .unwrap();
        let client = connector.connect().await.unwrap();
        let databases = client.get_all_databases().await.unwrap();
        assert!(databases.contains(&"default".to_string()));
    }
}
