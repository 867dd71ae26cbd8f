//! Pooled, fault-tolerant Metastore access.
//!
//! Every call leases a connection from the pool. Reads are retried on
//! transient failures following the configured backoff schedule; writes run
//! exactly once. A circuit breaker stops calls from piling up on a Metastore
//! that keeps failing.

use super::pool::{AcquireError, ConnectionPool, PoolStats};
use super::{connector_from_config, MetastoreClient, MetastoreConnector, RawDatabase, RawPartition, RawTable};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::config::MetastoreConfig;
use crate::error::ErrorKind;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Health of the Metastore connection.
#[derive(Debug, Clone)]
pub struct CatalogHealth {
    /// Whether the Metastore answered
    pub is_healthy: bool,
    /// Response time in milliseconds
    pub response_time_ms: u64,
    /// Optional message with details
    pub message: Option<String>,
    /// Metastore endpoint
    pub endpoint: String,
    /// Circuit breaker state at the time of the check
    pub circuit_state: CircuitState,
    /// Pool statistics at the time of the check
    pub pool: PoolStats,
}

/// Metastore client adapter.
pub struct MetastoreAdapter {
    pool: ConnectionPool,
    circuit_breaker: CircuitBreaker,
    config: MetastoreConfig,
    last_health_check: RwLock<Option<CatalogHealth>>,
}

impl MetastoreAdapter {
    /// Create an adapter over the given connector.
    pub fn new(connector: Arc<dyn MetastoreConnector>, config: &MetastoreConfig) -> Self {
        let pool = ConnectionPool::new(connector, config.pool_size, config.acquire_timeout());

        let circuit_breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new("hive-metastore")
                .with_failure_threshold(config.circuit_failure_threshold)
                .with_reset_timeout(Duration::from_secs(config.circuit_reset_seconds))
                .with_success_threshold(1),
        );

        info!(
            endpoint = %pool.endpoint(),
            pool_size = config.pool_size,
            max_retries = config.max_retries,
            "Metastore adapter initialized"
        );

        Self {
            pool,
            circuit_breaker,
            config: config.clone(),
            last_health_check: RwLock::new(None),
        }
    }

    /// Create an adapter for the configured backend.
    pub fn from_config(config: &MetastoreConfig) -> Result<Self> {
        Ok(Self::new(connector_from_config(config)?, config))
    }

    /// Partitions fetched per `get_partitions_by_names` round trip.
    pub fn partition_batch_size(&self) -> usize {
        self.config.partition_batch_size
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Result of the most recent health check.
    pub fn last_health(&self) -> Option<CatalogHealth> {
        self.last_health_check.read().clone()
    }

    fn check_circuit_breaker(&self, op: &'static str) -> Result<()> {
        if !self.circuit_breaker.is_allowed() {
            warn!(op, "Circuit breaker is open, rejecting Metastore call");
            return Err(Error::TransientUnavailable(format!(
                "circuit breaker open, retry in {}ms",
                self.circuit_breaker.retry_after().as_millis()
            )));
        }
        Ok(())
    }

    /// One attempt on one leased connection.
    async fn call_once<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn MetastoreClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut conn = match self.pool.lease().await {
            Ok(conn) => conn,
            Err(AcquireError::Connect(e)) => {
                // An unreachable Metastore counts against the breaker
                self.circuit_breaker.record_failure();
                warn!(op, error = %e, "Failed to connect to Hive Metastore");
                return Err(e);
            }
            Err(AcquireError::Exhausted(e)) => return Err(e),
        };
        let start = Instant::now();
        let result = f(conn.client()).await;

        match &result {
            Err(e) if e.is_transient() => {
                conn.mark_broken();
                self.circuit_breaker.record_failure();
                debug!(op, error = %e, "Metastore call failed");
            }
            _ => {
                self.circuit_breaker.record_success();
                debug!(
                    op,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Metastore call completed"
                );
            }
        }
        result
    }

    /// Run an idempotent read, retrying transient failures.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(Arc<dyn MetastoreClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.check_circuit_breaker(op)?;

            match self.call_once(op, |client| f(client)).await {
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt as usize);
                    attempt += 1;
                    warn!(
                        op,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying Metastore read"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Run a write exactly once.
    async fn write_once<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn MetastoreClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check_circuit_breaker(op)?;
        self.call_once(op, f).await
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.with_retry("get_all_databases", |c| async move {
            c.get_all_databases().await
        })
        .await
    }

    pub async fn get_database(&self, name: &str) -> Result<RawDatabase> {
        let name = name.to_lowercase();
        let name = name.as_str();
        self.with_retry("get_database", |c| async move { c.get_database(name).await })
            .await
    }

    pub async fn create_database(&self, database: RawDatabase) -> Result<()> {
        let database = RawDatabase {
            name: database.name.to_lowercase(),
            ..database
        };
        let name = database.name.clone();
        self.write_once("create_database", |c| async move {
            c.create_database(database).await
        })
        .await?;
        info!(database = %name, "Created Metastore database");
        Ok(())
    }

    pub async fn drop_database(&self, name: &str, cascade: bool) -> Result<()> {
        let name = name.to_lowercase();
        let db = name.as_str();
        self.write_once("drop_database", |c| async move {
            c.drop_database(db, false, cascade).await
        })
        .await?;
        info!(database = %name, cascade, "Dropped Metastore database");
        Ok(())
    }

    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let database = database.to_lowercase();
        let db = database.as_str();
        self.with_retry("get_all_tables", |c| async move { c.get_all_tables(db).await })
            .await
    }

    pub async fn get_table(&self, database: &str, table: &str) -> Result<RawTable> {
        let (database, table) = (database.to_lowercase(), table.to_lowercase());
        let (db, tbl) = (database.as_str(), table.as_str());
        self.with_retry("get_table", |c| async move { c.get_table(db, tbl).await })
            .await
    }

    pub async fn create_table(&self, table: RawTable) -> Result<()> {
        let table = RawTable {
            database: table.database.to_lowercase(),
            name: table.name.to_lowercase(),
            ..table
        };
        let qualified = table.qualified_name();
        self.write_once("create_table", |c| async move { c.create_table(table).await })
            .await?;
        info!(table = %qualified, "Created Metastore table");
        Ok(())
    }

    /// Drop a table; with `if_exists` a missing table is not an error.
    pub async fn drop_table(&self, database: &str, table: &str, if_exists: bool) -> Result<()> {
        let (database, table) = (database.to_lowercase(), table.to_lowercase());
        let (db, tbl) = (database.as_str(), table.as_str());
        match self
            .write_once("drop_table", |c| async move { c.drop_table(db, tbl, false).await })
            .await
        {
            Ok(()) => {
                info!(database = %db, table = %tbl, "Dropped Metastore table");
                Ok(())
            }
            Err(e) if if_exists && e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Partition names, optionally narrowed by partial values.
    pub async fn list_partition_names(
        &self,
        database: &str,
        table: &str,
        partial_values: Option<&[String]>,
    ) -> Result<Vec<String>> {
        let (database, table) = (database.to_lowercase(), table.to_lowercase());
        let (db, tbl) = (database.as_str(), table.as_str());
        let op = if partial_values.is_some() {
            "get_partition_names_ps"
        } else {
            "get_partition_names"
        };
        self.with_retry(op, |c| async move {
            c.get_partition_names(db, tbl, partial_values, -1).await
        })
        .await
    }

    pub async fn get_partitions_by_names(
        &self,
        database: &str,
        table: &str,
        names: &[String],
    ) -> Result<Vec<RawPartition>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let (database, table) = (database.to_lowercase(), table.to_lowercase());
        let (db, tbl) = (database.as_str(), table.as_str());
        self.with_retry("get_partitions_by_names", |c| async move {
            c.get_partitions_by_names(db, tbl, names).await
        })
        .await
    }

    /// All partition descriptors matching the partial values, fetched in
    /// batches.
    pub async fn list_partitions(
        &self,
        database: &str,
        table: &str,
        partial_values: Option<&[String]>,
    ) -> Result<Vec<RawPartition>> {
        let names = self
            .list_partition_names(database, table, partial_values)
            .await?;
        let mut partitions = Vec::with_capacity(names.len());
        for batch in names.chunks(self.config.partition_batch_size.max(1)) {
            partitions.extend(self.get_partitions_by_names(database, table, batch).await?);
        }
        Ok(partitions)
    }

    /// Check the Metastore answers a cheap call.
    pub async fn health_check(&self) -> Result<CatalogHealth> {
        let start = Instant::now();

        let result = match self.check_circuit_breaker("health_check") {
            Ok(()) => {
                self.call_once("health_check", |c| async move {
                    c.get_all_databases().await
                })
                .await
            }
            Err(e) => Err(e),
        };
        let response_time_ms = start.elapsed().as_millis() as u64;

        let health = CatalogHealth {
            is_healthy: result.is_ok(),
            response_time_ms,
            message: Some(match &result {
                Ok(_) => format!("Hive Metastore at {} is healthy", self.pool.endpoint()),
                Err(e) => format!("Connection failed: {}", e),
            }),
            endpoint: self.pool.endpoint().to_string(),
            circuit_state: self.circuit_breaker.state(),
            pool: self.pool.stats(),
        };

        *self.last_health_check.write() = Some(health.clone());
        Ok(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::{InMemoryMetastore, MetastoreException, RawColumn};

    fn config() -> MetastoreConfig {
        MetastoreConfig {
            pool_size: 2,
            acquire_timeout_ms: 100,
            max_retries: 2,
            reconnect_backoff_ms: vec![1, 2],
            circuit_failure_threshold: 10,
            ..Default::default()
        }
    }

    fn adapter(config: &MetastoreConfig) -> (InMemoryMetastore, MetastoreAdapter) {
        let metastore = InMemoryMetastore::new();
        let adapter = MetastoreAdapter::new(Arc::new(metastore.clone()), config);
        (metastore, adapter)
    }

    fn table(db: &str, name: &str) -> RawTable {
        RawTable {
            database: db.into(),
            name: name.into(),
            table_type: crate::metastore::EXTERNAL_TABLE.into(),
            columns: vec![RawColumn::new("id", "int")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reads_are_retried() {
        let (metastore, adapter) = adapter(&config());
        metastore.add_table(table("sales", "orders"));
        metastore.fail_next_calls(2);

        let raw = adapter.get_table("sales", "orders").await.unwrap();
        assert_eq!(raw.name, "orders");
        assert_eq!(metastore.call_count("get_table"), 3);
        assert_eq!(adapter.pool_stats().total_discarded, 2);
    }

    #[tokio::test]
    async fn test_reads_give_up_after_max_retries() {
        let (metastore, adapter) = adapter(&config());
        metastore.fail_next_calls(5);

        let err = adapter.list_databases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
        assert_eq!(metastore.call_count("get_all_databases"), 3);
    }

    #[tokio::test]
    async fn test_writes_are_not_retried() {
        let (metastore, adapter) = adapter(&config());
        metastore.add_database(RawDatabase {
            name: "sales".into(),
            ..Default::default()
        });
        metastore.fail_next_calls(1);

        let err = adapter.create_table(table("sales", "orders")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
        assert_eq!(metastore.call_count("create_table"), 1);

        let err = adapter.get_table("sales", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_logical_errors_are_not_retried() {
        let (metastore, adapter) = adapter(&config());

        let err = adapter.get_table("sales", "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(metastore.call_count("get_table"), 1);
        assert_eq!(adapter.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_opens_and_fails_fast() {
        let config = MetastoreConfig {
            max_retries: 0,
            circuit_failure_threshold: 2,
            circuit_reset_seconds: 60,
            ..config()
        };
        let (metastore, adapter) = adapter(&config);
        metastore.fail_next_calls(2);

        assert!(adapter.list_databases().await.is_err());
        assert!(adapter.list_databases().await.is_err());
        assert_eq!(adapter.circuit_state(), CircuitState::Open);

        let err = adapter.list_databases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
        assert_eq!(metastore.call_count("get_all_databases"), 2);
    }

    #[tokio::test]
    async fn test_connect_failures_open_the_circuit() {
        let config = MetastoreConfig {
            max_retries: 0,
            circuit_failure_threshold: 2,
            circuit_reset_seconds: 60,
            ..config()
        };
        let (metastore, adapter) = adapter(&config);
        metastore.fail_next_connects(2);

        assert!(adapter.list_databases().await.is_err());
        assert!(adapter.list_databases().await.is_err());
        assert_eq!(adapter.circuit_state(), CircuitState::Open);

        let err = adapter.list_databases().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
        assert_eq!(metastore.connections_opened(), 0);
        assert_eq!(metastore.call_count("get_all_databases"), 0);
    }

    #[tokio::test]
    async fn test_server_exceptions_are_not_retried() {
        let config = MetastoreConfig {
            circuit_failure_threshold: 1,
            ..config()
        };
        let (metastore, adapter) = adapter(&config);
        metastore.add_table(table("sales", "orders"));
        metastore.raise_next(MetastoreException::Meta(
            "MetaException: SerDe com.acme.Broken does not exist".into(),
        ));

        let err = adapter.get_table("sales", "orders").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert_eq!(metastore.call_count("get_table"), 1);
        assert_eq!(adapter.circuit_state(), CircuitState::Closed);
        assert_eq!(adapter.pool_stats().total_discarded, 0);

        assert!(adapter.get_table("sales", "orders").await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_table_if_exists() {
        let (_, adapter) = adapter(&config());

        adapter.drop_table("sales", "missing", true).await.unwrap();
        let err = adapter.drop_table("sales", "missing", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_partitions_in_batches() {
        let config = MetastoreConfig {
            partition_batch_size: 2,
            ..config()
        };
        let (metastore, adapter) = adapter(&config);
        let mut orders = table("sales", "orders");
        orders.partition_keys = vec![RawColumn::new("dt", "string")];
        metastore.add_table(orders);
        for day in 1..=5 {
            metastore
                .add_partition(
                    "sales",
                    "orders",
                    RawPartition {
                        values: vec![format!("2024-01-0{}", day)],
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let partitions = adapter.list_partitions("sales", "orders", None).await.unwrap();
        assert_eq!(partitions.len(), 5);
        assert_eq!(metastore.call_count("get_partitions_by_names"), 3);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (metastore, adapter) = adapter(&config());

        let health = adapter.health_check().await.unwrap();
        assert!(health.is_healthy);
        assert_eq!(health.endpoint, "memory://");

        metastore.fail_next_calls(1);
        let health = adapter.health_check().await.unwrap();
        assert!(!health.is_healthy);
        assert!(!adapter.last_health().unwrap().is_healthy);
    }
}
