//! In-process Metastore.
//!
//! Behaves like HMS for the calls the catalog makes: lowercase names,
//! Thrift-style exceptions mapped to the same error kinds, partial partition
//! value matching. Clones share state, so a test can keep a handle while the
//! pool owns connections. Transport failures can be injected.

use super::{
    classify_exception, make_partition_name, MetastoreClient, MetastoreConnector,
    MetastoreException, RawDatabase, RawPartition, RawTable,
};
use crate::error::Entity;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct TableEntry {
    table: RawTable,
    partitions: BTreeMap<String, RawPartition>,
}

#[derive(Default)]
struct DatabaseEntry {
    database: RawDatabase,
    tables: BTreeMap<String, TableEntry>,
}

#[derive(Default)]
struct State {
    databases: BTreeMap<String, DatabaseEntry>,
    fail_calls: u32,
    fail_connects: u32,
    raise: Option<MetastoreException>,
    calls: HashMap<&'static str, u64>,
    connections: u64,
}

/// Shared in-memory Metastore.
#[derive(Clone, Default)]
pub struct InMemoryMetastore {
    state: Arc<Mutex<State>>,
}

impl InMemoryMetastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a database.
    pub fn add_database(&self, database: RawDatabase) {
        let name = database.name.to_lowercase();
        let mut state = self.state.lock();
        let entry = state.databases.entry(name.clone()).or_default();
        entry.database = RawDatabase { name, ..database };
    }

    /// Insert or replace a table; its database is created if missing.
    pub fn add_table(&self, table: RawTable) {
        let database = table.database.to_lowercase();
        let name = table.name.to_lowercase();
        let mut state = self.state.lock();
        let db = state.databases.entry(database.clone()).or_default();
        if db.database.name.is_empty() {
            db.database.name = database.clone();
        }
        db.tables.insert(
            name.clone(),
            TableEntry {
                table: RawTable {
                    database,
                    name,
                    ..table
                },
                partitions: BTreeMap::new(),
            },
        );
    }

    /// Register a partition of an existing table.
    pub fn add_partition(&self, database: &str, table: &str, partition: RawPartition) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .databases
            .get_mut(&database.to_lowercase())
            .and_then(|db| db.tables.get_mut(&table.to_lowercase()))
            .ok_or_else(|| Error::not_found(Entity::Table, format!("{}.{}", database, table)))?;

        if partition.values.len() != entry.table.partition_keys.len() {
            return Err(Error::InvalidArgument(format!(
                "{} partition values for {} partition keys",
                partition.values.len(),
                entry.table.partition_keys.len()
            )));
        }
        let name = make_partition_name(&entry.table.partition_keys, &partition.values);
        entry.partitions.insert(name, partition);
        Ok(())
    }

    /// Fail the next `count` RPCs with a transport error.
    pub fn fail_next_calls(&self, count: u32) {
        self.state.lock().fail_calls = count;
    }

    /// Answer the next RPC with a declared Metastore exception.
    pub fn raise_next(&self, exception: MetastoreException) {
        self.state.lock().raise = Some(exception);
    }

    /// Fail the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().fail_connects = count;
    }

    /// Number of times `op` was called (including injected failures).
    pub fn call_count(&self, op: &str) -> u64 {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Number of connections handed out.
    pub fn connections_opened(&self) -> u64 {
        self.state.lock().connections
    }

    fn begin(&self, op: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_insert(0) += 1;
        if state.fail_calls > 0 {
            state.fail_calls -= 1;
            return Err(Error::TransientUnavailable(format!(
                "{} failed: connection reset",
                op
            )));
        }
        if let Some(exception) = state.raise.take() {
            return Err(classify_exception(exception, Entity::Table, op));
        }
        Ok(())
    }
}

fn table_entry<'a>(state: &'a State, database: &str, table: &str) -> Result<&'a TableEntry> {
    state
        .databases
        .get(&database.to_lowercase())
        .and_then(|db| db.tables.get(&table.to_lowercase()))
        .ok_or_else(|| Error::not_found(Entity::Table, format!("{}.{}", database, table)))
}

#[async_trait]
impl MetastoreConnector for InMemoryMetastore {
    async fn connect(&self) -> Result<Arc<dyn MetastoreClient>> {
        let mut state = self.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(Error::TransientUnavailable("connection refused".into()));
        }
        state.connections += 1;
        Ok(Arc::new(self.clone()))
    }

    fn endpoint(&self) -> &str {
        "memory://"
    }
}

#[async_trait]
impl MetastoreClient for InMemoryMetastore {
    async fn get_all_databases(&self) -> Result<Vec<String>> {
        self.begin("get_all_databases")?;
        Ok(self.state.lock().databases.keys().cloned().collect())
    }

    async fn get_database(&self, name: &str) -> Result<RawDatabase> {
        self.begin("get_database")?;
        self.state
            .lock()
            .databases
            .get(&name.to_lowercase())
            .map(|db| db.database.clone())
            .ok_or_else(|| Error::not_found(Entity::Schema, name))
    }

    async fn create_database(&self, database: RawDatabase) -> Result<()> {
        self.begin("create_database")?;
        let name = database.name.to_lowercase();
        let mut state = self.state.lock();
        if state.databases.contains_key(&name) {
            return Err(Error::already_exists(Entity::Schema, name));
        }
        state.databases.insert(
            name.clone(),
            DatabaseEntry {
                database: RawDatabase { name, ..database },
                tables: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_database(&self, name: &str, _delete_data: bool, cascade: bool) -> Result<()> {
        self.begin("drop_database")?;
        let key = name.to_lowercase();
        let mut state = self.state.lock();
        let db = state
            .databases
            .get(&key)
            .ok_or_else(|| Error::not_found(Entity::Schema, name))?;
        if !cascade && !db.tables.is_empty() {
            return Err(Error::NotEmpty(format!(
                "{} contains {} tables",
                name,
                db.tables.len()
            )));
        }
        state.databases.remove(&key);
        Ok(())
    }

    async fn get_all_tables(&self, database: &str) -> Result<Vec<String>> {
        self.begin("get_all_tables")?;
        self.state
            .lock()
            .databases
            .get(&database.to_lowercase())
            .map(|db| db.tables.keys().cloned().collect())
            .ok_or_else(|| Error::not_found(Entity::Schema, database))
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<RawTable> {
        self.begin("get_table")?;
        let state = self.state.lock();
        table_entry(&state, database, table).map(|entry| entry.table.clone())
    }

    async fn create_table(&self, table: RawTable) -> Result<()> {
        self.begin("create_table")?;
        let database = table.database.to_lowercase();
        let name = table.name.to_lowercase();
        let mut state = self.state.lock();
        let db = state
            .databases
            .get_mut(&database)
            .ok_or_else(|| Error::not_found(Entity::Schema, &database))?;
        if db.tables.contains_key(&name) {
            return Err(Error::already_exists(
                Entity::Table,
                format!("{}.{}", database, name),
            ));
        }
        db.tables.insert(
            name.clone(),
            TableEntry {
                table: RawTable {
                    database,
                    name,
                    ..table
                },
                partitions: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn drop_table(&self, database: &str, table: &str, _delete_data: bool) -> Result<()> {
        self.begin("drop_table")?;
        let mut state = self.state.lock();
        state
            .databases
            .get_mut(&database.to_lowercase())
            .and_then(|db| db.tables.remove(&table.to_lowercase()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(Entity::Table, format!("{}.{}", database, table)))
    }

    async fn get_partition_names(
        &self,
        database: &str,
        table: &str,
        partial_values: Option<&[String]>,
        max_parts: i16,
    ) -> Result<Vec<String>> {
        self.begin(if partial_values.is_some() {
            "get_partition_names_ps"
        } else {
            "get_partition_names"
        })?;
        let state = self.state.lock();
        let entry = table_entry(&state, database, table)?;

        let limit = if max_parts < 0 {
            usize::MAX
        } else {
            max_parts as usize
        };

        Ok(entry
            .partitions
            .iter()
            .filter(|(_, partition)| match partial_values {
                Some(partial) => partial
                    .iter()
                    .zip(&partition.values)
                    .all(|(want, have)| want.is_empty() || want == have),
                None => true,
            })
            .map(|(name, _)| name.clone())
            .take(limit)
            .collect())
    }

    async fn get_partitions_by_names(
        &self,
        database: &str,
        table: &str,
        names: &[String],
    ) -> Result<Vec<RawPartition>> {
        self.begin("get_partitions_by_names")?;
        let state = self.state.lock();
        let entry = table_entry(&state, database, table)?;
        Ok(names
            .iter()
            .filter_map(|name| entry.partitions.get(name).cloned())
            .collect())
    }
}
