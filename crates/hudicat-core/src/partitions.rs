//! Partition enumeration.
//!
//! Partitions are listed lazily as a stream. Equality constraints are pushed
//! down to the Metastore as partial partition values; everything else is
//! evaluated here against the partition names. Matching partitions are then
//! fetched in batches, one pooled connection per batch, so a consumer that
//! stops early leaves nothing leased.

use crate::error::{MetadataError, Result};
use crate::metastore::{make_partition_name, MetastoreAdapter, RawColumn, RawPartition};
use crate::resolver::CatalogTable;
use crate::Error;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Value Hive stores for a NULL partition value.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Predicate over partition columns.
#[derive(Debug, Clone, PartialEq)]
pub enum PartitionPredicate {
    /// Exact match on the stored value
    Eq { column: String, value: String },
    /// Ordered comparison; numeric when both sides are numbers
    Range {
        column: String,
        lower: Bound<String>,
        upper: Bound<String>,
    },
    /// Exact match on any of the values
    In { column: String, values: Vec<String> },
    /// All predicates hold
    And(Vec<PartitionPredicate>),
}

impl PartitionPredicate {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        PartitionPredicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn range(column: impl Into<String>, lower: Bound<String>, upper: Bound<String>) -> Self {
        PartitionPredicate::Range {
            column: column.into(),
            lower,
            upper,
        }
    }

    pub fn in_list(column: impl Into<String>, values: Vec<String>) -> Self {
        PartitionPredicate::In {
            column: column.into(),
            values,
        }
    }

    /// Conjunction; a single predicate is returned as is.
    pub fn and(mut predicates: Vec<PartitionPredicate>) -> Self {
        if predicates.len() == 1 {
            predicates.remove(0)
        } else {
            PartitionPredicate::And(predicates)
        }
    }

    fn columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            PartitionPredicate::Eq { column, .. }
            | PartitionPredicate::Range { column, .. }
            | PartitionPredicate::In { column, .. } => out.push(column),
            PartitionPredicate::And(predicates) => {
                for p in predicates {
                    p.columns(out);
                }
            }
        }
    }

    /// Reject predicates on columns that are not partition keys.
    pub fn validate(&self, partition_keys: &[String]) -> Result<()> {
        let mut columns = Vec::new();
        self.columns(&mut columns);
        for column in columns {
            if !partition_keys.iter().any(|k| k.eq_ignore_ascii_case(column)) {
                return Err(Error::InvalidArgument(format!(
                    "'{}' is not a partition column (partition columns: {})",
                    column,
                    partition_keys.join(", ")
                )));
            }
        }
        Ok(())
    }

    /// Partial values for `get_partition_names_ps`, or `None` when no
    /// equality constraint applies.
    pub fn pushdown_values(&self, partition_keys: &[String]) -> Option<Vec<String>> {
        let mut equalities: HashMap<String, &str> = HashMap::new();
        self.collect_equalities(&mut equalities);

        let mut values: Vec<String> = partition_keys
            .iter()
            .map(|k| {
                equalities
                    .get(&k.to_lowercase())
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        while values.last().is_some_and(String::is_empty) {
            values.pop();
        }
        (!values.is_empty()).then_some(values)
    }

    fn collect_equalities<'a>(&'a self, out: &mut HashMap<String, &'a str>) {
        match self {
            PartitionPredicate::Eq { column, value } if !value.is_empty() => {
                out.entry(column.to_lowercase()).or_insert(value);
            }
            PartitionPredicate::And(predicates) => {
                for p in predicates {
                    p.collect_equalities(out);
                }
            }
            _ => {}
        }
    }

    /// Evaluate against lowercase column name to value.
    pub fn matches(&self, values: &HashMap<String, String>) -> bool {
        let value_of = |column: &str| {
            values
                .get(&column.to_lowercase())
                .filter(|v| v.as_str() != HIVE_DEFAULT_PARTITION)
        };

        match self {
            PartitionPredicate::Eq { column, value } => value_of(column) == Some(value),
            PartitionPredicate::In { column, values } => {
                value_of(column).is_some_and(|v| values.contains(v))
            }
            PartitionPredicate::Range {
                column,
                lower,
                upper,
            } => value_of(column).is_some_and(|v| {
                let above = match lower {
                    Bound::Included(b) => compare_values(v, b) != Ordering::Less,
                    Bound::Excluded(b) => compare_values(v, b) == Ordering::Greater,
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(b) => compare_values(v, b) != Ordering::Greater,
                    Bound::Excluded(b) => compare_values(v, b) == Ordering::Less,
                    Bound::Unbounded => true,
                };
                above && below
            }),
            PartitionPredicate::And(predicates) => predicates.iter().all(|p| p.matches(values)),
        }
    }
}

/// Numeric comparison when both sides parse as numbers, lexical otherwise.
fn compare_values(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (a.parse::<i64>(), b.parse::<i64>()) {
        return x.cmp(&y);
    }
    if let (Ok(x), Ok(y)) = (a.parse::<f64>(), b.parse::<f64>()) {
        if let Some(ordering) = x.partial_cmp(&y) {
            return ordering;
        }
    }
    a.cmp(b)
}

impl fmt::Display for PartitionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionPredicate::Eq { column, value } => write!(f, "{} = '{}'", column, value),
            PartitionPredicate::In { column, values } => {
                write!(f, "{} IN ({})", column, values.join(", "))
            }
            PartitionPredicate::Range {
                column,
                lower,
                upper,
            } => {
                let mut parts = Vec::new();
                match lower {
                    Bound::Included(v) => parts.push(format!("{} >= '{}'", column, v)),
                    Bound::Excluded(v) => parts.push(format!("{} > '{}'", column, v)),
                    Bound::Unbounded => {}
                }
                match upper {
                    Bound::Included(v) => parts.push(format!("{} <= '{}'", column, v)),
                    Bound::Excluded(v) => parts.push(format!("{} < '{}'", column, v)),
                    Bound::Unbounded => {}
                }
                if parts.is_empty() {
                    write!(f, "{} IS ANY", column)
                } else {
                    write!(f, "{}", parts.join(" AND "))
                }
            }
            PartitionPredicate::And(predicates) => {
                let parts: Vec<String> = predicates.iter().map(|p| p.to_string()).collect();
                write!(f, "{}", parts.join(" AND "))
            }
        }
    }
}

impl FromStr for PartitionPredicate {
    type Err = Error;

    /// Parses `col=v`, `col>v`, `col>=v`, `col<v`, `col<=v` and
    /// `col in (a,b)`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::InvalidArgument(format!("cannot parse partition filter '{}'", s));

        // ASCII lowercasing keeps byte offsets valid for slicing `s`
        if let Some(idx) = s.to_ascii_lowercase().find(" in ") {
            let column = s[..idx].trim();
            let list = s[idx + 4..].trim();
            let list = list
                .strip_prefix('(')
                .and_then(|l| l.strip_suffix(')'))
                .ok_or_else(invalid)?;
            let values = list.split(',').map(|v| unquote(v.trim())).collect();
            if column.is_empty() {
                return Err(invalid());
            }
            return Ok(PartitionPredicate::in_list(column, values));
        }

        for op in [">=", "<=", ">", "<", "="] {
            if let Some(idx) = s.find(op) {
                let column = s[..idx].trim();
                let value = unquote(s[idx + op.len()..].trim());
                if column.is_empty() {
                    return Err(invalid());
                }
                return Ok(match op {
                    "=" => PartitionPredicate::eq(column, value),
                    ">=" => PartitionPredicate::range(column, Bound::Included(value), Bound::Unbounded),
                    ">" => PartitionPredicate::range(column, Bound::Excluded(value), Bound::Unbounded),
                    "<=" => PartitionPredicate::range(column, Bound::Unbounded, Bound::Included(value)),
                    _ => PartitionPredicate::range(column, Bound::Unbounded, Bound::Excluded(value)),
                });
            }
        }
        Err(invalid())
    }
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
        .to_string()
}

/// One partition of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSpec {
    /// Partition column name and value, in partition-key order
    pub values: Vec<(String, String)>,
    pub location: Option<String>,
    pub parameters: HashMap<String, String>,
}

impl PartitionSpec {
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(column))
            .map(|(_, v)| v.as_str())
    }

    /// Hive partition name (`k1=v1/k2=v2`).
    pub fn name(&self) -> String {
        let (keys, values): (Vec<RawColumn>, Vec<String>) = self
            .values
            .iter()
            .map(|(k, v)| (RawColumn::new(k.clone(), "string"), v.clone()))
            .unzip();
        make_partition_name(&keys, &values)
    }

    pub(crate) fn from_raw(partition_keys: &[String], raw: RawPartition) -> Self {
        Self {
            values: partition_keys.iter().cloned().zip(raw.values).collect(),
            location: raw.location,
            parameters: raw.parameters,
        }
    }
}

/// Undo Hive path escaping (`%XX`).
pub fn unescape_path_name(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split `k1=v1/k2=v2` into unescaped lowercase keys and values.
pub fn parse_partition_name(name: &str) -> Option<Vec<(String, String)>> {
    name.split('/')
        .map(|part| {
            part.split_once('=').map(|(k, v)| {
                (unescape_path_name(k).to_lowercase(), unescape_path_name(v))
            })
        })
        .collect()
}

/// Lists partitions of resolved tables.
pub struct PartitionEnumerator {
    adapter: Arc<MetastoreAdapter>,
}

impl PartitionEnumerator {
    pub fn new(adapter: Arc<MetastoreAdapter>) -> Self {
        Self { adapter }
    }

    /// Names of the partitions matching the predicate.
    pub async fn partition_names(
        &self,
        table: &CatalogTable,
        predicate: Option<&PartitionPredicate>,
    ) -> Result<Vec<String>> {
        matching_names(&self.adapter, table, predicate).await
    }

    /// Lazily stream the partitions matching the predicate.
    ///
    /// Each call starts from scratch; dropping the stream stops the work.
    pub fn enumerate(
        &self,
        table: &CatalogTable,
        predicate: Option<PartitionPredicate>,
    ) -> Result<BoxStream<'static, Result<PartitionSpec>>> {
        if let Some(p) = &predicate {
            p.validate(&table.partition_keys)?;
        }

        if table.partition_keys.is_empty() {
            return Ok(stream::empty().boxed());
        }

        let state = EnumerationState {
            adapter: self.adapter.clone(),
            table: table.clone(),
            predicate,
            names: None,
            offset: 0,
            batch_size: self.adapter.partition_batch_size().max(1),
            done: false,
        };

        Ok(stream::unfold(state, next_batch)
            .map_ok(|batch| stream::iter(batch.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }
}

async fn matching_names(
    adapter: &MetastoreAdapter,
    table: &CatalogTable,
    predicate: Option<&PartitionPredicate>,
) -> Result<Vec<String>> {
    if let Some(p) = predicate {
        p.validate(&table.partition_keys)?;
    }
    if table.partition_keys.is_empty() {
        return Ok(Vec::new());
    }

    let pushdown = predicate.and_then(|p| p.pushdown_values(&table.partition_keys));
    let names = adapter
        .list_partition_names(&table.schema, &table.name, pushdown.as_deref())
        .await?;
    debug!(
        table = %table.qualified_name(),
        pushdown = ?pushdown,
        candidates = names.len(),
        "Listed partition names"
    );

    let Some(predicate) = predicate else {
        return Ok(names);
    };

    let mut matching = Vec::with_capacity(names.len());
    for name in names {
        let values = parse_partition_name(&name).ok_or_else(|| {
            Error::invalid_metadata(
                table.qualified_name(),
                MetadataError::Unrepresentable(format!("malformed partition name '{}'", name)),
            )
        })?;
        let values: HashMap<String, String> = values.into_iter().collect();
        if predicate.matches(&values) {
            matching.push(name);
        }
    }
    Ok(matching)
}

struct EnumerationState {
    adapter: Arc<MetastoreAdapter>,
    table: CatalogTable,
    predicate: Option<PartitionPredicate>,
    names: Option<Vec<String>>,
    offset: usize,
    batch_size: usize,
    done: bool,
}

async fn next_batch(
    mut state: EnumerationState,
) -> Option<(Result<Vec<PartitionSpec>>, EnumerationState)> {
    if state.done {
        return None;
    }

    if state.names.is_none() {
        match matching_names(&state.adapter, &state.table, state.predicate.as_ref()).await {
            Ok(names) => state.names = Some(names),
            Err(e) => {
                state.done = true;
                return Some((Err(e), state));
            }
        }
    }

    let names = state.names.as_deref().unwrap_or_default();
    if state.offset >= names.len() {
        return None;
    }
    let end = (state.offset + state.batch_size).min(names.len());
    let batch = &names[state.offset..end];

    let result = state
        .adapter
        .get_partitions_by_names(&state.table.schema, &state.table.name, batch)
        .await;
    state.offset = end;

    match result {
        Ok(partitions) => {
            let specs = partitions
                .into_iter()
                .map(|p| PartitionSpec::from_raw(&state.table.partition_keys, p))
                .collect();
            Some((Ok(specs), state))
        }
        Err(e) => {
            state.done = true;
            Some((Err(e), state))
        }
    }
}
