//! Hudi timeline reader.
//!
//! Reads `<base>/.hoodie/hoodie.properties` and the commit timeline from
//! object storage. Two on-disk layouts are understood:
//!
//! - `.hoodie/<ts>.<action>[.<state>]` (table versions up to 6)
//! - `.hoodie/timeline/<ts>[_<completion>].<action>[.<state>]` (version 8+)
//!
//! Only completed `commit`, `deltacommit` and `replacecommit` instants carry
//! a schema. The latest one must parse; a corrupt latest instant is an error,
//! never a reason to fall back to an older schema.

use crate::error::MetadataError;
use crate::{Error, Result};
use chrono::{Duration, NaiveDateTime};
use object_store::path::Path;
use object_store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Metadata directory under a Hudi base path.
pub const METAFOLDER: &str = ".hoodie";
/// Table config file inside the metadata directory.
pub const PROPERTIES_FILE: &str = "hoodie.properties";
/// Backup written by Hudi while it rewrites the table config.
pub const PROPERTIES_BACKUP_FILE: &str = "hoodie.properties.backup";
/// Layout-2 timeline directory inside the metadata directory.
pub const TIMELINE_FOLDER: &str = "timeline";

/// Magic bytes of an Avro object container file.
const AVRO_MAGIC: &[u8] = b"Obj\x01";

/// Actions whose completed instants carry table schema.
const SCHEMA_ACTIONS: &[&str] = &["commit", "deltacommit", "replacecommit"];

/// Instant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstantState {
    Requested,
    Inflight,
    Completed,
}

/// One timeline entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instant {
    /// Request time (`yyyyMMddHHmmss[SSS]`)
    pub timestamp: String,
    pub action: String,
    pub state: InstantState,
    /// Completion time, present in the layout-2 timeline
    pub completion_time: Option<String>,
    /// Path of the instant file relative to the base path
    pub file_name: String,
}

impl Instant {
    /// Parse an instant file name; returns `None` for non-instant files.
    fn parse(file_name: &str, relative_path: String) -> Option<Self> {
        let mut parts = file_name.split('.');
        let head = parts.next()?;
        let action = parts.next();
        let state = parts.next();
        if parts.next().is_some() {
            return None;
        }

        let (timestamp, completion_time) = match head.split_once('_') {
            Some((ts, completion)) => (ts, Some(completion.to_string())),
            None => (head, None),
        };
        if timestamp.is_empty() || !timestamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if let Some(completion) = &completion_time {
            if completion.is_empty() || !completion.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
        }

        let (action, state) = match (action?, state) {
            // legacy `<ts>.inflight` means an inflight commit
            ("inflight", None) => ("commit", InstantState::Inflight),
            (action, None) => (action, InstantState::Completed),
            (action, Some("requested")) => (action, InstantState::Requested),
            (action, Some("inflight")) => (action, InstantState::Inflight),
            _ => return None,
        };

        Some(Self {
            timestamp: timestamp.to_string(),
            action: action.to_string(),
            state,
            completion_time,
            file_name: relative_path,
        })
    }

    /// Ordering key; second-precision timestamps sort as `...000`.
    fn sort_key(&self) -> String {
        format!("{:0<17}", self.timestamp)
    }

    pub fn is_completed(&self) -> bool {
        self.state == InstantState::Completed
    }

    /// Request time as a timestamp.
    pub fn requested_at(&self) -> Option<NaiveDateTime> {
        parse_instant_time(&self.timestamp)
    }

    /// Completion time as a timestamp, when the timeline records one.
    pub fn completed_at(&self) -> Option<NaiveDateTime> {
        self.completion_time.as_deref().and_then(parse_instant_time)
    }
}

/// Parse a `yyyyMMddHHmmss[SSS]` instant time.
pub fn parse_instant_time(value: &str) -> Option<NaiveDateTime> {
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (seconds, millis) = match value.len() {
        14 => (value, 0),
        17 => (&value[..14], value[14..].parse::<i64>().ok()?),
        _ => return None,
    };
    let time = NaiveDateTime::parse_from_str(seconds, "%Y%m%d%H%M%S").ok()?;
    Some(time + Duration::milliseconds(millis))
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.timestamp, self.action)?;
        match self.state {
            InstantState::Requested => write!(f, ".requested"),
            InstantState::Inflight => write!(f, ".inflight"),
            InstantState::Completed => Ok(()),
        }
    }
}

/// Parsed `hoodie.properties`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HoodieProperties {
    properties: HashMap<String, String>,
}

impl HoodieProperties {
    pub const TABLE_NAME: &'static str = "hoodie.table.name";
    pub const TABLE_TYPE: &'static str = "hoodie.table.type";
    pub const RECORD_KEY_FIELDS: &'static str = "hoodie.table.recordkey.fields";
    pub const PRECOMBINE_FIELD: &'static str = "hoodie.table.precombine.field";
    pub const PARTITION_FIELDS: &'static str = "hoodie.table.partition.fields";
    pub const BASE_FILE_FORMAT: &'static str = "hoodie.table.base.file.format";
    pub const CREATE_SCHEMA: &'static str = "hoodie.table.create.schema";
    pub const TABLE_VERSION: &'static str = "hoodie.table.version";

    /// Parse Java properties text.
    pub fn parse(text: &str) -> std::result::Result<Self, MetadataError> {
        let mut properties = HashMap::new();
        let mut lines = text.lines();

        while let Some(line) = lines.next() {
            let mut logical = line.trim_start().to_string();
            if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
                continue;
            }
            while ends_with_continuation(&logical) {
                logical.pop();
                match lines.next() {
                    Some(next) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }

            let (key, value) = split_property(&logical);
            let key = unescape_property(key)?;
            let value = unescape_property(value)?;
            properties.insert(key, value);
        }

        Ok(Self { properties })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn table_name(&self) -> Option<&str> {
        self.get(Self::TABLE_NAME)
    }

    pub fn table_type(&self) -> Option<&str> {
        self.get(Self::TABLE_TYPE)
    }

    pub fn record_key_fields(&self) -> Vec<String> {
        split_fields(self.get(Self::RECORD_KEY_FIELDS))
    }

    pub fn precombine_field(&self) -> Option<&str> {
        self.get(Self::PRECOMBINE_FIELD)
    }

    /// Partition field names; `field:TYPE` entries keep only the field.
    pub fn partition_fields(&self) -> Vec<String> {
        split_fields(self.get(Self::PARTITION_FIELDS))
            .into_iter()
            .map(|f| match f.split_once(':') {
                Some((name, _)) => name.to_string(),
                None => f,
            })
            .collect()
    }

    pub fn base_file_format(&self) -> &str {
        self.get(Self::BASE_FILE_FORMAT).unwrap_or("PARQUET")
    }

    pub fn create_schema(&self) -> Option<&str> {
        self.get(Self::CREATE_SCHEMA)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

fn split_fields(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Split at the first unescaped `=`, `:` or whitespace.
fn split_property(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (line[..i].trim_end(), line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape_property(raw: &str) -> std::result::Result<String, MetadataError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        MetadataError::InvalidProperties(format!("bad unicode escape \\u{}", hex))
                    })?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

/// Where the resolved schema came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// `extraMetadata.schema` of a completed instant
    Commit { instant: String },
    /// `hoodie.table.create.schema`
    TableCreateSchema,
}

impl SchemaSource {
    /// Request time of the source commit.
    pub fn commit_time(&self) -> Option<NaiveDateTime> {
        match self {
            SchemaSource::Commit { instant } => {
                let file_name = instant.rsplit('/').next()?;
                let head = file_name.split(['.', '_']).next()?;
                parse_instant_time(head)
            }
            SchemaSource::TableCreateSchema => None,
        }
    }
}

impl fmt::Display for SchemaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSource::Commit { instant } => write!(f, "commit {}", instant),
            SchemaSource::TableCreateSchema => write!(f, "{}", HoodieProperties::CREATE_SCHEMA),
        }
    }
}

/// Latest committed schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineSchema {
    /// Avro schema JSON
    pub avro_schema: String,
    pub source: SchemaSource,
}

/// Reader over one table's `.hoodie` directory.
pub struct TimelineReader {
    store: Arc<dyn ObjectStore>,
    base_path: Path,
    location: String,
}

impl TimelineReader {
    /// Reader for the table at `base_path` in `store`; `location` is used in
    /// errors and logs.
    pub fn new(store: Arc<dyn ObjectStore>, base_path: Path, location: impl Into<String>) -> Self {
        Self {
            store,
            base_path,
            location: location.into(),
        }
    }

    /// Table base location as given.
    pub fn location(&self) -> &str {
        &self.location
    }

    fn metafolder(&self) -> Path {
        self.base_path.child(METAFOLDER)
    }

    fn invalid(&self, source: MetadataError) -> Error {
        Error::invalid_metadata(self.location.clone(), source)
    }

    fn storage_error(&self, err: object_store::Error) -> Error {
        match err {
            object_store::Error::NotFound { .. } => {
                self.invalid(MetadataError::TimelineMissing(self.location.clone()))
            }
            other => self.invalid(other.into()),
        }
    }

    /// Read and parse `hoodie.properties`, falling back to its backup.
    pub async fn table_properties(&self) -> Result<HoodieProperties> {
        let metafolder = self.metafolder();
        let bytes = match self.store.get(&metafolder.child(PROPERTIES_FILE)).await {
            Ok(result) => result.bytes().await,
            Err(object_store::Error::NotFound { .. }) => {
                debug!(location = %self.location, "hoodie.properties missing, trying backup");
                match self.store.get(&metafolder.child(PROPERTIES_BACKUP_FILE)).await {
                    Ok(result) => result.bytes().await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
        .map_err(|e| self.storage_error(e))?;

        let text = std::str::from_utf8(&bytes).map_err(|e| {
            self.invalid(MetadataError::InvalidProperties(format!("not UTF-8: {}", e)))
        })?;
        let properties = HoodieProperties::parse(text).map_err(|e| self.invalid(e))?;
        if properties.is_empty() {
            return Err(self.invalid(MetadataError::InvalidProperties(
                "hoodie.properties is empty".into(),
            )));
        }
        Ok(properties)
    }

    async fn list_instants_in(&self, dir: &Path, relative_dir: &str) -> Result<Vec<Instant>> {
        let listing = match self.store.list_with_delimiter(Some(dir)).await {
            Ok(listing) => listing,
            Err(object_store::Error::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(self.storage_error(e)),
        };

        Ok(listing
            .objects
            .iter()
            .filter_map(|meta| {
                let file_name = meta.location.filename()?;
                Instant::parse(file_name, format!("{}/{}", relative_dir, file_name))
            })
            .collect())
    }

    /// All instants in both layouts, ordered by request time.
    pub async fn instants(&self) -> Result<Vec<Instant>> {
        let metafolder = self.metafolder();
        let mut instants = self.list_instants_in(&metafolder, METAFOLDER).await?;
        let timeline_dir = metafolder.child(TIMELINE_FOLDER);
        let relative = format!("{}/{}", METAFOLDER, TIMELINE_FOLDER);
        instants.extend(self.list_instants_in(&timeline_dir, &relative).await?);

        instants.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(instants)
    }

    /// Completed schema-bearing instants, oldest first.
    pub async fn completed_instants(&self) -> Result<Vec<Instant>> {
        Ok(self
            .instants()
            .await?
            .into_iter()
            .filter(|i| i.is_completed() && SCHEMA_ACTIONS.contains(&i.action.as_str()))
            .collect())
    }

    /// Read and parse a completed instant's commit metadata.
    ///
    /// Returns `None` for Avro-encoded metadata, which the layout-2 timeline
    /// writes and this reader does not decode.
    pub async fn read_commit_metadata(&self, instant: &Instant) -> Result<Option<serde_json::Value>> {
        let path = instant
            .file_name
            .split('/')
            .fold(self.base_path.clone(), |path, part| path.child(part));
        let bytes = self
            .store
            .get(&path)
            .await
            .map_err(|e| self.storage_error(e))?
            .bytes()
            .await
            .map_err(|e| self.storage_error(e))?;

        let corrupt = |message: String| {
            self.invalid(MetadataError::CorruptInstant {
                instant: instant.file_name.clone(),
                message,
            })
        };

        if bytes.is_empty() {
            return Err(corrupt("empty instant file".into()));
        }
        if bytes.starts_with(AVRO_MAGIC) {
            return Ok(None);
        }
        let value: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if !value.is_object() {
            return Err(corrupt("commit metadata is not a JSON object".into()));
        }
        Ok(Some(value))
    }

    /// The latest committed schema.
    pub async fn latest_schema(&self) -> Result<TimelineSchema> {
        let properties = self.table_properties().await?;
        self.latest_schema_with(&properties).await
    }

    /// The latest committed schema, with already-loaded table properties.
    pub async fn latest_schema_with(&self, properties: &HoodieProperties) -> Result<TimelineSchema> {
        let instants = self.completed_instants().await?;

        for instant in instants.iter().rev() {
            let Some(metadata) = self.read_commit_metadata(instant).await? else {
                debug!(
                    location = %self.location,
                    instant = %instant.file_name,
                    "Commit metadata is Avro-encoded, looking further back"
                );
                continue;
            };
            let schema = metadata
                .get("extraMetadata")
                .and_then(|m| m.get("schema"))
                .and_then(|s| s.as_str())
                .filter(|s| !s.trim().is_empty());

            match schema {
                Some(schema) => {
                    debug!(
                        location = %self.location,
                        instant = %instant.file_name,
                        "Resolved schema from commit"
                    );
                    return Ok(TimelineSchema {
                        avro_schema: schema.to_string(),
                        source: SchemaSource::Commit {
                            instant: instant.file_name.clone(),
                        },
                    });
                }
                None => {
                    debug!(
                        location = %self.location,
                        instant = %instant.file_name,
                        "Commit carries no schema, looking further back"
                    );
                }
            }
        }

        match properties.create_schema() {
            Some(schema) => {
                if !instants.is_empty() {
                    warn!(
                        location = %self.location,
                        "No commit carries a schema, using table create schema"
                    );
                }
                Ok(TimelineSchema {
                    avro_schema: schema.to_string(),
                    source: SchemaSource::TableCreateSchema,
                })
            }
            None => Err(self.invalid(MetadataError::NoSchema)),
        }
    }
}

/// Resolves table locations to object stores.
///
/// Stores are built from the location URL with the configured options and
/// shared per `scheme://authority`.
pub struct StorageRegistry {
    options: HashMap<String, String>,
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
}

impl StorageRegistry {
    pub fn new(options: HashMap<String, String>) -> Self {
        Self {
            options,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Serve every location under `prefix` (`scheme://authority`) from `store`.
    pub fn register(&self, prefix: &str, store: Arc<dyn ObjectStore>) -> Result<()> {
        let url = parse_location(prefix)?;
        self.stores.write().insert(store_key(&url), store);
        Ok(())
    }

    /// Store and in-store path for a table location.
    pub fn resolve(&self, location: &str) -> Result<(Arc<dyn ObjectStore>, Path)> {
        let url = parse_location(location)?;
        let key = store_key(&url);
        let path = Path::from_url_path(url.path()).map_err(|e| {
            Error::invalid_metadata(location, MetadataError::Storage(e.to_string()))
        })?;

        if let Some(store) = self.stores.read().get(&key) {
            return Ok((store.clone(), path));
        }

        let (store, _) = object_store::parse_url_opts(&url, self.options.iter())
            .map_err(|e| Error::invalid_metadata(location, e.into()))?;
        let store: Arc<dyn ObjectStore> = Arc::from(store);
        debug!(store = %key, "Created object store");

        let store = self.stores.write().entry(key).or_insert(store).clone();
        Ok((store, path))
    }

    /// Timeline reader for the table at `location`.
    pub fn timeline(&self, location: &str) -> Result<TimelineReader> {
        let (store, path) = self.resolve(location)?;
        Ok(TimelineReader::new(store, path, location))
    }
}

fn store_key(url: &Url) -> String {
    format!("{}://{}", url.scheme(), url.authority())
}

/// Parse a table location; bare paths are treated as local files.
fn parse_location(location: &str) -> Result<Url> {
    let invalid = |message: String| {
        Error::invalid_metadata(location, MetadataError::Storage(message))
    };

    match Url::parse(location) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = std::path::Path::new(location);
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()?.join(path)
            };
            Url::from_file_path(&absolute)
                .map_err(|_| invalid(format!("not a valid file path: {}", absolute.display())))
        }
        Err(e) => Err(invalid(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    const BASE: &str = "sales/orders";

    const PROPERTIES: &str = r#"#Updated at 2024-01-02T00:00:00Z
hoodie.table.name=orders
hoodie.table.type=MERGE_ON_READ
hoodie.table.recordkey.fields=order_id
hoodie.table.precombine.field=updated_at
hoodie.table.partition.fields=dt
hoodie.table.base.file.format=PARQUET
hoodie.table.version=6
"#;

    fn schema_json(fields: &[(&str, &str)]) -> String {
        let fields: Vec<serde_json::Value> = fields
            .iter()
            .map(|(n, t)| serde_json::json!({"name": n, "type": t}))
            .collect();
        serde_json::json!({"type": "record", "name": "orders_record", "fields": fields}).to_string()
    }

    fn commit_with_schema(schema: &str) -> String {
        serde_json::json!({
            "partitionToWriteStats": {},
            "compacted": false,
            "extraMetadata": {"schema": schema},
            "operationType": "UPSERT"
        })
        .to_string()
    }

    async fn put(store: &InMemory, relative: &str, content: &str) {
        let path = Path::from(format!("{}/{}", BASE, relative));
        store
            .put(&path, PutPayload::from(content.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    async fn put_bytes(store: &InMemory, relative: &str, content: &[u8]) {
        let path = Path::from(format!("{}/{}", BASE, relative));
        store.put(&path, PutPayload::from(content.to_vec())).await.unwrap();
    }

    /// Start of an Avro container file as written by the layout-2 timeline.
    const AVRO_COMMIT: &[u8] = b"Obj\x01\x04\x16avro.schema\xc8\x01{\"type\":\"record\"}\x00\xff\xfe";

    fn reader(store: Arc<InMemory>) -> TimelineReader {
        TimelineReader::new(store, Path::from(BASE), "s3://lake/sales/orders")
    }

    #[test]
    fn test_parse_instant_file_names() {
        let completed = Instant::parse("20240101000000000.commit", "x".into()).unwrap();
        assert_eq!(completed.state, InstantState::Completed);
        assert_eq!(completed.action, "commit");

        let inflight = Instant::parse("20240101000000000.deltacommit.inflight", "x".into()).unwrap();
        assert_eq!(inflight.state, InstantState::Inflight);

        let v2 = Instant::parse("20240101000000000_20240101000005000.deltacommit", "x".into())
            .unwrap();
        assert_eq!(v2.completion_time.as_deref(), Some("20240101000005000"));
        assert!(v2.is_completed());

        let legacy = Instant::parse("20240101000000.inflight", "x".into()).unwrap();
        assert_eq!(legacy.action, "commit");
        assert_eq!(legacy.state, InstantState::Inflight);

        assert!(Instant::parse("hoodie.properties", "x".into()).is_none());
        assert!(Instant::parse("archived", "x".into()).is_none());
        assert!(Instant::parse("20240101.commit.bogus", "x".into()).is_none());
    }

    #[test]
    fn test_parse_properties_with_escapes() {
        let text = "hoodie.table.create.schema={\"type\"\\:\"record\",\"name\"\\:\"r\",\"fields\"\\:[]}\n\
                    hoodie.table.recordkey.fields = id, region \n\
                    hoodie.table.partition.fields=dt\\:SIMPLE,\\\n    region\n\
                    ! a comment\n";
        let props = HoodieProperties::parse(text).unwrap();
        assert_eq!(
            props.create_schema(),
            Some("{\"type\":\"record\",\"name\":\"r\",\"fields\":[]}")
        );
        assert_eq!(props.record_key_fields(), vec!["id", "region"]);
        assert_eq!(props.partition_fields(), vec!["dt", "region"]);
        assert_eq!(props.base_file_format(), "PARQUET");
    }

    #[tokio::test]
    async fn test_latest_schema_from_latest_commit() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;
        put(
            &store,
            ".hoodie/20240101000000000.deltacommit",
            &commit_with_schema(&schema_json(&[("order_id", "long")])),
        )
        .await;
        put(
            &store,
            ".hoodie/20240102000000000.deltacommit",
            &commit_with_schema(&schema_json(&[("order_id", "long"), ("amount", "double")])),
        )
        .await;
        put(&store, ".hoodie/20240103000000000.deltacommit.inflight", "").await;

        let reader = reader(store);
        let props = reader.table_properties().await.unwrap();
        assert_eq!(props.table_type(), Some("MERGE_ON_READ"));

        let schema = reader.latest_schema().await.unwrap();
        assert!(schema.avro_schema.contains("amount"));
        assert_eq!(
            schema.source,
            SchemaSource::Commit {
                instant: ".hoodie/20240102000000000.deltacommit".into()
            }
        );
    }

    #[tokio::test]
    async fn test_layout_two_timeline() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;
        put(
            &store,
            ".hoodie/timeline/20240105000000000_20240105000010000.commit",
            &commit_with_schema(&schema_json(&[("id", "int")])),
        )
        .await;
        put(&store, ".hoodie/timeline/20240106000000000.commit.requested", "").await;

        let reader = reader(store);
        let instants = reader.completed_instants().await.unwrap();
        assert_eq!(instants.len(), 1);
        assert_eq!(
            instants[0].file_name,
            ".hoodie/timeline/20240105000000000_20240105000010000.commit"
        );
        assert_eq!(
            instants[0].completed_at(),
            parse_instant_time("20240105000010000")
        );

        let schema = reader.latest_schema().await.unwrap();
        let committed = schema.source.commit_time().unwrap();
        assert_eq!(committed.to_string(), "2024-01-05 00:00:00");
    }

    #[test]
    fn test_parse_instant_time() {
        let millis = parse_instant_time("20240102030405678").unwrap();
        assert_eq!(millis.to_string(), "2024-01-02 03:04:05.678");
        let seconds = parse_instant_time("20240102030405").unwrap();
        assert_eq!(seconds.to_string(), "2024-01-02 03:04:05");

        assert!(parse_instant_time("2024010203").is_none());
        assert!(parse_instant_time("20241302030405000").is_none());
        assert!(parse_instant_time("2024010203040x000").is_none());
        assert_eq!(SchemaSource::TableCreateSchema.commit_time(), None);
    }

    #[tokio::test]
    async fn test_corrupt_latest_commit_fails() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;
        put(
            &store,
            ".hoodie/20240101000000000.commit",
            &commit_with_schema(&schema_json(&[("id", "int")])),
        )
        .await;
        put(&store, ".hoodie/20240102000000000.commit", "{\"partitionToWrite").await;

        let err = reader(store).latest_schema().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert!(err.to_string().contains("s3://lake/sales/orders"));
        let source = std::error::Error::source(&err).unwrap().to_string();
        assert!(source.contains("20240102000000000.commit"));
    }

    #[tokio::test]
    async fn test_schemaless_commits_are_skipped() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;
        put(
            &store,
            ".hoodie/20240101000000000.commit",
            &commit_with_schema(&schema_json(&[("id", "int")])),
        )
        .await;
        put(
            &store,
            ".hoodie/20240102000000000.replacecommit",
            r#"{"partitionToReplaceFileIds": {}, "extraMetadata": {}}"#,
        )
        .await;
        // clean instants never carry a schema and are ignored
        put(&store, ".hoodie/20240103000000000.clean", "not json").await;

        let schema = reader(store).latest_schema().await.unwrap();
        assert_eq!(
            schema.source,
            SchemaSource::Commit {
                instant: ".hoodie/20240101000000000.commit".into()
            }
        );
    }

    #[tokio::test]
    async fn test_avro_commit_metadata_is_skipped() {
        let store = Arc::new(InMemory::new());
        let props = format!(
            "{}hoodie.table.create.schema={}\n",
            PROPERTIES,
            schema_json(&[("id", "int")]).replace(':', "\\:")
        );
        put(&store, ".hoodie/hoodie.properties", &props).await;
        put(
            &store,
            ".hoodie/20240101000000000.commit",
            &commit_with_schema(&schema_json(&[("id", "int"), ("name", "string")])),
        )
        .await;
        put_bytes(
            &store,
            ".hoodie/timeline/20240105000000000_20240105000010000.commit",
            AVRO_COMMIT,
        )
        .await;

        let reader = reader(store.clone());
        let instants = reader.completed_instants().await.unwrap();
        assert_eq!(reader.read_commit_metadata(&instants[1]).await.unwrap(), None);

        let schema = reader.latest_schema().await.unwrap();
        assert_eq!(
            schema.source,
            SchemaSource::Commit {
                instant: ".hoodie/20240101000000000.commit".into()
            }
        );

        // only Avro commits left: fall back to the create schema
        store
            .delete(&Path::from(format!("{}/.hoodie/20240101000000000.commit", BASE)))
            .await
            .unwrap();
        let schema = reader.latest_schema().await.unwrap();
        assert_eq!(schema.source, SchemaSource::TableCreateSchema);
    }

    #[tokio::test]
    async fn test_create_schema_fallback() {
        let store = Arc::new(InMemory::new());
        let props = format!(
            "{}hoodie.table.create.schema={}\n",
            PROPERTIES,
            schema_json(&[("id", "int")]).replace(':', "\\:")
        );
        put(&store, ".hoodie/hoodie.properties", &props).await;

        let schema = reader(store).latest_schema().await.unwrap();
        assert_eq!(schema.source, SchemaSource::TableCreateSchema);
        assert!(schema.avro_schema.contains("\"type\":\"record\""));
    }

    #[tokio::test]
    async fn test_no_schema_anywhere() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;

        let err = reader(store).latest_schema().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert!(matches!(
            std::error::Error::source(&err)
                .and_then(|s| s.downcast_ref::<MetadataError>()),
            Some(MetadataError::NoSchema)
        ));
    }

    #[tokio::test]
    async fn test_missing_timeline() {
        let store = Arc::new(InMemory::new());

        let err = reader(store).table_properties().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
        assert!(matches!(
            std::error::Error::source(&err)
                .and_then(|s| s.downcast_ref::<MetadataError>()),
            Some(MetadataError::TimelineMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_properties_backup_is_used() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties.backup", PROPERTIES).await;

        let props = reader(store).table_properties().await.unwrap();
        assert_eq!(props.table_name(), Some("orders"));
    }

    #[test]
    fn test_instant_ordering_mixes_precisions() {
        let older = Instant::parse("20240101120000.commit", "a".into()).unwrap();
        let newer = Instant::parse("20240101120000500.commit", "b".into()).unwrap();
        assert!(older.sort_key() < newer.sort_key());
    }

    #[tokio::test]
    async fn test_storage_registry_uses_registered_store() {
        let store = Arc::new(InMemory::new());
        put(&store, ".hoodie/hoodie.properties", PROPERTIES).await;

        let registry = StorageRegistry::new(HashMap::new());
        registry.register("s3://lake", store).unwrap();

        let reader = registry.timeline("s3://lake/sales/orders").unwrap();
        assert_eq!(reader.location(), "s3://lake/sales/orders");
        assert!(reader.table_properties().await.is_ok());
    }

    #[tokio::test]
    async fn test_storage_registry_local_paths() {
        let dir = tempfile::tempdir().unwrap();
        let hoodie = dir.path().join("orders").join(".hoodie");
        std::fs::create_dir_all(&hoodie).unwrap();
        std::fs::write(hoodie.join("hoodie.properties"), PROPERTIES).unwrap();

        let registry = StorageRegistry::new(HashMap::new());
        let location = dir.path().join("orders");
        let reader = registry.timeline(location.to_str().unwrap()).unwrap();
        let props = reader.table_properties().await.unwrap();
        assert_eq!(props.precombine_field(), Some("updated_at"));
    }
}
