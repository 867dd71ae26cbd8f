//! TTL cache of resolved tables.
//!
//! The Metastore and the Hudi timeline change underneath us, so entries are
//! bounded by a TTL and dropped by the catalog on every create and drop.

use crate::config::CacheConfig;
use crate::resolver::CatalogTable;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// A cached value with expiration tracking.
#[derive(Debug, Clone)]
struct CachedValue<T> {
    value: T,
    cached_at: Instant,
    ttl: Duration,
}

impl<T> CachedValue<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// Resolved tables keyed by lowercase `schema.table`.
pub struct TableCache {
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<(String, String), CachedValue<CatalogTable>>>,
    stats: CacheStats,
}

impl TableCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Build from configuration; `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(
                Duration::from_secs(config.table_ttl_seconds),
                config.max_entries,
            )
        })
    }

    fn key(schema: &str, table: &str) -> (String, String) {
        (schema.to_lowercase(), table.to_lowercase())
    }

    /// Get a resolved table if cached and not expired.
    pub fn get(&self, schema: &str, table: &str) -> Option<CatalogTable> {
        let key = Self::key(schema, table);
        {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(cached) if !cached.is_expired() => {
                    self.stats.record_hit();
                    return Some(cached.value.clone());
                }
                Some(_) => {}
                None => {
                    self.stats.record_miss();
                    return None;
                }
            }
        }

        // Expired: drop it so the map does not grow with stale entries.
        self.entries.write().remove(&key);
        self.stats.record_miss();
        None
    }

    pub fn insert(&self, table: CatalogTable) {
        let key = Self::key(&table.schema, &table.name);
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, v| !v.is_expired());
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    self.stats.record_eviction();
                }
            }
        }

        entries.insert(key, CachedValue::new(table, self.ttl));
    }

    pub fn invalidate(&self, schema: &str, table: &str) {
        if self.entries.write().remove(&Self::key(schema, table)).is_some() {
            debug!(schema = %schema, table = %table, "Invalidated cached table");
        }
        self.stats.record_invalidation(1);
    }

    /// Drop every table of a schema.
    pub fn invalidate_schema(&self, schema: &str) {
        let schema = schema.to_lowercase();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(s, _), _| *s != schema);
        let removed = before - entries.len();
        debug!(schema = %schema, removed, "Invalidated cached schema");
        self.stats.record_invalidation(removed.max(1) as u64);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        self.stats.record_invalidation(removed.max(1) as u64);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TableTypeTag;

    fn table(schema: &str, name: &str) -> CatalogTable {
        CatalogTable {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: Vec::new(),
            partition_keys: Vec::new(),
            location: None,
            table_type: TableTypeTag::External,
            comment: None,
            properties: HashMap::new(),
            hudi: None,
        }
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = TableCache::new(Duration::from_secs(60), 10);
        assert!(cache.get("sales", "orders").is_none());

        cache.insert(table("sales", "orders"));
        assert_eq!(cache.get("SALES", "Orders").unwrap().name, "orders");

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.hits, 1);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_expiration() {
        let cache = TableCache::new(Duration::from_millis(10), 10);
        cache.insert(table("sales", "orders"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("sales", "orders").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidation_hooks() {
        let cache = TableCache::new(Duration::from_secs(60), 10);
        cache.insert(table("sales", "orders"));
        cache.insert(table("sales", "customers"));
        cache.insert(table("hr", "people"));

        cache.invalidate("sales", "orders");
        assert!(cache.get("sales", "orders").is_none());
        assert_eq!(cache.len(), 2);

        cache.invalidate_schema("sales");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("hr", "people").is_some());

        cache.invalidate_all();
        assert!(cache.is_empty());
        assert!(cache.snapshot().invalidations >= 3);
    }

    #[test]
    fn test_max_entries_evicts_oldest() {
        let cache = TableCache::new(Duration::from_secs(60), 2);
        cache.insert(table("s", "a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(table("s", "b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(table("s", "c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("s", "a").is_none());
        assert!(cache.get("s", "c").is_some());
        assert_eq!(cache.snapshot().evictions, 1);
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(TableCache::from_config(&CacheConfig::default()).is_none());
        let config = CacheConfig {
            enabled: true,
            ..Default::default()
        };
        assert!(TableCache::from_config(&config).is_some());
    }
}
