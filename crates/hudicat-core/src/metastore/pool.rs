//! Bounded Metastore connection pool.
//!
//! A semaphore caps the number of leased connections; idle connections are
//! kept on a stack and reused. Leases are [`PooledConnection`] guards that
//! hand the connection back when dropped, or discard it if it was marked
//! broken after a transport failure.

use super::{MetastoreClient, MetastoreConnector};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Connection pool statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    /// Maximum concurrent leases
    pub max_size: usize,
    /// Connections currently leased
    pub active: usize,
    /// Connections waiting for reuse
    pub idle: usize,
    /// Connections opened over the pool's lifetime
    pub total_created: u64,
    /// Connections thrown away after a failure
    pub total_discarded: u64,
    /// Acquisitions that gave up waiting
    pub acquire_timeouts: u64,
}

/// Why a lease could not be handed out.
#[derive(Debug)]
pub enum AcquireError {
    /// No slot freed up within the acquire timeout, or the pool is closed
    Exhausted(Error),
    /// A slot was free but opening a new connection failed
    Connect(Error),
}

impl From<AcquireError> for Error {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Exhausted(e) | AcquireError::Connect(e) => e,
        }
    }
}

struct PoolInner {
    connector: Arc<dyn MetastoreConnector>,
    idle: Mutex<Vec<Arc<dyn MetastoreClient>>>,
    created: AtomicU64,
    discarded: AtomicU64,
    timeouts: AtomicU64,
}

/// Pool of Metastore connections.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    semaphore: Arc<Semaphore>,
    max_size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    /// Create a pool; connections are opened lazily.
    pub fn new(
        connector: Arc<dyn MetastoreConnector>,
        max_size: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                idle: Mutex::new(Vec::with_capacity(max_size)),
                created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                timeouts: AtomicU64::new(0),
            }),
            semaphore: Arc::new(Semaphore::new(max_size)),
            max_size,
            acquire_timeout,
        }
    }

    /// Lease a connection, waiting at most the acquire timeout for a free slot.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        Ok(self.lease().await?)
    }

    /// Like [`acquire`](Self::acquire), but tells a saturated pool apart
    /// from a Metastore that refuses connections.
    pub async fn lease(&self) -> std::result::Result<PooledConnection, AcquireError> {
        let permit = match timeout(
            self.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(AcquireError::Exhausted(Error::TransientUnavailable(
                    "connection pool is closed".into(),
                )))
            }
            Err(_) => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    endpoint = %self.inner.connector.endpoint(),
                    max_size = self.max_size,
                    timeout_ms = self.acquire_timeout.as_millis() as u64,
                    "Metastore connection pool exhausted"
                );
                return Err(AcquireError::Exhausted(Error::TransientUnavailable(format!(
                    "no Metastore connection available within {}ms",
                    self.acquire_timeout.as_millis()
                ))));
            }
        };

        let reused = self.inner.idle.lock().pop();
        let client = match reused {
            Some(client) => client,
            None => {
                // The permit is released if connect fails
                let client = self
                    .inner
                    .connector
                    .connect()
                    .await
                    .map_err(AcquireError::Connect)?;
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                debug!(endpoint = %self.inner.connector.endpoint(), "Opened Metastore connection");
                client
            }
        };

        Ok(PooledConnection {
            client,
            inner: self.inner.clone(),
            broken: false,
            _permit: permit,
        })
    }

    /// Current statistics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_size: self.max_size,
            active: self.max_size - self.semaphore.available_permits(),
            idle: self.inner.idle.lock().len(),
            total_created: self.inner.created.load(Ordering::Relaxed),
            total_discarded: self.inner.discarded.load(Ordering::Relaxed),
            acquire_timeouts: self.inner.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Drop all idle connections.
    pub fn clear_idle(&self) {
        let drained = {
            let mut idle = self.inner.idle.lock();
            std::mem::take(&mut *idle)
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "Dropped idle Metastore connections");
        }
    }

    /// Endpoint of the underlying connector.
    pub fn endpoint(&self) -> &str {
        self.inner.connector.endpoint()
    }
}

/// A leased connection.
///
/// Dereferences to the client. Dropping the guard returns the connection to
/// the pool and frees its slot.
pub struct PooledConnection {
    client: Arc<dyn MetastoreClient>,
    inner: Arc<PoolInner>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Discard this connection instead of returning it to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Shared handle to the client.
    pub fn client(&self) -> Arc<dyn MetastoreClient> {
        self.client.clone()
    }
}

impl Deref for PooledConnection {
    type Target = dyn MetastoreClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.broken {
            self.inner.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("Discarded broken Metastore connection");
        } else {
            self.inner.idle.lock().push(self.client.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metastore::InMemoryMetastore;
    use crate::ErrorKind;

    fn pool(size: usize, timeout_ms: u64) -> (InMemoryMetastore, ConnectionPool) {
        let metastore = InMemoryMetastore::new();
        let pool = ConnectionPool::new(
            Arc::new(metastore.clone()),
            size,
            Duration::from_millis(timeout_ms),
        );
        (metastore, pool)
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (_, pool) = pool(2, 100);

        {
            let conn = pool.acquire().await.unwrap();
            conn.get_all_databases().await.unwrap();
            assert_eq!(pool.stats().active, 1);
        }
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().idle, 1);

        let _conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let (_, pool) = pool(1, 20);

        let _held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientUnavailable);
        assert_eq!(pool.stats().acquire_timeouts, 1);

        assert!(matches!(pool.lease().await, Err(AcquireError::Exhausted(_))));
    }

    #[tokio::test]
    async fn test_waiter_gets_released_connection() {
        let (_, pool) = pool(1, 1_000);
        let pool = Arc::new(pool);

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().total_created, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_is_discarded() {
        let (_, pool) = pool(2, 100);

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.total_discarded, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_releases_slot() {
        let (metastore, pool) = pool(1, 50);
        metastore.fail_next_connects(1);

        let err = pool.lease().await.err().unwrap();
        assert!(matches!(err, AcquireError::Connect(ref e) if e.is_transient()));
        assert_eq!(pool.stats().active, 0);

        pool.acquire().await.unwrap();
    }
}
