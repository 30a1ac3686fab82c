//! Resilient cache client.
//!
//! [`CacheClient`] owns a pool of connections to a Redis-compatible cache
//! and exposes a single operation, [`CacheClient::with_connection`], that
//! runs a unit of work against a connection known to be alive a moment
//! earlier.
//!
//! # Health checking
//!
//! Every unit of work is preceded by a `PING` on the very connection the
//! work will run on. If the `PING` fails, the whole pool is rebuilt from the
//! connector configuration before the work runs. This costs one extra round trip per call and catches
//! the very next network partition instead of waiting for a timer.
//!
//! Rebuilds are single-flight: each pool carries a generation number, and a
//! caller that saw a dead pool only rebuilds if no one else already replaced
//! that generation. Everyone else reuses the fresh pool.
//!
//! # Backends
//!
//! The wire-level operations live behind [`CacheConnection`]. Production uses
//! [`crate::dragonfly::DragonflyConnector`]; tests use
//! [`crate::memory::MemoryCache`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::error::DbError;

/// Upper bound on pooled cache connections.
pub const MAX_CACHE_CONNECTIONS: usize = 8;

/// Connection-establishment timeout used when building a pool.
pub const CACHE_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Commands the persistence layer issues against the cache.
///
/// Implementations are cheap handles (clone = another lease on the same
/// pooled connection). A lease is released when the handle is dropped.
#[async_trait]
pub trait CacheConnection: Clone + Send + Sync + 'static {
    /// `PING`; `Ok` only on a `PONG` reply.
    async fn ping(&self) -> Result<(), DbError>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, DbError>;

    /// `SET key value EX ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError>;

    /// `EXPIRE key ttl`. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DbError>;

    /// `ZADD key XX CH score member`. Returns the number of changed members,
    /// which is 0 both when the member is absent and when its score is equal.
    async fn zadd_if_exists(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError>;

    /// `ZADD key score member`. Returns the number of added members.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError>;

    /// `ZREMRANGEBYRANK key start stop` (ascending ranks, negative indices
    /// count from the end). Returns the number of removed members.
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64, DbError>;

    /// `ZREVRANGE key start stop WITHSCORES`.
    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, DbError>;
}

/// A built pool of cache connections.
#[async_trait]
pub trait CachePool: Send + Sync + 'static {
    /// Connection handle type handed to units of work.
    type Connection: CacheConnection;

    /// Lease one connection from the pool.
    fn lease(&self) -> Self::Connection;

    /// Close every connection in the pool.
    async fn close(&self);
}

/// Builds pools from configuration. Called at startup and on every rebuild.
#[async_trait]
pub trait CacheConnector: Send + Sync + 'static {
    /// Pool type produced by this connector.
    type Pool: CachePool;

    /// Open a new pool.
    async fn connect(&self) -> Result<Self::Pool, DbError>;
}

/// Connection type handed out by a [`CacheClient`] over connector `C`.
pub type ConnectionOf<C> = <<C as CacheConnector>::Pool as CachePool>::Connection;

struct PoolSlot<P> {
    pool: Arc<P>,
    generation: u64,
}

/// Pooled cache client that rebuilds its pool when the cache stops answering.
pub struct CacheClient<C: CacheConnector> {
    connector: C,
    slot: RwLock<PoolSlot<C::Pool>>,
    rebuild_lock: Mutex<()>,
}

impl<C: CacheConnector> CacheClient<C> {
    /// Build the initial pool and verify it answers a `PING`.
    ///
    /// A failure here means the cache is unreachable at startup. Every load
    /// and save path assumes the cache exists, so the owning process should
    /// treat this error as fatal rather than run degraded.
    ///
    /// # Errors
    ///
    /// Returns the connector's error if the pool cannot be built or the
    /// first `PING` fails.
    pub async fn connect(connector: C) -> Result<Self, DbError> {
        let pool = open_pool(&connector).await.inspect_err(|e| {
            tracing::error!(error = %e, "Cache connect failed");
        })?;

        tracing::info!("Cache pool ready");
        Ok(Self {
            connector,
            slot: RwLock::new(PoolSlot {
                pool: Arc::new(pool),
                generation: 0,
            }),
            rebuild_lock: Mutex::new(()),
        })
    }

    /// Run `work` against a healthy connection and return its result.
    ///
    /// One connection is leased and pinged, and that same connection is
    /// moved into `work`. If the ping fails the pool is rebuilt and a
    /// connection from the fresh pool is used instead. The lease is released
    /// when the returned future completes or is dropped, whichever path it
    /// takes.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is dead and cannot be rebuilt, or
    /// whatever error `work` returns.
    pub async fn with_connection<F, Fut, T>(&self, work: F) -> Result<T, DbError>
    where
        F: FnOnce(ConnectionOf<C>) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let connection = self.healthy_connection().await?;
        work(connection).await
    }

    /// Number of times the pool has been replaced since [`CacheClient::connect`].
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Close the current pool.
    pub async fn close(&self) {
        let pool = Arc::clone(&self.slot.read().await.pool);
        pool.close().await;
        tracing::info!("Cache pool closed");
    }

    async fn healthy_connection(&self) -> Result<ConnectionOf<C>, DbError> {
        let (pool, generation) = {
            let slot = self.slot.read().await;
            (Arc::clone(&slot.pool), slot.generation)
        };

        let connection = pool.lease();
        match connection.ping().await {
            Ok(()) => Ok(connection),
            Err(e) => {
                drop(connection);
                tracing::warn!(error = %e, generation, "Cache unhealthy, rebuilding pool");
                let fresh = self.rebuild(generation).await?;
                let connection = fresh.lease();
                connection.ping().await?;
                Ok(connection)
            }
        }
    }

    /// Replace the pool of generation `observed`, unless someone already did.
    async fn rebuild(&self, observed: u64) -> Result<Arc<C::Pool>, DbError> {
        let _guard = self.rebuild_lock.lock().await;

        {
            let slot = self.slot.read().await;
            if slot.generation != observed {
                return Ok(Arc::clone(&slot.pool));
            }
        }

        let fresh = Arc::new(open_pool(&self.connector).await.inspect_err(|e| {
            tracing::error!(error = %e, "Cache pool rebuild failed");
        })?);

        let (stale, generation) = {
            let mut slot = self.slot.write().await;
            slot.generation = slot.generation.wrapping_add(1);
            let stale = std::mem::replace(&mut slot.pool, Arc::clone(&fresh));
            (stale, slot.generation)
        };
        stale.close().await;

        tracing::info!(generation, "Cache pool rebuilt");
        Ok(fresh)
    }
}

/// Build a pool and ping it once; a pool that cannot answer is closed.
async fn open_pool<C: CacheConnector>(connector: &C) -> Result<C::Pool, DbError> {
    let pool = connector.connect().await?;
    if let Err(e) = pool.lease().ping().await {
        pool.close().await;
        return Err(e);
    }
    Ok(pool)
}
