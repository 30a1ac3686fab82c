//! `Dragonfly` (Redis-compatible) cache backend.
//!
//! Implements the [`crate::cache`] traits on top of a [`fred`] connection
//! pool. The pool is never asked to reconnect on its own: when the cache
//! drops away, [`crate::CacheClient`] notices on its next `PING` and builds a
//! whole new pool through [`DragonflyConnector`].
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `stats:{id}` | JSON | Per-game stat map, 72 h TTL |
//! | `main:{id}` | JSON | Main profile, 72 h TTL |
//! | `lb:{game}:{metric}` | Sorted set | Top 100 players by metric |

use std::time::Duration;

use async_trait::async_trait;
use fred::prelude::*;

use crate::cache::{
    CACHE_CONNECT_TIMEOUT, CacheConnection, CacheConnector, CachePool, MAX_CACHE_CONNECTIONS,
};
use crate::error::DbError;

/// Where and how to reach `Dragonfly`.
#[derive(Debug, Clone)]
pub struct DragonflyConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// `AUTH` password, if the server requires one.
    pub password: Option<String>,
    /// Connections per pool, at least 1 and at most [`MAX_CACHE_CONNECTIONS`].
    pub pool_size: usize,
    /// Connection-establishment timeout.
    pub connect_timeout: Duration,
}

impl DragonflyConfig {
    /// Configuration for `host:port` with default pool settings.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_owned(),
            port,
            password: None,
            pool_size: MAX_CACHE_CONNECTIONS,
            connect_timeout: CACHE_CONNECT_TIMEOUT,
        }
    }

    /// Set the `AUTH` password. An empty password means none.
    #[must_use]
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = (!password.is_empty()).then(|| password.to_owned());
        self
    }

    /// Set the pool size, clamped to `1..=MAX_CACHE_CONNECTIONS`.
    #[must_use]
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.clamp(1, MAX_CACHE_CONNECTIONS);
        self
    }
}

/// Builds [`DragonflyPool`]s from a [`DragonflyConfig`].
#[derive(Debug, Clone)]
pub struct DragonflyConnector {
    config: DragonflyConfig,
}

impl DragonflyConnector {
    /// Create a connector for the given configuration.
    pub const fn new(config: DragonflyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CacheConnector for DragonflyConnector {
    type Pool = DragonflyPool;

    async fn connect(&self) -> Result<DragonflyPool, DbError> {
        let config = Config {
            server: ServerConfig::new_centralized(&self.config.host, self.config.port),
            password: self.config.password.clone(),
            ..Config::default()
        };

        let connect_timeout = self.config.connect_timeout;
        let pool = Builder::from_config(config)
            .with_connection_config(|connection| {
                connection.connection_timeout = connect_timeout;
            })
            .build_pool(self.config.pool_size)?;
        pool.init().await?;

        tracing::info!(
            host = self.config.host.as_str(),
            port = self.config.port,
            pool_size = self.config.pool_size,
            "Connected to Dragonfly"
        );
        Ok(DragonflyPool { pool })
    }
}

/// A [`fred`] pool of `Dragonfly` connections.
pub struct DragonflyPool {
    pool: Pool,
}

#[async_trait]
impl CachePool for DragonflyPool {
    type Connection = DragonflyConnection;

    fn lease(&self) -> DragonflyConnection {
        DragonflyConnection {
            client: self.pool.next().clone(),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pool.quit().await {
            tracing::warn!(error = %e, "Error closing Dragonfly pool");
        }
    }
}

/// One pooled `Dragonfly` client.
#[derive(Clone)]
pub struct DragonflyConnection {
    client: Client,
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)
}

fn count(reply: i64) -> u64 {
    u64::try_from(reply).unwrap_or(0)
}

#[async_trait]
impl CacheConnection for DragonflyConnection {
    async fn ping(&self) -> Result<(), DbError> {
        let reply: String = self.client.ping(None).await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(DbError::CacheUnavailable(format!(
                "unexpected PING reply: {reply}"
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError> {
        let _: () = self
            .client
            .set(key, value, Some(Expiration::EX(ttl_secs(ttl))), None, false)
            .await?;
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DbError> {
        let applied: bool = self.client.expire(key, ttl_secs(ttl), None).await?;
        Ok(applied)
    }

    async fn zadd_if_exists(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError> {
        let changed: i64 = self
            .client
            .zadd(key, Some(SetOptions::XX), None, true, false, (score, member))
            .await?;
        Ok(count(changed))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError> {
        let added: i64 = self
            .client
            .zadd(key, None, None, false, false, (score, member))
            .await?;
        Ok(count(added))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64, DbError> {
        let removed: i64 = self.client.zremrangebyrank(key, start, stop).await?;
        Ok(count(removed))
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, DbError> {
        let entries: Vec<(String, f64)> = self.client.zrevrange(key, start, stop, true).await?;
        Ok(entries)
    }
}
