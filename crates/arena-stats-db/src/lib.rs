//! Data layer for arena-stats (`Dragonfly` + `PostgreSQL`).
//!
//! `Dragonfly` serves as the hot tier: entity payloads with a 72 h TTL and
//! the per-game leaderboards. `PostgreSQL` is the durable tier holding one
//! row per player. This crate provides the interface to both stores, the
//! resilient cache client in front of `Dragonfly`, and the cache-aside
//! protocol that ties them together.
//!
//! # Architecture (cache-aside)
//!
//! ```text
//! StatStore::load / save
//!     |
//!     +-- CacheClient::with_connection --> PING --(dead)--> rebuild pool
//!     |       |-- stats:{id}, main:{id}      (GET / SET EX / EXPIRE)
//!     |       +-- lb:{game}:{metric}         (ZADD / ZREMRANGEBYRANK)
//!     |
//!     +-- StatRepository ---------------> PostgreSQL player_stats
//! ```
//!
//! # Modules
//!
//! - [`cache`] -- Backend traits and the self-healing [`CacheClient`]
//! - [`dragonfly`] -- `Dragonfly` backend on a [`fred`] pool
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`repository`] -- `player_stats` table access
//! - [`leaderboard`] -- Bounded per-game sorted-set rankings
//! - [`store`] -- Cache-aside load and write-through save
//! - [`memory`] -- In-process backends for tests and local development
//! - [`error`] -- Shared error types

pub mod cache;
pub mod dragonfly;
pub mod error;
pub mod leaderboard;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod store;

// Re-export primary types for convenience.
pub use cache::{
    CACHE_CONNECT_TIMEOUT, CacheClient, CacheConnection, CacheConnector, CachePool,
    MAX_CACHE_CONNECTIONS,
};
pub use dragonfly::{DragonflyConfig, DragonflyConnection, DragonflyConnector, DragonflyPool};
pub use error::DbError;
pub use leaderboard::LEADERBOARD_CAPACITY;
pub use memory::{MemoryCache, MemoryRepository};
pub use postgres::{PostgresConfig, PostgresPool};
pub use repository::{PayloadColumn, PgStatRepository, StatRepository};
pub use store::{CACHE_TTL, LoadSource, Loaded, SaveOutcome, StatStore};

/// The production store: `Dragonfly` in front of `PostgreSQL`.
pub type PgStatStore = StatStore<DragonflyConnector, PgStatRepository>;
