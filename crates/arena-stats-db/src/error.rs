//! Error types for the persistence layer.
//!
//! All backend errors are carried by [`DbError`], which wraps the underlying
//! [`sqlx`], [`fred`] and [`serde_json`] errors. Only construction paths hand a [`DbError`]
//! to the host; the load/save/leaderboard operations of
//! [`crate::StatStore`] log it and degrade instead.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A payload could not be encoded to or decoded from JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache store could not be reached or refused the operation.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The relational store could not be reached or refused the operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
