//! Error types for service construction.

use arena_stats_db::DbError;

use crate::config::ConfigError;

/// Errors that can occur while bringing up a [`crate::StatService`].
///
/// Once running, the service never returns errors; loads and saves degrade
/// and log instead.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A backing store could not be reached at startup.
    #[error("storage error: {0}")]
    Db(#[from] DbError),
}
