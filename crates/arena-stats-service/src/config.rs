//! Configuration loading and typed config structures for arena-stats.
//!
//! The host keeps the configuration in a YAML file (see
//! `arena-stats.example.yaml` next to this crate's manifest). Every
//! connection field is required; a file that omits one is rejected rather
//! than silently pointed at a default host.
//!
//! Environment variables override YAML values so deployments can inject
//! connection targets without editing the file:
//! - `DATABASE_URL` overrides `database.url`
//! - `CACHE_HOST` overrides `cache.host`

use std::path::Path;

use arena_stats_db::{DragonflyConfig, PostgresConfig};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content, including missing required fields.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The YAML parsed but a value is unusable.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatsConfig {
    /// Relational store connection.
    pub database: DatabaseSettings,

    /// Cache connection.
    pub cache: CacheSettings,

    /// Drop the `player_stats` table on startup. Destroys all data; only for
    /// throwaway test servers.
    #[serde(default)]
    pub testing_mode: bool,
}

/// `PostgreSQL` connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseSettings {
    /// Connection URL, e.g. `postgresql://localhost:5432/arena`.
    pub url: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

/// `Dragonfly` connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheSettings {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// `AUTH` password; empty for none.
    pub password: String,
}

impl StatsConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML or lacks a
    /// required field, or [`ConfigError::Invalid`] if a value is unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded stats configuration");
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides are
    /// applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or lacks
    /// a required field, or [`ConfigError::Invalid`] if a value is unusable.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Override connection targets with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Override connection targets from `lookup` (variable name to value).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(host) = lookup("CACHE_HOST") {
            self.cache.host = host;
        }
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database.url is empty".to_owned()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_owned(),
            ));
        }
        if self.cache.host.trim().is_empty() {
            return Err(ConfigError::Invalid("cache.host is empty".to_owned()));
        }
        if self.cache.port == 0 {
            return Err(ConfigError::Invalid("cache.port must not be 0".to_owned()));
        }
        Ok(())
    }

    /// Pool configuration for [`arena_stats_db::PostgresPool::connect`].
    pub fn postgres_config(&self) -> PostgresConfig {
        let config = PostgresConfig::new(&self.database.url)
            .with_max_connections(self.database.max_connections);
        if self.database.username.is_empty() {
            config
        } else {
            config.with_credentials(&self.database.username, &self.database.password)
        }
    }

    /// Connector configuration for [`arena_stats_db::DragonflyConnector`].
    pub fn dragonfly_config(&self) -> DragonflyConfig {
        DragonflyConfig::new(&self.cache.host, self.cache.port).with_password(&self.cache.password)
    }
}
