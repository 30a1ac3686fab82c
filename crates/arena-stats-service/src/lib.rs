//! Player-facing persistence service for arena-stats.
//!
//! A game server embeds this crate to keep per-player stats and profiles in
//! memory while players are online, backed by the cache-aside store from
//! `arena-stats-db`.
//!
//! # Lifecycle
//!
//! ```text
//! join   --> StatService::get / get_main   (load once, share the instance)
//! play   --> entity.lock().await.add_kill(..)  (marks dirty)
//! leave  --> StatService::remove           (queue final save, return at once)
//! stop   --> StatService::shutdown         (flush, drain, close)
//! ```
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration with environment overrides
//! - [`service`] -- Entity caches and the public operations
//! - [`error`] -- Startup error types

pub mod config;
pub mod error;
pub mod service;
mod writer;

pub use config::{CacheSettings, ConfigError, DatabaseSettings, StatsConfig};
pub use error::ServiceError;
pub use service::StatService;
pub use writer::Shared;
