//! Entity model for arena-stats.
//!
//! This crate holds the in-memory representation of everything the
//! persistence layer stores: per-game counters, the per-player stat
//! collection, the main profile, and leaderboard projections. It has no I/O;
//! the `arena-stats-db` crate moves these types in and out of the cache and
//! the relational store.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe player identity wrapper around `Uuid`
//! - [`stat`] -- Per-game counters ([`Stat`]) and the per-player collection ([`PlayerStat`])
//! - [`profile`] -- Main profile entity ([`MainPlayer`])
//! - [`leaderboard`] -- Ranked metrics ([`Metric`]) and query rows ([`LbRow`])

pub mod ids;
pub mod leaderboard;
pub mod profile;
pub mod stat;

// Re-export all public types at crate root for convenience.
pub use ids::PlayerId;
pub use leaderboard::{LbRow, Metric, UnknownMetric};
pub use profile::MainPlayer;
pub use stat::{GameStats, PlayerStat, Stat};
