//! Leaderboard metrics and query rows.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;

/// A counter that is ranked per game.
///
/// Deaths and time played are stored but not ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Total kills.
    Kills,
    /// Total wins.
    Wins,
    /// Current win streak.
    WinStreak,
    /// Rounds played.
    RoundsPlayed,
}

impl Metric {
    /// Every ranked metric, in the order a save updates them.
    pub const ALL: [Self; 4] = [Self::Kills, Self::Wins, Self::WinStreak, Self::RoundsPlayed];

    /// Name used in the leaderboard key (`lb:<game>:<name>`).
    pub const fn key_name(self) -> &'static str {
        match self {
            Self::Kills => "kills",
            Self::Wins => "wins",
            Self::WinStreak => "streak",
            Self::RoundsPlayed => "rounds",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

/// Returned when a string names no ranked metric.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown leaderboard metric: {0}")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kills" => Ok(Self::Kills),
            "wins" => Ok(Self::Wins),
            "streak" | "win_streak" => Ok(Self::WinStreak),
            "rounds" | "rounds_played" => Ok(Self::RoundsPlayed),
            other => Err(UnknownMetric(other.to_owned())),
        }
    }
}

/// One leaderboard entry. Produced by queries only, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbRow {
    /// The ranked player.
    pub player_id: PlayerId,
    /// The player's score for the queried metric.
    pub score: u64,
}
