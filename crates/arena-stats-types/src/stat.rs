//! Per-game counters and the per-player stat collection.
//!
//! A [`PlayerStat`] owns one [`Stat`] per game name. Counters only move
//! through the dedicated increment methods on [`PlayerStat`]; each of them
//! marks the entity dirty and records the touched game so a save can skip
//! clean entities and only re-rank the games that changed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::PlayerId;
use crate::leaderboard::Metric;

/// Game name to counters. This is the exact shape of the stored payload.
pub type GameStats = HashMap<String, Stat>;

// ---------------------------------------------------------------------------
// Stat
// ---------------------------------------------------------------------------

/// Counters for one player in one game.
///
/// Field names are serialized in camelCase and every field defaults to zero,
/// so payloads written by older versions (missing newer fields) still load.
/// Increments saturate at `u32::MAX`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stat {
    kills: u32,
    deaths: u32,
    wins: u32,
    win_streak: u32,
    rounds_played: u32,
    /// Seconds.
    time_played: u32,
}

impl Stat {
    /// Total kills.
    pub const fn kills(&self) -> u32 {
        self.kills
    }

    /// Total deaths.
    pub const fn deaths(&self) -> u32 {
        self.deaths
    }

    /// Total wins.
    pub const fn wins(&self) -> u32 {
        self.wins
    }

    /// Consecutive wins since the last streak reset.
    pub const fn win_streak(&self) -> u32 {
        self.win_streak
    }

    /// Rounds played.
    pub const fn rounds_played(&self) -> u32 {
        self.rounds_played
    }

    /// Time played in seconds.
    pub const fn time_played(&self) -> u32 {
        self.time_played
    }

    /// The counter ranked under `metric`.
    pub const fn score(&self, metric: Metric) -> u32 {
        match metric {
            Metric::Kills => self.kills,
            Metric::Wins => self.wins,
            Metric::WinStreak => self.win_streak,
            Metric::RoundsPlayed => self.rounds_played,
        }
    }

    const fn add_kills(&mut self, n: u32) {
        self.kills = self.kills.saturating_add(n);
    }

    const fn add_deaths(&mut self, n: u32) {
        self.deaths = self.deaths.saturating_add(n);
    }

    /// One win is +1 wins and +1 streak.
    const fn add_win(&mut self) {
        self.wins = self.wins.saturating_add(1);
        self.win_streak = self.win_streak.saturating_add(1);
    }

    const fn reset_win_streak(&mut self) {
        self.win_streak = 0;
    }

    const fn add_round(&mut self) {
        self.rounds_played = self.rounds_played.saturating_add(1);
    }

    const fn add_time(&mut self, seconds: u32) {
        self.time_played = self.time_played.saturating_add(seconds);
    }
}

// ---------------------------------------------------------------------------
// PlayerStat
// ---------------------------------------------------------------------------

/// All per-game counters for one player, with dirty tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStat {
    player_id: PlayerId,
    games: GameStats,
    dirty: bool,
    dirty_games: HashSet<String>,
}

impl PlayerStat {
    /// A brand-new, zero-valued, clean entity.
    pub fn new(player_id: PlayerId) -> Self {
        Self::from_games(player_id, GameStats::new())
    }

    /// Rebuild an entity from a stored payload. The result is clean.
    pub fn from_games(player_id: PlayerId, games: GameStats) -> Self {
        Self {
            player_id,
            games,
            dirty: false,
            dirty_games: HashSet::new(),
        }
    }

    /// The owning player.
    pub const fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Counters for `game`, if the player has any.
    pub fn game(&self, game: &str) -> Option<&Stat> {
        self.games.get(game)
    }

    /// Every game this player has counters for.
    pub const fn games(&self) -> &GameStats {
        &self.games
    }

    /// Whether there are unsaved mutations.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Games touched since the last save.
    pub const fn dirty_games(&self) -> &HashSet<String> {
        &self.dirty_games
    }

    /// Reset dirty state. Only the store calls this, right after a save.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
        self.dirty_games.clear();
    }

    /// Record one kill in `game`.
    pub fn add_kill(&mut self, game: &str) {
        self.touch(game).add_kills(1);
    }

    /// Record `n` kills in `game`.
    pub fn add_kills(&mut self, game: &str, n: u32) {
        self.touch(game).add_kills(n);
    }

    /// Record one death in `game`.
    pub fn add_death(&mut self, game: &str) {
        self.touch(game).add_deaths(1);
    }

    /// Record a win in `game`; also extends the win streak.
    pub fn add_win(&mut self, game: &str) {
        self.touch(game).add_win();
    }

    /// Record a played round in `game`.
    pub fn add_round(&mut self, game: &str) {
        self.touch(game).add_round();
    }

    /// Add `seconds` of play time in `game`.
    pub fn add_time(&mut self, game: &str, seconds: u32) {
        self.touch(game).add_time(seconds);
    }

    /// Zero the win streak in `game`.
    pub fn reset_win_streak(&mut self, game: &str) {
        self.touch(game).reset_win_streak();
    }

    fn touch(&mut self, game: &str) -> &mut Stat {
        self.dirty = true;
        if !self.dirty_games.contains(game) {
            self.dirty_games.insert(game.to_owned());
        }
        self.games.entry(game.to_owned()).or_default()
    }
}
