//! Two-tier persistence of player entities.
//!
//! [`StatStore`] implements the cache-aside protocol on top of a
//! [`CacheClient`] and a [`StatRepository`]:
//!
//! ```text
//! load:  cache GET (+EXPIRE) --miss--> relational SELECT --miss--> fresh entity
//!                                         |
//!                                         +--hit--> cache SET EX (best effort)
//!
//! save:  cache SET EX + leaderboards (one lease) --> relational upsert --> clear dirty
//! ```
//!
//! Loads and saves never return errors. Failures are logged and folded into
//! [`LoadSource`] and [`SaveOutcome`] so callers and tests can tell a truly
//! new player from one whose data could not be read.

use std::time::Duration;

use arena_stats_types::{GameStats, LbRow, MainPlayer, Metric, PlayerId, PlayerStat};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cache::{CacheClient, CacheConnection, CacheConnector};
use crate::error::DbError;
use crate::leaderboard;
use crate::repository::{PayloadColumn, StatRepository};

/// Time to live of entity payloads in the cache (72 hours). Refreshed on
/// every cache hit and every write.
pub const CACHE_TTL: Duration = Duration::from_secs(259_200);

/// Cache key of a player's stat map.
pub fn stats_key(player_id: PlayerId) -> String {
    format!("stats:{player_id}")
}

/// Cache key of a player's main profile.
pub fn main_key(player_id: PlayerId) -> String {
    format!("main:{player_id}")
}

fn cache_key(column: PayloadColumn, player_id: PlayerId) -> String {
    match column {
        PayloadColumn::Stats => stats_key(player_id),
        PayloadColumn::Main => main_key(player_id),
    }
}

/// Where a loaded entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadSource {
    /// Decoded from the cache.
    Cache,
    /// Decoded from the relational store after a cache miss.
    Database,
    /// Neither tier knew the player; a new zero-valued entity was created.
    Fresh,
    /// The relational store failed or held a corrupt payload. The entity is
    /// zero-valued and saving it will overwrite whatever was stored.
    Degraded,
}

/// A loaded entity plus the tier it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    /// The entity, always clean.
    pub entity: T,
    /// Where it was read from.
    pub source: LoadSource,
}

impl<T> Loaded<T> {
    /// Discard the source and keep the entity.
    pub fn into_entity(self) -> T {
        self.entity
    }

    /// Whether the entity stands in for data that could not be read.
    pub const fn is_degraded(&self) -> bool {
        matches!(self.source, LoadSource::Degraded)
    }
}

/// What a save did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entity had no unsaved changes; nothing was written.
    Clean,
    /// The entity was written. Dirty state is cleared whatever the flags say.
    Saved {
        /// Cache payload (and leaderboards, for stats) written.
        cache_written: bool,
        /// Relational row upserted.
        database_written: bool,
    },
    /// The entity could not be serialized and is still dirty.
    NotSerializable,
}

/// Cache-aside persistence for [`PlayerStat`] and [`MainPlayer`].
pub struct StatStore<C: CacheConnector, R> {
    cache: CacheClient<C>,
    repository: R,
}

impl<C: CacheConnector, R: StatRepository> StatStore<C, R> {
    /// Wrap a connected cache client and a repository, and bootstrap the
    /// `player_stats` table.
    ///
    /// With `testing_mode` the table is dropped first, wiping every row.
    /// Bootstrap failures are logged, not returned; later loads then report
    /// [`LoadSource::Degraded`].
    pub async fn open(cache: CacheClient<C>, repository: R, testing_mode: bool) -> Self {
        if testing_mode {
            tracing::warn!("Testing mode: dropping player_stats table");
            if let Err(e) = repository.drop_schema().await {
                tracing::error!(error = %e, "Could not drop player_stats table");
            }
        }
        match repository.ensure_schema().await {
            Ok(()) => tracing::info!("player_stats table ready"),
            Err(e) => tracing::error!(error = %e, "Could not create player_stats table"),
        }

        Self { cache, repository }
    }

    /// Load the stat entity for `player_id`.
    ///
    /// `name_hint` is the player's display name, if known; it is only used
    /// in log output.
    pub async fn load(&self, player_id: PlayerId, name_hint: Option<&str>) -> Loaded<PlayerStat> {
        let (games, source) = self
            .load_entity::<GameStats>(player_id, PayloadColumn::Stats)
            .await;
        tracing::debug!(%player_id, player_name = name_hint, ?source, "Loaded player stats");

        let entity = games.map_or_else(
            || PlayerStat::new(player_id),
            |games| PlayerStat::from_games(player_id, games),
        );
        Loaded { entity, source }
    }

    /// Load the main profile for `player_id`.
    pub async fn load_main(&self, player_id: PlayerId) -> Loaded<MainPlayer> {
        let (fields, source) = self
            .load_entity::<Map<String, Value>>(player_id, PayloadColumn::Main)
            .await;
        tracing::debug!(%player_id, ?source, "Loaded main profile");

        let entity = fields.map_or_else(
            || MainPlayer::new(player_id),
            |fields| MainPlayer::from_fields(player_id, fields),
        );
        Loaded { entity, source }
    }

    /// Write a dirty stat entity to both tiers and re-rank its dirty games.
    ///
    /// Cache and relational failures are logged and reported in the outcome.
    /// The dirty state is cleared even when the relational write failed, so
    /// the two tiers may diverge until the next save.
    pub async fn save(&self, stats: &mut PlayerStat) -> SaveOutcome {
        if !stats.is_dirty() {
            return SaveOutcome::Clean;
        }
        let player_id = stats.player_id();
        let payload = match encode(stats.games()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%player_id, error = %e, "Could not serialize player stats");
                return SaveOutcome::NotSerializable;
            }
        };

        let key = stats_key(player_id);
        let member = player_id.to_string();
        let (key, member) = (key.as_str(), member.as_str());
        let (body, entity) = (payload.as_str(), &*stats);

        let cache_written = self
            .cache
            .with_connection(|conn| async move {
                conn.set_with_ttl(key, body, CACHE_TTL).await?;
                for game in entity.dirty_games() {
                    let Some(stat) = entity.game(game) else {
                        continue;
                    };
                    for metric in Metric::ALL {
                        leaderboard::record_score(&conn, game, metric, stat.score(metric), member)
                            .await?;
                    }
                }
                Ok(())
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(%player_id, error = %e, "Cache write of player stats failed");
            })
            .is_ok();

        let database_written = self
            .upsert(player_id, PayloadColumn::Stats, &payload)
            .await;

        stats.clear_dirty();
        tracing::debug!(%player_id, cache_written, database_written, "Saved player stats");
        SaveOutcome::Saved {
            cache_written,
            database_written,
        }
    }

    /// Write a dirty main profile to both tiers. Same failure policy as
    /// [`StatStore::save`]; profiles are not ranked.
    pub async fn save_main(&self, main: &mut MainPlayer) -> SaveOutcome {
        if !main.is_dirty() {
            return SaveOutcome::Clean;
        }
        let player_id = main.player_id();
        let payload = match encode(main.fields()) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(%player_id, error = %e, "Could not serialize main profile");
                return SaveOutcome::NotSerializable;
            }
        };

        let cache_written = self.write_cached(&main_key(player_id), &payload).await;
        let database_written = self.upsert(player_id, PayloadColumn::Main, &payload).await;

        main.clear_dirty();
        tracing::debug!(%player_id, cache_written, database_written, "Saved main profile");
        SaveOutcome::Saved {
            cache_written,
            database_written,
        }
    }

    /// The `n` best players of `game` by `metric`, highest first.
    ///
    /// Returns an empty list for `n == 0` or when the cache cannot be read.
    pub async fn top(&self, game: &str, metric: Metric, n: usize) -> Vec<LbRow> {
        if n == 0 {
            return Vec::new();
        }
        let key = leaderboard::leaderboard_key(game, metric);
        let key = key.as_str();

        self.cache
            .with_connection(|conn| async move { leaderboard::top(&conn, key, n).await })
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(key, error = %e, "Leaderboard query failed");
                Vec::new()
            })
    }

    /// The underlying cache client.
    pub const fn cache(&self) -> &CacheClient<C> {
        &self.cache
    }

    /// Close the cache pool and the relational pool.
    pub async fn close(&self) {
        self.cache.close().await;
        self.repository.close().await;
    }

    /// Two-tier read of one payload column, decoded as `T`.
    ///
    /// `None` means a new entity must be created; the source says why.
    async fn load_entity<T: DeserializeOwned>(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
    ) -> (Option<T>, LoadSource) {
        let key = cache_key(column, player_id);
        let key = key.as_str();

        match self.read_cached(key).await {
            Ok(Some(payload)) => match decode::<T>(&payload) {
                Ok(value) => return (Some(value), LoadSource::Cache),
                Err(e) => {
                    tracing::warn!(key, error = %e, "Corrupt cached payload, reading database");
                }
            },
            Ok(None) => tracing::debug!(key, "Cache miss"),
            Err(e) => tracing::warn!(key, error = %e, "Cache read failed, reading database"),
        }

        match self.repository.fetch_payload(player_id, column).await {
            Ok(Some(payload)) => match decode::<T>(&payload) {
                Ok(value) => {
                    self.write_cached(key, &payload).await;
                    (Some(value), LoadSource::Database)
                }
                Err(e) => {
                    tracing::error!(
                        %player_id,
                        column = column.name(),
                        error = %e,
                        "Corrupt stored payload, starting from a blank entity"
                    );
                    (None, LoadSource::Degraded)
                }
            },
            Ok(None) => (None, LoadSource::Fresh),
            Err(e) => {
                tracing::error!(
                    %player_id,
                    column = column.name(),
                    error = %e,
                    "Database read failed, starting from a blank entity"
                );
                (None, LoadSource::Degraded)
            }
        }
    }

    /// `GET key`, refreshing the TTL on a hit.
    async fn read_cached(&self, key: &str) -> Result<Option<String>, DbError> {
        self.cache
            .with_connection(|conn| async move {
                let payload = conn.get(key).await?;
                if payload.is_some() {
                    if let Err(e) = conn.expire(key, CACHE_TTL).await {
                        tracing::warn!(key, error = %e, "Could not refresh cache TTL");
                    }
                }
                Ok(payload)
            })
            .await
    }

    /// `SET key payload EX ttl`; returns whether it was written.
    async fn write_cached(&self, key: &str, payload: &str) -> bool {
        self.cache
            .with_connection(|conn| async move { conn.set_with_ttl(key, payload, CACHE_TTL).await })
            .await
            .inspect_err(|e| tracing::warn!(key, error = %e, "Cache write failed"))
            .is_ok()
    }

    async fn upsert(&self, player_id: PlayerId, column: PayloadColumn, payload: &str) -> bool {
        self.repository
            .upsert_payload(player_id, column, payload)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    %player_id,
                    column = column.name(),
                    error = %e,
                    "Database upsert failed"
                );
            })
            .is_ok()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String, DbError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(payload: &str) -> Result<T, DbError> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryRepository};

    type MemoryStore = StatStore<MemoryCache, MemoryRepository>;

    async fn open_store(testing_mode: bool) -> (MemoryStore, MemoryCache, MemoryRepository) {
        let cache = MemoryCache::new();
        let repo = MemoryRepository::new();
        let client = CacheClient::connect(cache.clone()).await.unwrap();
        let store = StatStore::open(client, repo.clone(), testing_mode).await;
        (store, cache, repo)
    }

    fn saved(cache_written: bool, database_written: bool) -> SaveOutcome {
        SaveOutcome::Saved {
            cache_written,
            database_written,
        }
    }

    #[test]
    fn keys_use_hyphenated_ids() {
        let id: PlayerId = "0b6a2a5e-2f4a-4c39-9b1e-2d7f9f0e4c11".parse().unwrap();
        assert_eq!(stats_key(id), "stats:0b6a2a5e-2f4a-4c39-9b1e-2d7f9f0e4c11");
        assert_eq!(main_key(id), "main:0b6a2a5e-2f4a-4c39-9b1e-2d7f9f0e4c11");
        assert_eq!(CACHE_TTL, Duration::from_secs(72 * 60 * 60));
    }

    #[tokio::test]
    async fn unknown_player_loads_fresh_and_clean() {
        let (store, _, _) = open_store(false).await;
        let loaded = store.load(PlayerId::new(), Some("Steve")).await;

        assert_eq!(loaded.source, LoadSource::Fresh);
        assert!(!loaded.is_degraded());
        assert!(!loaded.entity.is_dirty());
        assert!(loaded.entity.games().is_empty());
    }

    #[tokio::test]
    async fn kill_and_win_survive_save_and_reload() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();

        let mut stats = store.load(id, None).await.into_entity();
        stats.add_kill("arena");
        stats.add_win("arena");
        assert_eq!(store.save(&mut stats).await, saved(true, true));
        assert!(!stats.is_dirty());

        let from_cache = store.load(id, None).await;
        assert_eq!(from_cache.source, LoadSource::Cache);
        let arena = from_cache.entity.game("arena").copied().unwrap();
        assert_eq!((arena.kills(), arena.wins(), arena.win_streak()), (1, 1, 1));
        assert!(!from_cache.entity.is_dirty());

        cache.evict(&stats_key(id));
        let from_db = store.load(id, None).await;
        assert_eq!(from_db.source, LoadSource::Database);
        assert_eq!(from_db.entity.games(), stats.games());
        assert!(repo.peek(id, PayloadColumn::Stats).is_some());
        assert_eq!(repo.peek(id, PayloadColumn::Main).as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn clean_save_writes_nothing() {
        let (store, cache, repo) = open_store(false).await;
        let mut stats = store.load(PlayerId::new(), None).await.into_entity();
        let (cache_writes, repo_writes) = (cache.writes(), repo.writes());

        assert_eq!(store.save(&mut stats).await, SaveOutcome::Clean);
        let mut main = store.load_main(stats.player_id()).await.into_entity();
        assert_eq!(store.save_main(&mut main).await, SaveOutcome::Clean);

        assert_eq!(cache.writes(), cache_writes);
        assert_eq!(repo.writes(), repo_writes);
    }

    #[tokio::test]
    async fn cache_outage_falls_through_to_database_and_repopulates() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();
        repo.insert_row(id, r#"{"arena":{"kills":5}}"#, "{}");

        cache.set_reachable(false);
        let loaded = store.load(id, None).await;
        assert_eq!(loaded.source, LoadSource::Database);
        assert_eq!(loaded.entity.game("arena").map(|s| s.kills()), Some(5));
        assert!(cache.peek(&stats_key(id)).is_none());

        cache.set_reachable(true);
        assert_eq!(store.load(id, None).await.source, LoadSource::Database);
        assert!(cache.peek(&stats_key(id)).is_some());
        assert_eq!(store.load(id, None).await.source, LoadSource::Cache);
    }

    #[tokio::test]
    async fn save_during_cache_outage_still_reaches_database() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();
        let mut stats = store.load(id, None).await.into_entity();
        stats.add_kills("arena", 5);

        cache.set_reachable(false);
        assert_eq!(store.save(&mut stats).await, saved(false, true));
        assert!(!stats.is_dirty());

        let row = repo.peek(id, PayloadColumn::Stats).unwrap();
        let games: GameStats = serde_json::from_str(&row).unwrap();
        assert_eq!(games.get("arena").map(|s| s.kills()), Some(5));
    }

    #[tokio::test]
    async fn database_failure_clears_dirty_and_is_reported() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();
        let mut stats = store.load(id, None).await.into_entity();
        stats.add_round("arena");

        repo.set_available(false);
        assert_eq!(store.save(&mut stats).await, saved(true, false));
        assert!(!stats.is_dirty());
        assert!(cache.peek(&stats_key(id)).is_some());
    }

    #[tokio::test]
    async fn storage_failure_is_degraded_not_fresh() {
        let (store, _, repo) = open_store(false).await;
        let known = PlayerId::new();
        repo.insert_row(known, r#"{"arena":{"wins":3}}"#, "{}");

        repo.set_available(false);
        let loaded = store.load(known, None).await;
        assert_eq!(loaded.source, LoadSource::Degraded);
        assert!(loaded.is_degraded());
        assert!(loaded.entity.games().is_empty());

        repo.set_available(true);
        assert_eq!(store.load(known, None).await.source, LoadSource::Database);
        assert_eq!(store.load(PlayerId::new(), None).await.source, LoadSource::Fresh);
    }

    #[tokio::test]
    async fn main_profile_storage_failure_is_degraded() {
        let (store, _, repo) = open_store(false).await;
        let known = PlayerId::new();
        repo.insert_row(known, "{}", r#"{"coins":75}"#);

        repo.set_available(false);
        let loaded = store.load_main(known).await;
        assert_eq!(loaded.source, LoadSource::Degraded);
        assert!(loaded.entity.fields().is_empty());
        assert!(!loaded.entity.is_dirty());

        repo.set_available(true);
        let loaded = store.load_main(known).await;
        assert_eq!(loaded.source, LoadSource::Database);
        assert_eq!(loaded.entity.field_as::<u32>("coins"), Some(75));
    }

    #[tokio::test]
    async fn corrupt_payloads_are_treated_as_misses() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();
        repo.insert_row(id, r#"{"arena":{"kills":2}}"#, "{}");
        cache.poke(&stats_key(id), "{not json", CACHE_TTL);

        let loaded = store.load(id, None).await;
        assert_eq!(loaded.source, LoadSource::Database);
        assert_eq!(loaded.entity.game("arena").map(|s| s.kills()), Some(2));

        let broken = PlayerId::new();
        repo.insert_row(broken, "[1, 2, 3]", "{}");
        assert_eq!(store.load(broken, None).await.source, LoadSource::Degraded);
    }

    #[test]
    fn undecodable_payload_is_a_serialization_error() {
        let result = decode::<GameStats>("{not json");
        assert!(matches!(result, Err(DbError::Serialization(_))));
        assert!(result.unwrap_err().to_string().starts_with("Serialization error"));
    }

    #[tokio::test]
    async fn close_releases_both_tiers() {
        let (store, _, repo) = open_store(false).await;
        store.close().await;

        assert!(repo.is_closed());
        assert_eq!(store.load(PlayerId::new(), None).await.source, LoadSource::Degraded);
    }

    #[tokio::test]
    async fn cache_hit_refreshes_ttl() {
        let (store, cache, _) = open_store(false).await;
        let id = PlayerId::new();
        cache.poke(&stats_key(id), r#"{"arena":{"deaths":1}}"#, Duration::from_secs(10));

        let loaded = store.load(id, None).await;
        assert_eq!(loaded.source, LoadSource::Cache);
        assert_eq!(cache.ttl(&stats_key(id)), Some(CACHE_TTL));
    }

    #[tokio::test]
    async fn main_profile_round_trips_without_touching_stats() {
        let (store, cache, repo) = open_store(false).await;
        let id = PlayerId::new();

        let mut main = store.load_main(id).await.into_entity();
        main.set_field("coins", 250);
        main.set_field("rank", "gold");
        assert_eq!(store.save_main(&mut main).await, saved(true, true));
        assert!(!main.is_dirty());

        let loaded = store.load_main(id).await;
        assert_eq!(loaded.source, LoadSource::Cache);
        assert_eq!(loaded.entity.field_as::<u32>("coins"), Some(250));

        cache.evict(&main_key(id));
        let loaded = store.load_main(id).await;
        assert_eq!(loaded.source, LoadSource::Database);
        assert_eq!(loaded.entity.fields(), main.fields());
        assert_eq!(repo.peek(id, PayloadColumn::Stats).as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn save_ranks_only_dirty_games() {
        let (store, cache, _) = open_store(false).await;
        let id = PlayerId::new();
        let mut stats = store.load(id, None).await.into_entity();
        stats.add_kills("sky wars", 4);
        stats.add_win("sky wars");
        store.save(&mut stats).await;

        stats.add_kill("duels");
        store.save(&mut stats).await;

        let kills = store.top("sky wars", Metric::Kills, 10).await;
        assert_eq!(kills, vec![LbRow { player_id: id, score: 4 }]);
        assert_eq!(cache.zcard("lb:sky_wars:streak"), 1);
        assert_eq!(cache.zcard("lb:duels:kills"), 1);
        assert!(store.top("sky wars", Metric::Kills, 0).await.is_empty());
        assert!(store.top("unknown", Metric::Wins, 5).await.is_empty());
    }

    #[tokio::test]
    async fn leaderboard_query_during_outage_is_empty() {
        let (store, cache, _) = open_store(false).await;
        cache.set_reachable(false);
        assert!(store.top("arena", Metric::Kills, 10).await.is_empty());
    }

    #[tokio::test]
    async fn testing_mode_wipes_the_table() {
        let (store, _, repo) = open_store(false).await;
        let id = PlayerId::new();
        repo.insert_row(id, r#"{"arena":{"kills":1}}"#, "{}");
        drop(store);

        let client = CacheClient::connect(MemoryCache::new()).await.unwrap();
        let store = StatStore::open(client, repo.clone(), true).await;

        assert_eq!(repo.row_count(), 0);
        assert_eq!(store.load(id, None).await.source, LoadSource::Fresh);
    }
}
