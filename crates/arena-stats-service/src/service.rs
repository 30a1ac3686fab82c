//! The player-facing persistence service.
//!
//! [`StatService`] owns one in-memory instance per online player. The first
//! request for a player loads it through the [`StatStore`]; concurrent first
//! requests wait on that single load and receive the same instance. Leaving
//! players are removed from memory and saved in the background.

use std::sync::Arc;

use arena_stats_db::{
    CacheClient, CacheConnector, DragonflyConnector, PgStatRepository, PostgresPool,
    StatRepository, StatStore,
};
use arena_stats_types::{LbRow, MainPlayer, Metric, PlayerId, PlayerStat};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::StatsConfig;
use crate::error::ServiceError;
use crate::writer::{Shared, Slot, WriteBehind};

/// In-memory entity caches in front of a [`StatStore`].
pub struct StatService<C: CacheConnector, R: StatRepository> {
    store: Arc<StatStore<C, R>>,
    stats: DashMap<PlayerId, Slot<PlayerStat>>,
    mains: DashMap<PlayerId, Slot<MainPlayer>>,
    writer: WriteBehind,
}

impl StatService<DragonflyConnector, PgStatRepository> {
    /// Connect to `PostgreSQL` and `Dragonfly`, bootstrap the table, and
    /// start the save worker.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Db`] if either store is unreachable. An
    /// unreachable cache is fatal: the host should not start without it.
    pub async fn connect(config: &StatsConfig) -> Result<Self, ServiceError> {
        let postgres = PostgresPool::connect(&config.postgres_config()).await?;
        let connector = DragonflyConnector::new(config.dragonfly_config());
        let cache = CacheClient::connect(connector).await?;

        let store = StatStore::open(cache, postgres.stat_repository(), config.testing_mode).await;
        Ok(Self::new(store))
    }
}

impl<C: CacheConnector, R: StatRepository> StatService<C, R> {
    /// Wrap an opened store and start the save worker.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(store: StatStore<C, R>) -> Self {
        let store = Arc::new(store);
        Self {
            writer: WriteBehind::spawn(Arc::clone(&store)),
            store,
            stats: DashMap::new(),
            mains: DashMap::new(),
        }
    }

    /// The stat entity for `player_id`, loading it on first access.
    ///
    /// `name_hint` is only used for log output.
    pub async fn get(&self, player_id: PlayerId, name_hint: Option<&str>) -> Shared<PlayerStat> {
        let slot = Arc::clone(self.stats.entry(player_id).or_default().value());
        let entity = slot
            .get_or_init(|| async {
                let loaded = self.store.load(player_id, name_hint).await;
                if loaded.is_degraded() {
                    tracing::warn!(%player_id, "Serving blank stats after a failed load");
                }
                Arc::new(Mutex::new(loaded.into_entity()))
            })
            .await;
        Arc::clone(entity)
    }

    /// The main profile for `player_id`, loading it on first access.
    pub async fn get_main(&self, player_id: PlayerId) -> Shared<MainPlayer> {
        let slot = Arc::clone(self.mains.entry(player_id).or_default().value());
        let entity = slot
            .get_or_init(|| async {
                let loaded = self.store.load_main(player_id).await;
                if loaded.is_degraded() {
                    tracing::warn!(%player_id, "Serving a blank profile after a failed load");
                }
                Arc::new(Mutex::new(loaded.into_entity()))
            })
            .await;
        Arc::clone(entity)
    }

    /// Drop `player_id` from memory and queue a final save of both
    /// entities. Returns immediately.
    ///
    /// Handles still held by callers stay usable, but changes made through
    /// them after the queued save runs are lost.
    pub fn remove(&self, player_id: PlayerId) {
        if let Some((_, slot)) = self.stats.remove(&player_id) {
            self.writer.save_stats(slot);
        }
        if let Some((_, slot)) = self.mains.remove(&player_id) {
            self.writer.save_main(slot);
        }
        tracing::debug!(%player_id, "Removed player from memory");
    }

    /// Queue a save of every entity in memory. Entities stay cached.
    pub fn flush_all(&self) {
        let mut queued = 0_usize;
        for entry in &self.stats {
            self.writer.save_stats(Arc::clone(entry.value()));
            queued = queued.saturating_add(1);
        }
        for entry in &self.mains {
            self.writer.save_main(Arc::clone(entry.value()));
            queued = queued.saturating_add(1);
        }
        tracing::info!(queued, "Queued flush of all cached entities");
    }

    /// Zero the win streak of `player_id` in `game`, loading the player if
    /// needed. The change is saved with the next save of that player.
    pub async fn reset_win_streak(&self, player_id: PlayerId, game: &str) {
        let entity = self.get(player_id, None).await;
        entity.lock().await.reset_win_streak(game);
    }

    /// The `n` best players of `game` by `metric`, highest first.
    pub async fn leaderboard(&self, game: &str, metric: Metric, n: usize) -> Vec<LbRow> {
        self.store.top(game, metric, n).await
    }

    /// Resolve once every save queued so far has finished.
    pub async fn drain(&self) {
        self.writer.drain().await;
    }

    /// Save everything in memory, wait for it, and close the cache and
    /// `PostgreSQL` pools.
    pub async fn shutdown(&self) {
        self.flush_all();
        self.drain().await;
        self.store.close().await;
        tracing::info!("Stat service shut down");
    }

    /// Whether `player_id` has a stat entity in memory.
    pub fn is_cached(&self, player_id: PlayerId) -> bool {
        self.stats.contains_key(&player_id)
    }

    /// Number of players with a stat entity in memory.
    pub fn cached_players(&self) -> usize {
        self.stats.len()
    }

    /// The underlying store, for direct loads and saves.
    pub fn store(&self) -> &StatStore<C, R> {
        &self.store
    }
}
