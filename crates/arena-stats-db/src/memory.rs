//! In-process cache and relational backends.
//!
//! [`MemoryCache`] and [`MemoryRepository`] implement the same traits as the
//! `Dragonfly` and `PostgreSQL` backends, with Redis/`PostgreSQL` semantics for
//! the commands the store uses. They also expose switches to simulate
//! outages and counters to observe what the store did. They back the test
//! suites and single-process local development; they are not meant for
//! production.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arena_stats_types::PlayerId;
use async_trait::async_trait;

use crate::cache::{CacheConnection, CacheConnector, CachePool, MAX_CACHE_CONNECTIONS};
use crate::error::DbError;
use crate::repository::{PayloadColumn, StatRepository};

// =========================================================================
// Cache
// =========================================================================

#[derive(Default)]
struct CacheData {
    strings: HashMap<String, (String, Duration)>,
    sorted_sets: HashMap<String, HashMap<String, f64>>,
}

struct CacheState {
    data: Mutex<CacheData>,
    reachable: AtomicBool,
    epoch: AtomicU64,
    broken: Mutex<HashSet<(u64, usize)>>,
    pools_built: AtomicU64,
    leases: AtomicUsize,
    writes: AtomicU64,
}

/// In-process Redis-compatible cache with simulated outages.
///
/// Clones share the same data. [`MemoryCache::set_reachable`] takes the whole
/// "server" down; [`MemoryCache::sever_connections`] breaks every pool built
/// so far while letting new pools connect, which is what a restarted cache
/// node or dropped network path looks like to a client.
/// [`MemoryCache::break_connection`] kills a single pooled connection.
///
/// Pools hand out their [`MAX_CACHE_CONNECTIONS`] connections in rotation,
/// like fred's pool does.
#[derive(Clone)]
pub struct MemoryCache {
    state: Arc<CacheState>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    /// An empty, reachable cache.
    pub fn new() -> Self {
        Self {
            state: Arc::new(CacheState {
                data: Mutex::new(CacheData::default()),
                reachable: AtomicBool::new(true),
                epoch: AtomicU64::new(0),
                broken: Mutex::new(HashSet::new()),
                pools_built: AtomicU64::new(0),
                leases: AtomicUsize::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Take the cache up or down. While down every command and connect fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Invalidate every existing pool; pools built afterwards work.
    pub fn sever_connections(&self) {
        self.state.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Break connection `index` of the most recently built pool, as a single
    /// dropped socket would. Other connections and later pools are unaffected.
    pub fn break_connection(&self, index: usize) {
        let pool = self.state.pools_built.load(Ordering::SeqCst);
        self.state
            .broken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((pool, index));
    }

    /// Pools successfully built so far.
    pub fn pools_built(&self) -> u64 {
        self.state.pools_built.load(Ordering::SeqCst)
    }

    /// Connection leases currently held.
    pub fn outstanding_leases(&self) -> usize {
        self.state.leases.load(Ordering::SeqCst)
    }

    /// Write commands executed so far (SET, ZADD, ZREMRANGEBYRANK).
    pub fn writes(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Stored string value, bypassing reachability.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.data().strings.get(key).map(|(v, _)| v.clone())
    }

    /// Remaining TTL last set on a string key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.data().strings.get(key).map(|(_, ttl)| *ttl)
    }

    /// Store a raw string value, bypassing reachability and write counting.
    pub fn poke(&self, key: &str, value: &str, ttl: Duration) {
        self.data()
            .strings
            .insert(key.to_owned(), (value.to_owned(), ttl));
    }

    /// Drop a string key, bypassing reachability.
    pub fn evict(&self, key: &str) {
        self.data().strings.remove(key);
    }

    /// Number of members in a sorted set.
    pub fn zcard(&self, key: &str) -> usize {
        self.data().sorted_sets.get(key).map_or(0, HashMap::len)
    }

    /// Score of a sorted-set member.
    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        self.data()
            .sorted_sets
            .get(key)
            .and_then(|set| set.get(member).copied())
    }

    fn data(&self) -> MutexGuard<'_, CacheData> {
        self.state.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CacheConnector for MemoryCache {
    type Pool = MemoryPool;

    async fn connect(&self) -> Result<Self::Pool, DbError> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(DbError::CacheUnavailable("connection refused".to_owned()));
        }
        let id = self.state.pools_built.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        Ok(MemoryPool {
            cache: self.clone(),
            epoch: self.state.epoch.load(Ordering::SeqCst),
            id,
            cursor: AtomicUsize::new(0),
        })
    }
}

/// Pool handed out by [`MemoryCache`].
pub struct MemoryPool {
    cache: MemoryCache,
    epoch: u64,
    id: u64,
    cursor: AtomicUsize,
}

#[async_trait]
impl CachePool for MemoryPool {
    type Connection = MemoryConnection;

    fn lease(&self) -> MemoryConnection {
        let index = self
            .cursor
            .fetch_add(1, Ordering::SeqCst)
            .checked_rem(MAX_CACHE_CONNECTIONS)
            .unwrap_or(0);
        MemoryConnection::new(
            self.cache.clone(),
            Origin {
                epoch: self.epoch,
                pool: self.id,
                index,
            },
        )
    }

    async fn close(&self) {}
}

/// Which pool, and which slot in it, a connection was leased from.
#[derive(Clone, Copy)]
struct Origin {
    epoch: u64,
    pool: u64,
    index: usize,
}

/// A leased connection to a [`MemoryCache`].
pub struct MemoryConnection {
    cache: MemoryCache,
    origin: Origin,
}

impl MemoryConnection {
    fn new(cache: MemoryCache, origin: Origin) -> Self {
        cache.state.leases.fetch_add(1, Ordering::SeqCst);
        Self { cache, origin }
    }

    fn check(&self) -> Result<(), DbError> {
        let state = &self.cache.state;
        if !state.reachable.load(Ordering::SeqCst) {
            return Err(DbError::CacheUnavailable("connection refused".to_owned()));
        }
        let broken = state
            .broken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(self.origin.pool, self.origin.index));
        if broken || state.epoch.load(Ordering::SeqCst) != self.origin.epoch {
            return Err(DbError::CacheUnavailable("connection reset by peer".to_owned()));
        }
        Ok(())
    }

    fn write(&self) -> Result<MutexGuard<'_, CacheData>, DbError> {
        self.check()?;
        self.cache.state.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.cache.data())
    }
}

impl Clone for MemoryConnection {
    fn clone(&self) -> Self {
        Self::new(self.cache.clone(), self.origin)
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.cache.state.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheConnection for MemoryConnection {
    async fn ping(&self) -> Result<(), DbError> {
        self.check()
    }

    async fn get(&self, key: &str) -> Result<Option<String>, DbError> {
        self.check()?;
        Ok(self.cache.peek(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), DbError> {
        self.write()?
            .strings
            .insert(key.to_owned(), (value.to_owned(), ttl));
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, DbError> {
        self.check()?;
        Ok(self
            .cache
            .data()
            .strings
            .get_mut(key)
            .map(|entry| entry.1 = ttl)
            .is_some())
    }

    async fn zadd_if_exists(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError> {
        let mut data = self.write()?;
        let Some(current) = data
            .sorted_sets
            .get_mut(key)
            .and_then(|set| set.get_mut(member))
        else {
            return Ok(0);
        };
        if current.total_cmp(&score) == CmpOrdering::Equal {
            return Ok(0);
        }
        *current = score;
        Ok(1)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<u64, DbError> {
        let mut data = self.write()?;
        let previous = data
            .sorted_sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned(), score);
        Ok(u64::from(previous.is_none()))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64, DbError> {
        let mut data = self.write()?;
        let Some(set) = data.sorted_sets.get_mut(key) else {
            return Ok(0);
        };

        let ascending = sorted_members(set, false);
        let doomed: Vec<String> = rank_window(ascending.len(), start, stop)
            .map(|(skip, take)| {
                ascending
                    .into_iter()
                    .skip(skip)
                    .take(take)
                    .map(|(member, _)| member)
                    .collect()
            })
            .unwrap_or_default();

        for member in &doomed {
            set.remove(member);
        }
        if set.is_empty() {
            data.sorted_sets.remove(key);
        }
        Ok(u64::try_from(doomed.len()).unwrap_or(u64::MAX))
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, DbError> {
        self.check()?;
        let data = self.cache.data();
        let Some(set) = data.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };

        let descending = sorted_members(set, true);
        Ok(rank_window(descending.len(), start, stop)
            .map(|(skip, take)| descending.into_iter().skip(skip).take(take).collect())
            .unwrap_or_default())
    }
}

/// Members ordered by (score, member), reversed when `descending`.
fn sorted_members(set: &HashMap<String, f64>, descending: bool) -> Vec<(String, f64)> {
    let mut members: Vec<(String, f64)> = set.iter().map(|(m, s)| (m.clone(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    if descending {
        members.reverse();
    }
    members
}

/// Resolve Redis-style inclusive `start..=stop` ranks (negative counts from
/// the end) against `len` members into `(skip, take)`.
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).ok()?;
    let start = if start < 0 { start.saturating_add(len).max(0) } else { start };
    let stop = if stop < 0 { stop.saturating_add(len) } else { stop.min(len.saturating_sub(1)) };
    if start > stop || start >= len {
        return None;
    }
    let skip = usize::try_from(start).ok()?;
    let take = usize::try_from(stop.saturating_sub(start).saturating_add(1)).ok()?;
    Some((skip, take))
}

// =========================================================================
// Relational store
// =========================================================================

#[derive(Default, Clone)]
struct Row {
    stats: String,
    main: String,
}

struct RepositoryState {
    rows: Mutex<HashMap<PlayerId, Row>>,
    table_exists: AtomicBool,
    available: AtomicBool,
    closed: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

/// In-process `player_stats` table with simulated outages.
///
/// Clones share the same rows. Like the real table it must be created by
/// [`StatRepository::ensure_schema`] before use.
#[derive(Clone)]
pub struct MemoryRepository {
    state: Arc<RepositoryState>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// An available store with no table yet.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RepositoryState {
                rows: Mutex::new(HashMap::new()),
                table_exists: AtomicBool::new(false),
                available: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                reads: AtomicU64::new(0),
                writes: AtomicU64::new(0),
            }),
        }
    }

    /// Take the database up or down.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Whether [`StatRepository::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Row reads executed so far.
    pub fn reads(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// Upserts executed so far.
    pub fn writes(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }

    /// Stored payload, bypassing availability and counters.
    pub fn peek(&self, player_id: PlayerId, column: PayloadColumn) -> Option<String> {
        self.rows()
            .get(&player_id)
            .map(|row| column_of(row, column).clone())
    }

    /// Insert or replace a whole row, bypassing availability and counters.
    pub fn insert_row(&self, player_id: PlayerId, stats: &str, main: &str) {
        self.rows().insert(
            player_id,
            Row {
                stats: stats.to_owned(),
                main: main.to_owned(),
            },
        );
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows().len()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<PlayerId, Row>> {
        self.state.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<(), DbError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(DbError::StorageUnavailable(
                "connection to server was lost".to_owned(),
            ));
        }
        if self.is_closed() {
            return Err(DbError::StorageUnavailable("pool closed".to_owned()));
        }
        if !self.state.table_exists.load(Ordering::SeqCst) {
            return Err(DbError::StorageUnavailable(
                "relation \"player_stats\" does not exist".to_owned(),
            ));
        }
        Ok(())
    }
}

const fn column_of(row: &Row, column: PayloadColumn) -> &String {
    match column {
        PayloadColumn::Stats => &row.stats,
        PayloadColumn::Main => &row.main,
    }
}

#[async_trait]
impl StatRepository for MemoryRepository {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(DbError::StorageUnavailable(
                "connection to server was lost".to_owned(),
            ));
        }
        self.state.table_exists.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_schema(&self) -> Result<(), DbError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(DbError::StorageUnavailable(
                "connection to server was lost".to_owned(),
            ));
        }
        self.rows().clear();
        self.state.table_exists.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
    ) -> Result<Option<String>, DbError> {
        self.check()?;
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.peek(player_id, column))
    }

    async fn upsert_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
        payload: &str,
    ) -> Result<(), DbError> {
        self.check()?;
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows();
        let row = rows.entry(player_id).or_insert_with(|| Row {
            stats: "{}".to_owned(),
            main: "{}".to_owned(),
        });
        match column {
            PayloadColumn::Stats => payload.clone_into(&mut row.stats),
            PayloadColumn::Main => payload.clone_into(&mut row.main),
        }
        Ok(())
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}
