//! Integration tests for the `arena-stats-db` data layer.
//!
//! These tests require live Docker services (Dragonfly and `PostgreSQL`).
//! Run with:
//!
//! ```bash
//! docker run -d -p 6379:6379 docker.dragonflydb.io/dragonflydb/dragonfly
//! docker run -d -p 5432:5432 -e POSTGRES_USER=arena -e POSTGRES_PASSWORD=arena_dev \
//!     -e POSTGRES_DB=arena postgres:16
//! cargo test -p arena-stats-db -- --ignored --test-threads=1
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

// Integration tests use expect/unwrap extensively for clarity -- panicking
// on failure is the correct behavior in test code.
#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::time::Duration;

use arena_stats_db::{
    CACHE_TTL, CacheClient, CacheConnection, DragonflyConfig, DragonflyConnector, LoadSource,
    PayloadColumn, PgStatStore, PostgresConfig, PostgresPool, SaveOutcome, StatRepository,
    StatStore,
};
use arena_stats_types::{Metric, PlayerId};

/// `PostgreSQL` connection URL for the local Docker instance.
const POSTGRES_URL: &str = "postgresql://localhost:5432/arena";

/// `PostgreSQL` credentials for the local Docker instance.
const POSTGRES_USER: &str = "arena";
const POSTGRES_PASSWORD: &str = "arena_dev";

/// Dragonfly host and port for the local Docker instance.
const DRAGONFLY_HOST: &str = "localhost";
const DRAGONFLY_PORT: u16 = 6379;

// =============================================================================
// Helpers
// =============================================================================

async fn setup_postgres() -> PostgresPool {
    let config = PostgresConfig::new(POSTGRES_URL)
        .with_credentials(POSTGRES_USER, POSTGRES_PASSWORD)
        .with_max_connections(4);
    PostgresPool::connect(&config)
        .await
        .expect("Failed to connect to PostgreSQL -- is Docker running?")
}

async fn setup_cache() -> CacheClient<DragonflyConnector> {
    let connector = DragonflyConnector::new(DragonflyConfig::new(DRAGONFLY_HOST, DRAGONFLY_PORT));
    CacheClient::connect(connector)
        .await
        .expect("Failed to connect to Dragonfly -- is Docker running?")
}

async fn setup_store() -> PgStatStore {
    let pg = setup_postgres().await;
    StatStore::open(setup_cache().await, pg.stat_repository(), false).await
}

// =============================================================================
// Dragonfly Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_commands_roundtrip() {
    let cache = setup_cache().await;
    let key = format!("it:{}", PlayerId::new());

    let value = cache
        .with_connection(|conn| {
            let key = key.clone();
            async move {
                conn.set_with_ttl(&key, "payload", Duration::from_secs(30))
                    .await?;
                assert!(conn.expire(&key, Duration::from_secs(60)).await?);
                conn.get(&key).await
            }
        })
        .await
        .expect("Round trip failed");

    assert_eq!(value.as_deref(), Some("payload"));
    cache.close().await;
}

#[tokio::test]
#[ignore = "requires live Dragonfly instance"]
async fn dragonfly_sorted_set_semantics() {
    let cache = setup_cache().await;
    let key = format!("it:lb:{}", PlayerId::new());

    let (first, unchanged, changed, top) = cache
        .with_connection(|conn| {
            let key = key.clone();
            async move {
                let first = conn.zadd_if_exists(&key, "a", 1.0).await?;
                conn.zadd(&key, "a", 1.0).await?;
                conn.zadd(&key, "b", 9.0).await?;
                let unchanged = conn.zadd_if_exists(&key, "a", 1.0).await?;
                let changed = conn.zadd_if_exists(&key, "a", 4.0).await?;
                let top = conn.zrevrange_with_scores(&key, 0, -1).await?;
                conn.zremrangebyrank(&key, 0, -1).await?;
                Ok((first, unchanged, changed, top))
            }
        })
        .await
        .expect("Sorted set commands failed");

    assert_eq!((first, unchanged, changed), (0, 0, 1));
    let members: Vec<&str> = top.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(members, vec!["b", "a"]);
}

// =============================================================================
// PostgreSQL Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires live PostgreSQL instance"]
async fn postgres_upsert_keeps_other_column() {
    let pg = setup_postgres().await;
    let repo = pg.stat_repository();
    repo.ensure_schema().await.expect("Failed to create table");

    let id = PlayerId::new();
    repo.upsert_payload(id, PayloadColumn::Stats, r#"{"arena":{"kills":2}}"#)
        .await
        .expect("Failed to upsert stats");
    repo.upsert_payload(id, PayloadColumn::Main, r#"{"coins":10}"#)
        .await
        .expect("Failed to upsert main");

    let stats = repo
        .fetch_payload(id, PayloadColumn::Stats)
        .await
        .expect("Failed to fetch stats")
        .expect("Row missing");
    let value: serde_json::Value = serde_json::from_str(&stats).expect("Invalid JSON");
    assert_eq!(value["arena"]["kills"], 2);

    let missing = repo
        .fetch_payload(PlayerId::new(), PayloadColumn::Main)
        .await
        .expect("Failed to fetch");
    assert!(missing.is_none());

    pg.close().await;
}

// =============================================================================
// Store Tests (both services)
// =============================================================================

#[tokio::test]
#[ignore = "requires live Dragonfly and PostgreSQL instances"]
async fn store_save_then_load_from_both_tiers() {
    let store = setup_store().await;
    let id = PlayerId::new();

    let loaded = store.load(id, Some("integration")).await;
    assert_eq!(loaded.source, LoadSource::Fresh);
    let mut stats = loaded.into_entity();
    stats.add_kill("it arena");
    stats.add_win("it arena");

    assert_eq!(
        store.save(&mut stats).await,
        SaveOutcome::Saved {
            cache_written: true,
            database_written: true
        }
    );

    let cached = store.load(id, None).await;
    assert_eq!(cached.source, LoadSource::Cache);
    assert_eq!(cached.entity.games(), stats.games());

    let key = arena_stats_db::store::stats_key(id);
    store
        .cache()
        .with_connection(|conn| {
            let key = key.clone();
            async move { conn.set_with_ttl(&key, "{broken", CACHE_TTL).await }
        })
        .await
        .expect("Failed to corrupt cache entry");

    let from_db = store.load(id, None).await;
    assert_eq!(from_db.source, LoadSource::Database);
    assert_eq!(from_db.entity.games(), stats.games());

    let top = store.top("it arena", Metric::Wins, 100).await;
    assert!(top.iter().any(|row| row.player_id == id && row.score == 1));

    store.close().await;
}
