//! End-to-end tests of [`StatService`] against live Docker services.
//!
//! Uses the shipped `arena-stats.example.yaml`, so the local Dragonfly and
//! `PostgreSQL` must match it (or be redirected with `DATABASE_URL` /
//! `CACHE_HOST`). Run with:
//!
//! ```bash
//! cargo test -p arena-stats-service -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::path::Path;

use arena_stats_db::LoadSource;
use arena_stats_service::{StatService, StatsConfig};
use arena_stats_types::{Metric, PlayerId};

fn config() -> StatsConfig {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("arena-stats.example.yaml");
    StatsConfig::from_file(&path).expect("Failed to load sample config")
}

#[tokio::test]
#[ignore = "requires live Dragonfly and PostgreSQL instances"]
async fn player_session_round_trip() {
    let service = StatService::connect(&config())
        .await
        .expect("Failed to connect -- is Docker running?");
    let id = PlayerId::new();

    {
        let stats = service.get(id, Some("live-test")).await;
        let mut stats = stats.lock().await;
        stats.add_kills("live arena", 3);
        stats.add_win("live arena");
    }
    service.remove(id);
    service.drain().await;

    let reloaded = service.store().load(id, None).await;
    assert_eq!(reloaded.source, LoadSource::Cache);
    assert_eq!(
        reloaded.entity.game("live arena").map(|s| s.kills()),
        Some(3)
    );

    let top = service.leaderboard("live arena", Metric::Kills, 100).await;
    assert!(top.iter().any(|row| row.player_id == id));

    service.shutdown().await;
}
