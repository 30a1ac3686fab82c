//! Bounded per-game leaderboards on cache sorted sets.
//!
//! Each (game, metric) pair is one sorted set at `lb:<game>:<metric>`,
//! member = player id, score = counter value. Sets are trimmed after every
//! update so only the [`LEADERBOARD_CAPACITY`] highest scores survive.

use arena_stats_types::{LbRow, Metric, PlayerId};

use crate::cache::CacheConnection;
use crate::error::DbError;

/// Entries kept per leaderboard.
pub const LEADERBOARD_CAPACITY: usize = 100;

/// `ZREMRANGEBYRANK` window that drops everything below the top
/// [`LEADERBOARD_CAPACITY`] (ranks are ascending, so `0 .. -(cap + 1)`).
const TRIM_START: i64 = 0;
const TRIM_STOP: i64 = -101;

/// Cache key for the `metric` leaderboard of `game`. Spaces in the game
/// name become underscores.
pub fn leaderboard_key(game: &str, metric: Metric) -> String {
    format!("lb:{}:{}", game.replace(' ', "_"), metric.key_name())
}

/// Record `score` for `member` and trim the set back to capacity.
///
/// The update first tries `ZADD XX CH`, which only changes a member that is
/// already ranked with a different score. If that reports no change, a
/// plain `ZADD` captures first-time entries (and is a harmless no-op for an
/// unchanged score). A member is never present twice.
///
/// # Errors
///
/// Returns the cache error of the first failing command.
pub async fn record_score<C: CacheConnection>(
    conn: &C,
    game: &str,
    metric: Metric,
    score: u32,
    member: &str,
) -> Result<(), DbError> {
    let key = leaderboard_key(game, metric);
    let score = f64::from(score);

    let changed = conn.zadd_if_exists(&key, member, score).await?;
    if changed == 0 {
        conn.zadd(&key, member, score).await?;
    }
    conn.zremrangebyrank(&key, TRIM_START, TRIM_STOP).await?;
    Ok(())
}

/// The `n` highest entries of the leaderboard at `key`, descending.
///
/// Read-only. Members that are not valid player ids are skipped.
///
/// # Errors
///
/// Returns the cache error if the range query fails.
pub async fn top<C: CacheConnection>(conn: &C, key: &str, n: usize) -> Result<Vec<LbRow>, DbError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let stop = i64::try_from(n).unwrap_or(i64::MAX).saturating_sub(1);
    let entries = conn.zrevrange_with_scores(key, 0, stop).await?;

    Ok(entries
        .into_iter()
        .filter_map(|(member, score)| match member.parse::<PlayerId>() {
            Ok(player_id) => Some(LbRow {
                player_id,
                score: score_to_u64(score),
            }),
            Err(e) => {
                tracing::warn!(
                    key,
                    member = member.as_str(),
                    error = %e,
                    "Skipping non-player leaderboard member"
                );
                None
            }
        })
        .collect())
}

/// Scores are written from `u32` counters, so they are whole and in range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn score_to_u64(score: f64) -> u64 {
    if score.is_finite() && score > 0.0 {
        score.round() as u64
    } else {
        0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::{CacheConnector, CachePool};
    use crate::memory::MemoryCache;

    #[test]
    fn key_replaces_spaces() {
        assert_eq!(leaderboard_key("sky wars", Metric::Kills), "lb:sky_wars:kills");
        assert_eq!(leaderboard_key("arena", Metric::WinStreak), "lb:arena:streak");
        assert_eq!(leaderboard_key("arena", Metric::RoundsPlayed), "lb:arena:rounds");
    }

    #[test]
    fn trim_window_matches_capacity() {
        let capacity = i64::try_from(LEADERBOARD_CAPACITY).unwrap();
        assert_eq!(TRIM_STOP, -(capacity + 1));
    }

    #[tokio::test]
    async fn record_then_update_keeps_single_entry() {
        let cache = MemoryCache::new();
        let conn = cache.connect().await.unwrap().lease();
        let player = PlayerId::new().to_string();
        let key = leaderboard_key("arena", Metric::Kills);

        record_score(&conn, "arena", Metric::Kills, 3, &player).await.unwrap();
        record_score(&conn, "arena", Metric::Kills, 3, &player).await.unwrap();
        record_score(&conn, "arena", Metric::Kills, 7, &player).await.unwrap();

        assert_eq!(cache.zcard(&key), 1);
        assert_eq!(cache.zscore(&key, &player), Some(7.0));
    }

    #[tokio::test]
    async fn board_is_bounded_to_the_highest_scores() {
        let cache = MemoryCache::new();
        let conn = cache.connect().await.unwrap().lease();
        let key = leaderboard_key("arena", Metric::Wins);

        for score in 0..150_u32 {
            let player = PlayerId::new().to_string();
            record_score(&conn, "arena", Metric::Wins, score, &player)
                .await
                .unwrap();
        }

        assert_eq!(cache.zcard(&key), LEADERBOARD_CAPACITY);
        let rows = top(&conn, &key, 200).await.unwrap();
        assert_eq!(rows.len(), LEADERBOARD_CAPACITY);
        assert_eq!(rows.first().map(|r| r.score), Some(149));
        assert_eq!(rows.last().map(|r| r.score), Some(50));
        assert!(rows.iter().zip(rows.iter().skip(1)).all(|(a, b)| a.score >= b.score));
    }

    #[tokio::test]
    async fn top_zero_is_empty_and_skips_foreign_members() {
        let cache = MemoryCache::new();
        let conn = cache.connect().await.unwrap().lease();
        let key = leaderboard_key("arena", Metric::Kills);
        conn.zadd(&key, "not-a-player", 10.0).await.unwrap();
        let player = PlayerId::new();
        conn.zadd(&key, &player.to_string(), 4.0).await.unwrap();

        assert!(top(&conn, &key, 0).await.unwrap().is_empty());
        let rows = top(&conn, &key, 10).await.unwrap();
        assert_eq!(rows, vec![LbRow { player_id: player, score: 4 }]);
    }
}
