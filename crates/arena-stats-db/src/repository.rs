//! Relational persistence of player payloads.
//!
//! One table, one row per player:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS player_stats (
//!     identity CHAR(36) PRIMARY KEY,
//!     stats    JSONB    NOT NULL,
//!     main     JSONB    NOT NULL
//! );
//! ```
//!
//! The stat map and the main profile live in separate columns so that saving
//! one never clobbers the other. A row created by one side gets `'{}'` in the
//! other column.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time. All values are bound
//! as parameters.

use arena_stats_types::PlayerId;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::DbError;

/// Which payload column of `player_stats` an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadColumn {
    /// The per-game stat map.
    Stats,
    /// The main profile.
    Main,
}

impl PayloadColumn {
    /// Column name in `player_stats`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Main => "main",
        }
    }
}

/// Durable storage for player payloads.
#[async_trait]
pub trait StatRepository: Send + Sync + 'static {
    /// Create the `player_stats` table if it does not exist.
    async fn ensure_schema(&self) -> Result<(), DbError>;

    /// Drop the `player_stats` table and every row in it.
    async fn drop_schema(&self) -> Result<(), DbError>;

    /// Read one payload column for a player, `None` if there is no row.
    async fn fetch_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
    ) -> Result<Option<String>, DbError>;

    /// Insert the row if absent, otherwise overwrite only `column`.
    async fn upsert_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
        payload: &str,
    ) -> Result<(), DbError>;

    /// Release every connection. Later calls fail.
    async fn close(&self);
}

/// [`StatRepository`] over a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PgStatRepository {
    pool: PgPool,
}

impl PgStatRepository {
    /// Create a repository bound to a connection pool.
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatRepository for PgStatRepository {
    async fn ensure_schema(&self) -> Result<(), DbError> {
        sqlx::query(
            r"CREATE TABLE IF NOT EXISTS player_stats (
                identity CHAR(36) PRIMARY KEY,
                stats    JSONB    NOT NULL,
                main     JSONB    NOT NULL
              )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drop_schema(&self) -> Result<(), DbError> {
        sqlx::query("DROP TABLE IF EXISTS player_stats")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
    ) -> Result<Option<String>, DbError> {
        let sql = match column {
            PayloadColumn::Stats => "SELECT stats::text FROM player_stats WHERE identity = $1",
            PayloadColumn::Main => "SELECT main::text FROM player_stats WHERE identity = $1",
        };

        let payload = sqlx::query_scalar::<_, String>(sql)
            .bind(player_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        Ok(payload)
    }

    async fn upsert_payload(
        &self,
        player_id: PlayerId,
        column: PayloadColumn,
        payload: &str,
    ) -> Result<(), DbError> {
        let sql = match column {
            PayloadColumn::Stats => {
                r"INSERT INTO player_stats (identity, stats, main)
                  VALUES ($1, $2::jsonb, '{}'::jsonb)
                  ON CONFLICT (identity) DO UPDATE SET stats = EXCLUDED.stats"
            }
            PayloadColumn::Main => {
                r"INSERT INTO player_stats (identity, stats, main)
                  VALUES ($1, '{}'::jsonb, $2::jsonb)
                  ON CONFLICT (identity) DO UPDATE SET main = EXCLUDED.main"
            }
        };

        sqlx::query(sql)
            .bind(player_id.to_string())
            .bind(payload)
            .execute(&self.pool)
            .await?;

        tracing::debug!(%player_id, column = column.name(), "Upserted player payload");
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names_match_schema() {
        assert_eq!(PayloadColumn::Stats.name(), "stats");
        assert_eq!(PayloadColumn::Main.name(), "main");
    }
}
