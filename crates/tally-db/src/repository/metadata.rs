//! # Sync Metadata Repository
//!
//! Key/value rows in `sync_metadata`. The only well-known key is the sync
//! watermark, shared by push and pull.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Key of the last successful sync watermark.
pub const LAST_SYNC_AT: &str = "last_sync_at";

#[derive(Debug, Clone)]
pub struct MetadataRepository {
    pool: SqlitePool,
}

impl MetadataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        MetadataRepository { pool }
    }

    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value: Option<Option<String>> =
            sqlx::query_scalar("SELECT value FROM sync_metadata WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.flatten())
    }

    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        Self::set_in(&mut conn, key, value).await
    }

    /// Upserts a key inside the caller's transaction.
    pub async fn set_in(conn: &mut SqliteConnection, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_metadata (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Returns the sync watermark, `None` before the first successful sync.
    pub async fn last_sync_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        match self.get(LAST_SYNC_AT).await? {
            Some(raw) => parse_watermark(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Stores a server-issued time as the new sync watermark.
    pub async fn set_last_sync_at(
        conn: &mut SqliteConnection,
        server_time: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(watermark = %server_time, "Advancing sync watermark");
        Self::set_in(conn, LAST_SYNC_AT, &server_time.to_rfc3339()).await
    }
}

fn parse_watermark(raw: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DbError::InvalidData(format!("{}='{}': {}", LAST_SYNC_AT, raw, e)))
}
