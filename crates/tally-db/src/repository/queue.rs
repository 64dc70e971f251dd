//! # Sync Queue Repository
//!
//! The queue of pending mutations and the status propagation that keeps each
//! aggregate's sync status in lockstep with its queue item.
//!
//! ## Status Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  enqueue ──► PENDING ──claim_pending──► PROCESSING                     │
//! │                ▲                          │   │   │                     │
//! │                │                 mark_synced  │   mark_conflict         │
//! │                │                          ▼   │   ▼                     │
//! │                │                     SYNCED   │  CONFLICT               │
//! │                │                          ▲   │   │                     │
//! │                │                          │   │   └─ record_resolution ─┘
//! │                │                          │   ▼                          │
//! │          requeue_failed ◄───────────── FAILED ◄── release_stale_processing│
//! │          (retry_count < max)          mark_failed / mark_batch_failed   │
//! │                                                                         │
//! │  Every transition that changes QueueStatus::entity_sync_status() also  │
//! │  updates the aggregate row, on the same connection.                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Claim Atomicity
//! `claim_pending` is one `UPDATE ... WHERE id IN (SELECT ...) RETURNING *`
//! statement. Two overlapping sync triggers can never receive the same item.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tally_core::{
    ConflictResolution, EntityType, QueueCounts, QueueStatus, SyncOperation, SyncPayload,
    SyncQueueItem,
};

const ITEM_COLUMNS: &str = r#"
    id, entity_type, local_id, operation, payload, status, retry_count, last_error,
    conflict_type, suggested_resolution, conflict_resolution, server_data,
    local_created_at, attempted_at, synced_at
"#;

/// Error stored on items found PROCESSING after a crash or cancelled push.
pub const INTERRUPTED_ERROR: &str = "interrupted: push did not complete";

/// Conflict details reported by the server for one item.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetails<'a> {
    pub conflict_type: &'a str,
    pub suggested_resolution: Option<ConflictResolution>,
    /// Server's version of the entity, as JSON.
    pub server_data: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        QueueRepository { pool }
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Adds one queue item for one aggregate, inside the caller's transaction.
    pub async fn enqueue(
        conn: &mut SqliteConnection,
        payload: &SyncPayload,
        operation: SyncOperation,
    ) -> DbResult<SyncQueueItem> {
        let item = SyncQueueItem {
            id: Uuid::new_v4().to_string(),
            entity_type: payload.entity_type(),
            local_id: payload.local_id().to_string(),
            operation,
            payload: payload.encode()?,
            status: QueueStatus::Pending,
            retry_count: 0,
            last_error: None,
            conflict_type: None,
            suggested_resolution: None,
            conflict_resolution: None,
            server_data: None,
            local_created_at: Utc::now(),
            attempted_at: None,
            synced_at: None,
        };

        debug!(
            entity_type = %item.entity_type,
            local_id = %item.local_id,
            operation = %item.operation,
            "Queuing for sync"
        );

        sqlx::query(
            r#"
            INSERT INTO sync_queue (
                id, entity_type, local_id, operation, payload, status, retry_count,
                local_created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&item.id)
        .bind(item.entity_type)
        .bind(&item.local_id)
        .bind(item.operation)
        .bind(&item.payload)
        .bind(item.status)
        .bind(item.retry_count)
        .bind(item.local_created_at)
        .execute(&mut *conn)
        .await?;

        // A follow-up mutation puts an already synced aggregate back in line.
        if operation != SyncOperation::Insert {
            propagate(
                conn,
                item.entity_type,
                &item.local_id,
                QueueStatus::Pending,
                None,
                None,
                None,
            )
            .await?;
        }

        Ok(item)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get(&self, id: &str) -> DbResult<Option<SyncQueueItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<SyncQueueItem>> {
        let item = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {} FROM sync_queue WHERE id = ?1",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    /// Items in one status, oldest first.
    pub async fn list_by_status(
        &self,
        status: QueueStatus,
        limit: u32,
    ) -> DbResult<Vec<SyncQueueItem>> {
        let items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {} FROM sync_queue WHERE status = ?1 \
             ORDER BY local_created_at ASC, rowid ASC LIMIT ?2",
            ITEM_COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Every queue item ever created for one aggregate, oldest first.
    pub async fn list_for_entity(
        &self,
        entity_type: EntityType,
        local_id: &str,
    ) -> DbResult<Vec<SyncQueueItem>> {
        let items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {} FROM sync_queue WHERE entity_type = ?1 AND local_id = ?2 \
             ORDER BY local_created_at ASC, rowid ASC",
            ITEM_COLUMNS
        ))
        .bind(entity_type)
        .bind(local_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// The aggregate's live (not yet SYNCED) queue item, if any.
    pub async fn pending_for_entity(
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        local_id: &str,
    ) -> DbResult<Option<SyncQueueItem>> {
        let item = sqlx::query_as::<_, SyncQueueItem>(&format!(
            "SELECT {} FROM sync_queue \
             WHERE entity_type = ?1 AND local_id = ?2 AND status != 'SYNCED' \
             ORDER BY local_created_at DESC, rowid DESC LIMIT 1",
            ITEM_COLUMNS
        ))
        .bind(entity_type)
        .bind(local_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    pub async fn count_by_status(&self) -> DbResult<QueueCounts> {
        let rows: Vec<(QueueStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            counts.set(status, count);
        }
        Ok(counts)
    }

    /// FAILED items split into `(retryable, exhausted)` by `max_retries`.
    pub async fn count_failed(&self, max_retries: i64) -> DbResult<(i64, i64)> {
        let (retryable, exhausted): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN retry_count < ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN retry_count >= ?1 THEN 1 ELSE 0 END), 0)
            FROM sync_queue
            WHERE status = 'FAILED'
            "#,
        )
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await?;

        Ok((retryable, exhausted))
    }

    /// Creation time of the oldest item the server has not acknowledged.
    pub async fn oldest_pending_at(&self) -> DbResult<Option<DateTime<Utc>>> {
        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MIN(local_created_at) FROM sync_queue WHERE status IN ('PENDING', 'FAILED')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(oldest)
    }

    // =========================================================================
    // Claim
    // =========================================================================

    /// Atomically moves up to `limit` PENDING items to PROCESSING and returns
    /// them, oldest first.
    pub async fn claim_pending(&self, limit: u32) -> DbResult<Vec<SyncQueueItem>> {
        let now = Utc::now();

        let mut items = sqlx::query_as::<_, SyncQueueItem>(&format!(
            r#"
            UPDATE sync_queue
            SET status = 'PROCESSING', attempted_at = ?1
            WHERE id IN (
                SELECT id FROM sync_queue
                WHERE status = 'PENDING'
                ORDER BY local_created_at ASC, rowid ASC
                LIMIT ?2
            )
            RETURNING {}
            "#,
            ITEM_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // RETURNING order is unspecified
        items.sort_by(|a, b| a.local_created_at.cmp(&b.local_created_at));

        if !items.is_empty() {
            debug!(count = items.len(), "Claimed pending queue items");
        }
        Ok(items)
    }

    // =========================================================================
    // Outcome Transitions (caller's transaction)
    // =========================================================================

    /// PROCESSING → SYNCED, stamping the server time on item and aggregate.
    ///
    /// Returns false if the item was no longer PROCESSING.
    pub async fn mark_synced(
        conn: &mut SqliteConnection,
        item: &SyncQueueItem,
        synced_at: DateTime<Utc>,
        server_id: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'SYNCED', synced_at = ?2, last_error = NULL
            WHERE id = ?1 AND status = 'PROCESSING'
            "#,
        )
        .bind(&item.id)
        .bind(synced_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            warn!(queue_id = %item.id, "Item no longer PROCESSING, not marking synced");
            return Ok(false);
        }

        propagate(
            conn,
            item.entity_type,
            &item.local_id,
            QueueStatus::Synced,
            None,
            Some(synced_at),
            server_id,
        )
        .await?;
        Ok(true)
    }

    /// PROCESSING → CONFLICT with the server's details. Never resolves.
    pub async fn mark_conflict(
        conn: &mut SqliteConnection,
        item: &SyncQueueItem,
        details: ConflictDetails<'_>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'CONFLICT',
                conflict_type = ?2,
                suggested_resolution = ?3,
                server_data = ?4,
                last_error = NULL
            WHERE id = ?1 AND status = 'PROCESSING'
            "#,
        )
        .bind(&item.id)
        .bind(details.conflict_type)
        .bind(details.suggested_resolution)
        .bind(details.server_data)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            warn!(queue_id = %item.id, "Item no longer PROCESSING, not marking conflict");
            return Ok(false);
        }

        let message = format!("conflict: {}", details.conflict_type);
        propagate(
            conn,
            item.entity_type,
            &item.local_id,
            QueueStatus::Conflict,
            Some(&message),
            None,
            None,
        )
        .await?;
        Ok(true)
    }

    /// PROCESSING → FAILED for one item, incrementing its retry count.
    pub async fn mark_failed(
        conn: &mut SqliteConnection,
        item: &SyncQueueItem,
        error: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'FAILED', retry_count = retry_count + 1, last_error = ?2
            WHERE id = ?1 AND status = 'PROCESSING'
            "#,
        )
        .bind(&item.id)
        .bind(error)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        propagate(
            conn,
            item.entity_type,
            &item.local_id,
            QueueStatus::Failed,
            Some(error),
            None,
            None,
        )
        .await?;
        Ok(true)
    }

    /// Request-level failure: every item of the batch becomes FAILED.
    pub async fn mark_batch_failed(
        conn: &mut SqliteConnection,
        items: &[SyncQueueItem],
        error: &str,
    ) -> DbResult<u64> {
        let mut failed = 0;
        for item in items {
            if Self::mark_failed(conn, item, error).await? {
                failed += 1;
            }
        }
        Ok(failed)
    }

    // =========================================================================
    // Retry & Recovery
    // =========================================================================

    /// FAILED → PENDING for items under `max_retries`. The retry path.
    pub async fn requeue_failed(&self, max_retries: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE sync_queue SET status = 'PENDING' WHERE status = 'FAILED' AND retry_count < ?1",
        )
        .bind(max_retries)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// PROCESSING items claimed before `claimed_before` are treated as an
    /// interrupted push: FAILED with an incremented retry count.
    pub async fn release_stale_processing(&self, claimed_before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'FAILED', retry_count = retry_count + 1, last_error = ?2
            WHERE status = 'PROCESSING'
              AND (attempted_at IS NULL OR attempted_at < ?1)
            "#,
        )
        .bind(claimed_before)
        .bind(INTERRUPTED_ERROR)
        .execute(&self.pool)
        .await?;

        let released = result.rows_affected();
        if released > 0 {
            warn!(count = released, "Released stale PROCESSING items");
        }
        Ok(released)
    }

    /// Deletes SYNCED rows synced before `synced_before`.
    pub async fn cleanup_synced(&self, synced_before: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM sync_queue WHERE status = 'SYNCED' AND synced_at < ?1",
        )
        .bind(synced_before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Payload & Resolution
    // =========================================================================

    /// Swaps the snapshot of a not-yet-sent item for a newer one.
    ///
    /// Only PENDING and FAILED items can change; anything in flight or
    /// awaiting a decision is left alone.
    pub async fn replace_payload(
        conn: &mut SqliteConnection,
        id: &str,
        payload: &SyncPayload,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET payload = ?2
            WHERE id = ?1 AND status IN ('PENDING', 'FAILED')
            "#,
        )
        .bind(id)
        .bind(payload.encode()?)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Replaceable queue item", id));
        }
        Ok(())
    }

    /// CONFLICT → SYNCED with the chosen resolution recorded.
    pub async fn record_resolution(
        conn: &mut SqliteConnection,
        item: &SyncQueueItem,
        resolution: ConflictResolution,
        resolved_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_queue
            SET status = 'SYNCED', conflict_resolution = ?2, synced_at = ?3
            WHERE id = ?1 AND status = 'CONFLICT'
            "#,
        )
        .bind(&item.id)
        .bind(resolution)
        .bind(resolved_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Conflicting queue item", &item.id));
        }

        propagate(
            conn,
            item.entity_type,
            &item.local_id,
            QueueStatus::Synced,
            None,
            Some(resolved_at),
            None,
        )
        .await
    }
}

// =============================================================================
// Entity Propagation
// =============================================================================

fn entity_table(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Sale => "pending_sales",
        EntityType::StockMovement => "pending_stock_movements",
        EntityType::RegisterOperation => "pending_register_operations",
    }
}

/// Writes the projected sync status of a queue transition onto the aggregate.
async fn propagate(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    local_id: &str,
    queue_status: QueueStatus,
    error: Option<&str>,
    synced_at: Option<DateTime<Utc>>,
    server_id: Option<&str>,
) -> DbResult<()> {
    let result = sqlx::query(&format!(
        r#"
        UPDATE {}
        SET sync_status = ?2,
            sync_error = ?3,
            synced_at = COALESCE(?4, synced_at),
            server_id = COALESCE(?5, server_id)
        WHERE local_id = ?1
        "#,
        entity_table(entity_type)
    ))
    .bind(local_id)
    .bind(queue_status.entity_sync_status())
    .bind(error)
    .bind(synced_at)
    .bind(server_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        warn!(
            entity_type = %entity_type,
            local_id = %local_id,
            "Queue item has no local aggregate to update"
        );
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::register::RegisterRepository;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use tally_core::{EntitySyncStatus, PendingRegisterOperation, RegisterOperationType};

    fn register_op(local_id: &str) -> PendingRegisterOperation {
        PendingRegisterOperation {
            local_id: local_id.to_string(),
            server_id: None,
            branch_id: "b-1".to_string(),
            register_id: "r-1".to_string(),
            session_id: Some("sess-1".to_string()),
            user_id: "u-1".to_string(),
            operation_type: RegisterOperationType::CashDrop,
            amount_cents: 5000,
            declared_cash_cents: 5000,
            declared_card_cents: 0,
            declared_other_cents: 0,
            notes: None,
            sync_status: EntitySyncStatus::Pending,
            sync_error: None,
            local_created_at: Utc::now(),
            synced_at: None,
        }
    }

    async fn seed(db: &Database, local_id: &str) -> SyncQueueItem {
        let op = register_op(local_id);
        let mut tx = db.begin().await.unwrap();
        RegisterRepository::insert(&mut tx, &op).await.unwrap();
        let item = QueueRepository::enqueue(&mut tx, &op.into(), SyncOperation::Insert)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        item
    }

    async fn entity_status(db: &Database, local_id: &str) -> EntitySyncStatus {
        db.registers()
            .get(local_id)
            .await
            .unwrap()
            .unwrap()
            .sync_status
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;
        seed(&db, "op-2").await;

        let first = db.queue().claim_pending(10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|i| i.status == QueueStatus::Processing));
        assert!(first.iter().all(|i| i.attempted_at.is_some()));

        let second = db.queue().claim_pending(10).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let a = seed(&db, "op-a").await;
        seed(&db, "op-b").await;
        seed(&db, "op-c").await;

        let claimed = db.queue().claim_pending(1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, a.id);

        let counts = db.queue().count_by_status().await.unwrap();
        assert_eq!(counts.processing, 1);
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn test_synced_propagates_to_entity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;
        let claimed = db.queue().claim_pending(10).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let now = Utc::now();
        assert!(
            QueueRepository::mark_synced(&mut tx, &claimed[0], now, Some("srv-9"))
                .await
                .unwrap()
        );
        tx.commit().await.unwrap();

        let item = db.queue().get(&claimed[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Synced);
        let op = db.registers().get("op-1").await.unwrap().unwrap();
        assert_eq!(op.sync_status, EntitySyncStatus::Synced);
        assert_eq!(op.server_id.as_deref(), Some("srv-9"));
        assert!(op.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_mark_synced_requires_processing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let item = seed(&db, "op-1").await;

        let mut conn = db.pool().acquire().await.unwrap();
        assert!(
            !QueueRepository::mark_synced(&mut conn, &item, Utc::now(), None)
                .await
                .unwrap()
        );
        drop(conn);
        assert_eq!(entity_status(&db, "op-1").await, EntitySyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_conflict_then_resolution() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;
        let claimed = db.queue().claim_pending(10).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        QueueRepository::mark_conflict(
            &mut tx,
            &claimed[0],
            ConflictDetails {
                conflict_type: "AMOUNT_MISMATCH",
                suggested_resolution: Some(ConflictResolution::ServerWins),
                server_data: Some(r#"{"amount_cents":4000}"#),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let item = db.queue().get(&claimed[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Conflict);
        assert_eq!(item.conflict_type.as_deref(), Some("AMOUNT_MISMATCH"));
        assert_eq!(
            item.suggested_resolution,
            Some(ConflictResolution::ServerWins)
        );
        assert_eq!(item.conflict_resolution, None);
        assert_eq!(entity_status(&db, "op-1").await, EntitySyncStatus::Conflict);

        let mut tx = db.begin().await.unwrap();
        QueueRepository::record_resolution(
            &mut tx,
            &item,
            ConflictResolution::LocalWins,
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let item = db.queue().get(&item.id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Synced);
        assert_eq!(item.conflict_resolution, Some(ConflictResolution::LocalWins));
        assert_eq!(entity_status(&db, "op-1").await, EntitySyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_batch_failure_and_retry_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;

        for round in 1..=3 {
            let claimed = db.queue().claim_pending(10).await.unwrap();
            assert_eq!(claimed.len(), 1, "round {}", round);

            let mut tx = db.begin().await.unwrap();
            QueueRepository::mark_batch_failed(&mut tx, &claimed, "connection refused")
                .await
                .unwrap();
            tx.commit().await.unwrap();

            let item = db.queue().get(&claimed[0].id).await.unwrap().unwrap();
            assert_eq!(item.status, QueueStatus::Failed);
            assert_eq!(item.retry_count, round);
            assert_eq!(item.last_error.as_deref(), Some("connection refused"));
            assert_eq!(entity_status(&db, "op-1").await, EntitySyncStatus::Pending);

            db.queue().requeue_failed(3).await.unwrap();
        }

        // retry_count == 3 is exhausted
        assert_eq!(db.queue().requeue_failed(3).await.unwrap(), 0);
        assert_eq!(db.queue().count_failed(3).await.unwrap(), (0, 1));
        assert_eq!(db.queue().count_failed(5).await.unwrap(), (1, 0));
    }

    #[tokio::test]
    async fn test_release_stale_processing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;
        db.queue().claim_pending(10).await.unwrap();

        // Claimed just now: not stale yet
        let cutoff = Utc::now() - Duration::minutes(5);
        assert_eq!(db.queue().release_stale_processing(cutoff).await.unwrap(), 0);

        let cutoff = Utc::now() + Duration::seconds(1);
        assert_eq!(db.queue().release_stale_processing(cutoff).await.unwrap(), 1);

        let failed = db.queue().list_by_status(QueueStatus::Failed, 10).await.unwrap();
        assert_eq!(failed[0].retry_count, 1);
        assert_eq!(failed[0].last_error.as_deref(), Some(INTERRUPTED_ERROR));
    }

    #[tokio::test]
    async fn test_replace_payload_only_before_send() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let item = seed(&db, "op-1").await;

        let mut updated = register_op("op-1");
        updated.notes = Some("recounted".to_string());
        let payload = SyncPayload::from(updated);

        let mut conn = db.pool().acquire().await.unwrap();
        let live = QueueRepository::pending_for_entity(
            &mut conn,
            EntityType::RegisterOperation,
            "op-1",
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(live.id, item.id);

        QueueRepository::replace_payload(&mut conn, &item.id, &payload)
            .await
            .unwrap();
        drop(conn);

        db.queue().claim_pending(10).await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let err = QueueRepository::replace_payload(&mut conn, &item.id, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        drop(conn);

        let stored = db.queue().get(&item.id).await.unwrap().unwrap();
        let decoded = SyncPayload::decode(stored.entity_type, &stored.payload).unwrap();
        match decoded {
            SyncPayload::RegisterOperation(op) => {
                assert_eq!(op.notes.as_deref(), Some("recounted"))
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cleanup_synced() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "op-1").await;
        seed(&db, "op-2").await;
        let claimed = db.queue().claim_pending(1).await.unwrap();

        let synced_at = Utc::now() - Duration::days(10);
        let mut tx = db.begin().await.unwrap();
        QueueRepository::mark_synced(&mut tx, &claimed[0], synced_at, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let deleted = db
            .queue()
            .cleanup_synced(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let counts = db.queue().count_by_status().await.unwrap();
        assert_eq!(counts.synced, 0);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn test_oldest_pending_at() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert_eq!(db.queue().oldest_pending_at().await.unwrap(), None);

        let first = seed(&db, "op-1").await;
        seed(&db, "op-2").await;
        assert_eq!(
            db.queue().oldest_pending_at().await.unwrap(),
            Some(first.local_created_at)
        );
    }
}
