//! # Sync Status Reporter
//!
//! Read-only aggregation over the queue and the pending sales, for the UI to
//! poll. Safe to call while a push or pull is running: every figure comes
//! from a plain SELECT and nothing is written.
//!
//! ```text
//! queue         PENDING / PROCESSING / SYNCED / FAILED / CONFLICT
//! failed split  retry_count < max_retries  → "will retry automatically"
//!               retry_count ≥ max_retries  → "needs attention"
//! sales         PENDING / SYNCED / CONFLICT
//! watermark     last_sync_at, oldest unsent item
//! ```

use chrono::Utc;
use tracing::debug;

use tally_core::{EntitySyncStatus, PendingSale, QueueStatus, SyncQueueItem, SyncStatusReport};
use tally_db::Database;

use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub struct StatusReporter {
    db: Database,
    max_retries: i64,
}

impl StatusReporter {
    pub fn new(db: Database, max_retries: i64) -> Self {
        StatusReporter { db, max_retries }
    }

    pub async fn report(&self) -> SyncResult<SyncStatusReport> {
        let queue = self.db.queue();
        let counts = queue.count_by_status().await?;
        let (failed_retryable, failed_exhausted) = queue.count_failed(self.max_retries).await?;
        let oldest_pending_at = queue.oldest_pending_at().await?;
        let sales = self.db.sales().count_by_sync_status().await?;
        let last_sync_at = self.db.metadata().last_sync_at().await?;

        let report = SyncStatusReport {
            queue: counts,
            failed_retryable,
            failed_exhausted,
            sales,
            last_sync_at,
            oldest_pending_at,
            generated_at: Utc::now(),
        };

        debug!(
            outstanding = report.queue.outstanding(),
            conflicts = report.queue.conflict,
            "Sync status computed"
        );
        Ok(report)
    }

    /// Sales the server has not acknowledged yet, newest first.
    pub async fn pending_sales(&self, limit: u32) -> SyncResult<Vec<PendingSale>> {
        Ok(self
            .db
            .sales()
            .list_by_sync_status(EntitySyncStatus::Pending, limit)
            .await?)
    }

    /// Sales waiting for a conflict decision, newest first.
    pub async fn conflicted_sales(&self, limit: u32) -> SyncResult<Vec<PendingSale>> {
        Ok(self
            .db
            .sales()
            .list_by_sync_status(EntitySyncStatus::Conflict, limit)
            .await?)
    }

    /// Queue items in one status, oldest first.
    pub async fn queue_items(&self, status: QueueStatus, limit: u32) -> SyncResult<Vec<SyncQueueItem>> {
        Ok(self.db.queue().list_by_status(status, limit).await?)
    }
}
