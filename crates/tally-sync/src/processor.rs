//! # Sync Processor
//!
//! Reconciles the local sync queue with the server, exactly-once in effect
//! despite retries.
//!
//! ## Push Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncProcessor::process                           │
//! │                                                                         │
//! │  1. Release: PROCESSING older than stale_processing ──► FAILED          │
//! │                                                                         │
//! │  2. Claim:   UPDATE sync_queue SET status = 'PROCESSING'                │
//! │              WHERE id IN (oldest PENDING LIMIT batch_size)              │
//! │              RETURNING ...            (one statement, atomic)           │
//! │                                                                         │
//! │  3. Push:    POST sync/push { branch, register, items, last_sync_at }   │
//! │              bounded by request_timeout                                 │
//! │                   │                                                     │
//! │        ┌──────────┴───────────────────────────┐                         │
//! │        ▼ success: true                        ▼ error / timeout /       │
//! │  ┌───────────────────── ONE TX ──────────┐      success: false          │
//! │  │ conflict?  ──► CONFLICT (+ server data)│  ┌──────── ONE TX ───────┐  │
//! │  │ item error? ─► FAILED   (+ message)    │  │ every item ──► FAILED │  │
//! │  │ otherwise  ──► SYNCED   (+ server id)  │  │ retry_count += 1      │  │
//! │  │ watermark  = server_time               │  │ watermark untouched   │  │
//! │  └────────────────────────────────────────┘  └───────────────────────┘  │
//! │                                                                         │
//! │  Every queue transition also moves the owning entity's sync status.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Retry Path
//! The processor never retries inside one invocation. `retry_failed` moves
//! FAILED items under `max_retries` back to PENDING and drains the queue
//! again. The server upserts by `(entity_type, local_id)`, so resending an
//! item whose acknowledgement was lost has no extra effect.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_core::SyncQueueItem;
use tally_db::{ConflictDetails, Database, MetadataRepository, QueueRepository};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PushItem, PushRequest, PushResponse};
use crate::transport::SyncTransport;

// =============================================================================
// Settings
// =============================================================================

/// The slice of [`SyncConfig`] the processor needs.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub branch_id: String,
    pub register_id: String,
    pub batch_size: u32,
    pub max_retries: i64,
    pub request_timeout: Duration,
    pub stale_processing: Duration,
    pub synced_retention_days: i64,
}

impl ProcessorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        ProcessorSettings {
            branch_id: config.branch_id().to_string(),
            register_id: config.register_id().to_string(),
            batch_size: config.sync.batch_size,
            max_retries: config.sync.max_retries,
            request_timeout: config.request_timeout(),
            stale_processing: config.stale_processing(),
            synced_retention_days: config.sync.synced_retention_days,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Outcome of one or more push cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Items moved to PROCESSING.
    pub claimed: usize,
    pub synced: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Stale PROCESSING items released before claiming.
    pub released: u64,
    /// FAILED items put back in line by the retry path.
    pub requeued: u64,
    /// Server time of the last accepted push.
    pub server_time: Option<DateTime<Utc>>,
    /// Request-level failure of the last push, if any.
    pub error: Option<String>,
}

impl SyncReport {
    /// Nothing was waiting.
    pub fn is_noop(&self) -> bool {
        self.claimed == 0
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn absorb(&mut self, other: SyncReport) {
        self.claimed += other.claimed;
        self.synced += other.synced;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.released += other.released;
        self.requeued += other.requeued;
        if other.server_time.is_some() {
            self.server_time = other.server_time;
        }
        self.error = other.error;
    }
}

// =============================================================================
// Sync Processor
// =============================================================================

#[derive(Clone)]
pub struct SyncProcessor {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    settings: ProcessorSettings,
}

impl SyncProcessor {
    pub fn new(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        settings: ProcessorSettings,
    ) -> Self {
        SyncProcessor {
            db,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Runs one push cycle over at most `batch_size` PENDING items.
    ///
    /// Transport failures are recorded on the items and reported in
    /// [`SyncReport::error`]. Only local store failures are returned as
    /// `Err`.
    pub async fn process(&self) -> SyncResult<SyncReport> {
        let mut report = SyncReport {
            released: self.release_stale().await?,
            ..Default::default()
        };

        let last_sync_at = self.db.metadata().last_sync_at().await?;
        let claimed = self.db.queue().claim_pending(self.settings.batch_size).await?;
        if claimed.is_empty() {
            debug!("No pending queue items");
            return Ok(report);
        }
        report.claimed = claimed.len();

        let mut batch = Vec::with_capacity(claimed.len());
        let mut push_items = Vec::with_capacity(claimed.len());
        let mut undecodable = Vec::new();
        for item in claimed {
            match PushItem::from_queue_item(&item) {
                Ok(push_item) => {
                    push_items.push(push_item);
                    batch.push(item);
                }
                Err(e) => undecodable.push((item, e.to_string())),
            }
        }

        if !undecodable.is_empty() {
            let mut tx = self.db.begin().await?;
            for (item, reason) in &undecodable {
                warn!(queue_id = %item.id, error = %reason, "Queue payload cannot be sent");
                if QueueRepository::mark_failed(&mut tx, item, reason).await? {
                    report.failed += 1;
                }
            }
            tx.commit().await?;
        }

        if batch.is_empty() {
            return Ok(report);
        }

        let request = PushRequest {
            branch_id: self.settings.branch_id.clone(),
            register_id: self.settings.register_id.clone(),
            items: push_items,
            last_sync_at,
        };

        info!(count = batch.len(), "Pushing sync batch");

        match self.push(&request).await {
            Ok(response) => self.apply_response(&batch, &response, &mut report).await?,
            Err(e) => {
                warn!(count = batch.len(), error = %e, "Push failed, batch marked FAILED");
                let message = e.to_string();
                let mut tx = self.db.begin().await?;
                let failed = QueueRepository::mark_batch_failed(&mut tx, &batch, &message).await?;
                tx.commit().await?;
                report.failed += failed as usize;
                report.error = Some(message);
            }
        }

        Ok(report)
    }

    /// Repeats [`process`](Self::process) until nothing is PENDING or a push
    /// fails.
    pub async fn drain(&self) -> SyncResult<SyncReport> {
        let mut total = SyncReport::default();
        loop {
            let report = self.process().await?;
            let done = report.is_noop() || !report.is_success();
            total.absorb(report);
            if done {
                break;
            }
        }
        Ok(total)
    }

    /// The retry path: FAILED items under `max_retries` go back to PENDING,
    /// then the queue is drained.
    pub async fn retry_failed(&self) -> SyncResult<SyncReport> {
        let requeued = self.db.queue().requeue_failed(self.settings.max_retries).await?;
        if requeued > 0 {
            info!(count = requeued, "Requeued failed items");
        }

        let mut report = self.drain().await?;
        report.requeued += requeued;
        Ok(report)
    }

    /// Deletes SYNCED queue rows older than the retention window.
    pub async fn cleanup_synced(&self) -> SyncResult<u64> {
        let cutoff = ChronoDuration::try_days(self.settings.synced_retention_days)
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.db.queue().cleanup_synced(cutoff).await?;
        if deleted > 0 {
            info!(count = deleted, "Removed synced queue rows");
        }
        Ok(deleted)
    }

    /// Fails PROCESSING items left behind by a crashed or cancelled push.
    pub async fn release_stale(&self) -> SyncResult<u64> {
        // An age beyond chrono's range releases nothing.
        let claimed_before = ChronoDuration::from_std(self.settings.stale_processing)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.db.queue().release_stale_processing(claimed_before).await?)
    }

    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        let timeout = self.settings.request_timeout;
        let response = tokio::time::timeout(timeout, self.transport.push(request))
            .await
            .map_err(|_| SyncError::Timeout(timeout.as_secs()))??;

        if !response.success {
            return Err(SyncError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "push not accepted".to_string()),
            ));
        }
        Ok(response)
    }

    async fn apply_response(
        &self,
        batch: &[SyncQueueItem],
        response: &PushResponse,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let mut tx = self.db.begin().await?;

        for item in batch {
            if let Some(conflict) = response.conflict_for(item.entity_type, &item.local_id) {
                let server_data = conflict.server_data.as_ref().map(|v| v.to_string());
                let details = ConflictDetails {
                    conflict_type: &conflict.conflict_type,
                    suggested_resolution: conflict.suggested_resolution,
                    server_data: server_data.as_deref(),
                };
                if QueueRepository::mark_conflict(&mut tx, item, details).await? {
                    warn!(
                        entity_type = %item.entity_type,
                        local_id = %item.local_id,
                        conflict_type = %conflict.conflict_type,
                        "Server reported conflict"
                    );
                    report.conflicts += 1;
                }
            } else if let Some(error) = response.error_for(item.entity_type, &item.local_id) {
                if QueueRepository::mark_failed(&mut tx, item, &error.message).await? {
                    warn!(
                        entity_type = %item.entity_type,
                        local_id = %item.local_id,
                        error = %error.message,
                        "Server rejected item"
                    );
                    report.failed += 1;
                }
            } else {
                let server_id = response.server_id_for(item.entity_type, &item.local_id);
                if QueueRepository::mark_synced(&mut tx, item, response.server_time, server_id)
                    .await?
                {
                    report.synced += 1;
                }
            }
        }

        MetadataRepository::set_last_sync_at(&mut tx, response.server_time).await?;
        tx.commit().await?;

        report.server_time = Some(response.server_time);
        info!(
            synced = report.synced,
            conflicts = report.conflicts,
            failed = report.failed,
            server_time = %response.server_time,
            "Push acknowledged"
        );
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
