//! # Conflict Resolution
//!
//! Surfaces CONFLICT queue items and records the decision a person makes
//! about them. The engine never applies the server's suggested resolution
//! on its own.
//!
//! ## Resolve Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ResolutionSubmission { queue_id, resolution, merged_data? }            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  item must be CONFLICT ─────────────────► NotInConflict                 │
//! │  MERGED needs merged_data ──────────────► MergedDataRequired            │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  POST sync/resolve (bounded by request_timeout)                         │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌──────────────────── ONE TRANSACTION ─────────────────────┐           │
//! │  │ handler.apply(local payload, server data, decision)     │           │
//! │  │ CONFLICT ──► SYNCED, conflict_resolution = decision     │           │
//! │  │ owning entity ──► SYNCED                                 │           │
//! │  └──────────────────────────────────────────────────────────┘           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! What a MERGED (or any) decision means for local rows is up to the
//! [`ConflictResolutionHandler`]. The default one only logs.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tally_core::{ConflictResolution, QueueStatus, SyncPayload, SyncQueueItem};
use tally_db::{Database, DbError, QueueRepository};

use crate::error::{SyncError, SyncResult};
use crate::protocol::ResolutionSubmission;
use crate::transport::SyncTransport;

// =============================================================================
// Views
// =============================================================================

/// A CONFLICT item with both sides decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictView {
    pub item: SyncQueueItem,
    pub local: SyncPayload,
    pub server_data: Option<Value>,
}

impl ConflictView {
    fn from_item(item: SyncQueueItem) -> SyncResult<Self> {
        let local = SyncPayload::decode(item.entity_type, &item.payload)?;
        let server_data = item
            .server_data
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;
        Ok(ConflictView {
            item,
            local,
            server_data,
        })
    }

    pub fn conflict_type(&self) -> Option<&str> {
        self.item.conflict_type.as_deref()
    }

    pub fn suggested_resolution(&self) -> Option<ConflictResolution> {
        self.item.suggested_resolution
    }
}

/// A decision accepted by the server, handed to the handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub conflict: ConflictView,
    pub resolution: ConflictResolution,
    pub merged_data: Option<Value>,
}

// =============================================================================
// Handler Trait
// =============================================================================

/// Applies an accepted decision to local state.
///
/// Runs inside the transaction that marks the item resolved; an error
/// leaves the item in CONFLICT.
#[async_trait]
pub trait ConflictResolutionHandler: Send + Sync {
    async fn apply(
        &self,
        conn: &mut SqliteConnection,
        resolved: &ResolvedConflict,
    ) -> SyncResult<()>;
}

/// Records the decision in the log and leaves local rows as they are.
pub struct LoggingResolutionHandler;

#[async_trait]
impl ConflictResolutionHandler for LoggingResolutionHandler {
    async fn apply(
        &self,
        _conn: &mut SqliteConnection,
        resolved: &ResolvedConflict,
    ) -> SyncResult<()> {
        info!(
            queue_id = %resolved.conflict.item.id,
            entity_type = %resolved.conflict.item.entity_type,
            local_id = %resolved.conflict.item.local_id,
            resolution = %resolved.resolution,
            "Conflict resolved"
        );
        Ok(())
    }
}

// =============================================================================
// Conflict Service
// =============================================================================

#[derive(Clone)]
pub struct ConflictService {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    handler: Arc<dyn ConflictResolutionHandler>,
    request_timeout: Duration,
}

impl ConflictService {
    pub fn new(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self::with_handler(db, transport, request_timeout, Arc::new(LoggingResolutionHandler))
    }

    pub fn with_handler(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        request_timeout: Duration,
        handler: Arc<dyn ConflictResolutionHandler>,
    ) -> Self {
        ConflictService {
            db,
            transport,
            handler,
            request_timeout,
        }
    }

    /// Every item awaiting a decision, oldest first.
    pub async fn list_conflicts(&self) -> SyncResult<Vec<ConflictView>> {
        let items = self
            .db
            .queue()
            .list_by_status(QueueStatus::Conflict, u32::MAX)
            .await?;
        items.into_iter().map(ConflictView::from_item).collect()
    }

    /// Submits a decision and, once the server accepts it, records it.
    pub async fn resolve(&self, submission: ResolutionSubmission) -> SyncResult<SyncQueueItem> {
        let item = self
            .db
            .queue()
            .get(&submission.queue_id)
            .await?
            .ok_or_else(|| DbError::not_found("Queue item", &submission.queue_id))?;

        if item.status != QueueStatus::Conflict {
            return Err(SyncError::NotInConflict {
                queue_id: item.id,
            });
        }
        if submission.resolution == ConflictResolution::Merged && submission.merged_data.is_none()
        {
            return Err(SyncError::MergedDataRequired {
                queue_id: item.id,
            });
        }

        let conflict = ConflictView::from_item(item)?;
        if conflict.suggested_resolution().is_some_and(|s| s != submission.resolution) {
            warn!(
                queue_id = %conflict.item.id,
                suggested = ?conflict.suggested_resolution(),
                chosen = %submission.resolution,
                "Resolution differs from server suggestion"
            );
        }

        let timeout = self.request_timeout;
        let response = tokio::time::timeout(timeout, self.transport.resolve(&submission))
            .await
            .map_err(|_| SyncError::Timeout(timeout.as_secs()))??;
        if !response.success {
            return Err(SyncError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "resolution not accepted".to_string()),
            ));
        }

        let resolved = ResolvedConflict {
            conflict,
            resolution: submission.resolution,
            merged_data: submission.merged_data,
        };

        let mut tx = self.db.begin_immediate().await?;
        self.handler.apply(&mut tx, &resolved).await?;
        QueueRepository::record_resolution(
            &mut tx,
            &resolved.conflict.item,
            resolved.resolution,
            Utc::now(),
        )
        .await?;
        let updated = QueueRepository::get_in(&mut tx, &resolved.conflict.item.id)
            .await?
            .ok_or_else(|| DbError::not_found("Queue item", &resolved.conflict.item.id))?;
        tx.commit().await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuiltSale, OfflineSaleBuilder};
    use crate::processor::{ProcessorSettings, SyncProcessor};
    use crate::protocol::{ConflictReport, PushResponse};
    use crate::testing::{
        cash, context, line, server_time, test_config, test_db, PushScript, StubTransport,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use tally_core::{Cart, CheckoutPolicy, EntitySyncStatus, EntityType, LoyaltyRequest};

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<ResolvedConflict>>,
        fail: bool,
    }

    #[async_trait]
    impl ConflictResolutionHandler for RecordingHandler {
        async fn apply(
            &self,
            _conn: &mut SqliteConnection,
            resolved: &ResolvedConflict,
        ) -> SyncResult<()> {
            if self.fail {
                return Err(SyncError::InvalidConfig("handler refused".into()));
            }
            self.seen.lock().unwrap().push(resolved.clone());
            Ok(())
        }
    }

    /// One sale whose queue item ends up in CONFLICT.
    async fn conflicted_sale(db: &Database, stub: &Arc<StubTransport>) -> BuiltSale {
        let cart = Cart {
            lines: vec![line("p-1", 1, 250)],
            ..Default::default()
        };
        let built = OfflineSaleBuilder::new(db.clone(), CheckoutPolicy::default())
            .build_sale(&context(), &cart, &[cash(250)], &LoyaltyRequest::default())
            .await
            .unwrap();

        let mut response = PushResponse::accepted(1, server_time());
        response.conflicts.push(ConflictReport {
            local_id: built.local_id().to_string(),
            entity_type: Some(EntityType::Sale),
            conflict_type: "DUPLICATE_RECEIPT".into(),
            local_data: None,
            server_data: Some(json!({ "receipt": "R-100" })),
            suggested_resolution: Some(ConflictResolution::ServerWins),
        });
        stub.script_push(PushScript::Respond(response));
        SyncProcessor::new(
            db.clone(),
            stub.clone(),
            ProcessorSettings::from_config(&test_config()),
        )
        .process()
        .await
        .unwrap();

        built
    }

    fn submission(queue_id: &str, resolution: ConflictResolution) -> ResolutionSubmission {
        ResolutionSubmission {
            queue_id: queue_id.to_string(),
            resolution,
            merged_data: None,
        }
    }

    #[tokio::test]
    async fn test_list_conflicts_decodes_both_sides() {
        let db = test_db().await;
        let stub = Arc::new(StubTransport::new());
        let built = conflicted_sale(&db, &stub).await;
        let service = ConflictService::new(db.clone(), stub.clone(), Duration::from_secs(1));

        let conflicts = service.list_conflicts().await.unwrap();

        assert_eq!(conflicts.len(), 1);
        let view = &conflicts[0];
        assert_eq!(view.conflict_type(), Some("DUPLICATE_RECEIPT"));
        assert_eq!(view.suggested_resolution(), Some(ConflictResolution::ServerWins));
        assert_eq!(view.server_data, Some(json!({ "receipt": "R-100" })));
        match &view.local {
            SyncPayload::Sale(sale) => assert_eq!(sale.sale.local_id, built.local_id()),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolve_submits_then_records() {
        let db = test_db().await;
        let stub = Arc::new(StubTransport::new());
        let built = conflicted_sale(&db, &stub).await;
        let handler = Arc::new(RecordingHandler::default());
        let service = ConflictService::with_handler(
            db.clone(),
            stub.clone(),
            Duration::from_secs(1),
            handler.clone(),
        );
        let queue_id = built.queue_items[0].id.clone();

        let item = service
            .resolve(submission(&queue_id, ConflictResolution::LocalWins))
            .await
            .unwrap();

        assert_eq!(item.status, QueueStatus::Synced);
        assert_eq!(item.conflict_resolution, Some(ConflictResolution::LocalWins));
        assert_eq!(stub.resolutions.lock().unwrap().len(), 1);

        let seen = handler.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].resolution, ConflictResolution::LocalWins);
        assert_eq!(seen[0].conflict.item.id, queue_id);

        let sale = db.sales().get(built.local_id()).await.unwrap().unwrap();
        assert_eq!(sale.sync_status, EntitySyncStatus::Synced);
        assert!(service.list_conflicts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merged_requires_data() {
        let db = test_db().await;
        let stub = Arc::new(StubTransport::new());
        let built = conflicted_sale(&db, &stub).await;
        let service = ConflictService::new(db.clone(), stub.clone(), Duration::from_secs(1));
        let queue_id = built.queue_items[0].id.clone();

        let err = service
            .resolve(submission(&queue_id, ConflictResolution::Merged))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MergedDataRequired { .. }));
        assert!(stub.resolutions.lock().unwrap().is_empty());

        let mut merged = submission(&queue_id, ConflictResolution::Merged);
        merged.merged_data = Some(json!({ "receipt": "R-100", "note": "kept local total" }));
        let item = service.resolve(merged).await.unwrap();
        assert_eq!(item.conflict_resolution, Some(ConflictResolution::Merged));
    }

    #[tokio::test]
    async fn test_only_conflicts_can_be_resolved() {
        let db = test_db().await;
        let stub = Arc::new(StubTransport::new());
        let built = conflicted_sale(&db, &stub).await;
        let service = ConflictService::new(db.clone(), stub.clone(), Duration::from_secs(1));

        // The stock movement synced normally
        let movement_item = built.queue_items[1].id.clone();
        let err = service
            .resolve(submission(&movement_item, ConflictResolution::LocalWins))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotInConflict { .. }));

        let err = service
            .resolve(submission("missing", ConflictResolution::LocalWins))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Database(DbError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_handler_failure_keeps_conflict() {
        let db = test_db().await;
        let stub = Arc::new(StubTransport::new());
        let built = conflicted_sale(&db, &stub).await;
        let handler = Arc::new(RecordingHandler {
            fail: true,
            ..Default::default()
        });
        let service =
            ConflictService::with_handler(db.clone(), stub.clone(), Duration::from_secs(1), handler);

        service
            .resolve(submission(&built.queue_items[0].id, ConflictResolution::ServerWins))
            .await
            .unwrap_err();

        let item = db.queue().get(&built.queue_items[0].id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Conflict);
        assert_eq!(item.conflict_resolution, None);
        let sale = db.sales().get(built.local_id()).await.unwrap().unwrap();
        assert_eq!(sale.sync_status, EntitySyncStatus::Conflict);
    }
}
