//! # Downloader
//!
//! Refreshes the cached reference rows used for offline lookups.
//!
//! ## Pull Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  last_sync_at ──► POST sync/pull { branch_id, last_sync_at, types? }    │
//! │                              │                                          │
//! │                              ▼                                          │
//! │  ┌───────────────────── ONE TRANSACTION ───────────────────────────┐    │
//! │  │ upsert cached_products        (replace by id, stamp cached_at) │    │
//! │  │ upsert cached_customers                                        │    │
//! │  │ upsert cached_payment_methods                                  │    │
//! │  │ upsert cached_categories                                       │    │
//! │  │ last_sync_at = server_time    (unfiltered pulls only)          │    │
//! │  └────────────────────────────────────────────────────────────────┘    │
//! │                                                                         │
//! │  Cached rows are never deleted by a pull: an unsynced sale may still   │
//! │  reference them. Server values overwrite the builder's local stock     │
//! │  projection (last writer wins).                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The watermark is shared with the Sync Processor. A filtered pull only
//! refreshes some collections, so it leaves the watermark where it was.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use tally_db::{CacheRepository, Database, MetadataRepository};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{PullEntity, PullRequest, PullResponse};
use crate::transport::SyncTransport;

/// Rows written by one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub products: usize,
    pub customers: usize,
    pub payment_methods: usize,
    pub categories: usize,
    pub server_time: Option<DateTime<Utc>>,
    /// Whether the shared watermark moved to `server_time`.
    pub watermark_advanced: bool,
}

impl PullReport {
    pub fn total(&self) -> usize {
        self.products + self.customers + self.payment_methods + self.categories
    }
}

#[derive(Clone)]
pub struct Downloader {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    branch_id: String,
    request_timeout: Duration,
}

impl Downloader {
    pub fn new(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        branch_id: impl Into<String>,
        request_timeout: Duration,
    ) -> Self {
        Downloader {
            db,
            transport,
            branch_id: branch_id.into(),
            request_timeout,
        }
    }

    pub fn from_config(
        db: Database,
        transport: Arc<dyn SyncTransport>,
        config: &SyncConfig,
    ) -> Self {
        Self::new(db, transport, config.branch_id(), config.request_timeout())
    }

    /// Pulls every collection changed since the watermark.
    pub async fn pull(&self) -> SyncResult<PullReport> {
        self.pull_request(None).await
    }

    /// Pulls only the given collections. The watermark does not move.
    pub async fn pull_entities(&self, entities: &[PullEntity]) -> SyncResult<PullReport> {
        if entities.is_empty() || PullEntity::ALL.iter().all(|e| entities.contains(e)) {
            return self.pull().await;
        }
        self.pull_request(Some(entities.to_vec())).await
    }

    async fn pull_request(&self, entity_types: Option<Vec<PullEntity>>) -> SyncResult<PullReport> {
        let filtered = entity_types.is_some();
        let request = PullRequest {
            branch_id: self.branch_id.clone(),
            last_sync_at: self.db.metadata().last_sync_at().await?,
            entity_types,
        };

        debug!(
            since = ?request.last_sync_at,
            filtered,
            "Pulling reference data"
        );

        let response = self.fetch(&request).await?;
        let data = response.data;

        let mut report = PullReport {
            server_time: Some(response.server_time),
            ..Default::default()
        };

        let mut tx = self.db.begin().await?;
        if let Some(products) = &data.products {
            report.products = CacheRepository::upsert_products(&mut tx, products).await?;
        }
        if let Some(customers) = &data.customers {
            report.customers = CacheRepository::upsert_customers(&mut tx, customers).await?;
        }
        if let Some(methods) = &data.payment_methods {
            report.payment_methods =
                CacheRepository::upsert_payment_methods(&mut tx, methods).await?;
        }
        if let Some(categories) = &data.categories {
            report.categories = CacheRepository::upsert_categories(&mut tx, categories).await?;
        }
        if !filtered {
            MetadataRepository::set_last_sync_at(&mut tx, response.server_time).await?;
            report.watermark_advanced = true;
        }
        tx.commit().await?;

        info!(
            products = report.products,
            customers = report.customers,
            payment_methods = report.payment_methods,
            categories = report.categories,
            server_time = %response.server_time,
            "Reference data refreshed"
        );

        Ok(report)
    }

    async fn fetch(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        let timeout = self.request_timeout;
        let response = tokio::time::timeout(timeout, self.transport.pull(request))
            .await
            .map_err(|_| SyncError::Timeout(timeout.as_secs()))??;

        if !response.success {
            return Err(SyncError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "pull not accepted".to_string()),
            ));
        }
        Ok(response)
    }
}
