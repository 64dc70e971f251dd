//! # Sync Protocol Messages
//!
//! Request and response bodies exchanged with the sync server.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sync Protocol Messages                             │
//! │                                                                         │
//! │  PUSH (terminal → server)                       POST sync/push         │
//! │  ────────────────────────                                              │
//! │  terminal ───► PushRequest  { branch_id, register_id, items, last_sync_at }
//! │  terminal ◄─── PushResponse { success, processed, failed, conflicts,   │
//! │                               server_time, errors?, assigned_ids? }    │
//! │                                                                         │
//! │  PULL (server → terminal)                       POST sync/pull         │
//! │  ────────────────────────                                              │
//! │  terminal ───► PullRequest  { branch_id, last_sync_at, entity_types? } │
//! │  terminal ◄─── PullResponse { success, data, server_time }             │
//! │                                                                         │
//! │  RESOLVE (UI decision)                          POST sync/resolve      │
//! │  ─────────────────────                                                 │
//! │  terminal ───► ResolutionSubmission { queue_id, resolution, merged_data? }
//! │  terminal ◄─── ResolutionResponse   { success, message? }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Plain JSON. Timestamps are RFC 3339, enums use their SCREAMING_SNAKE_CASE
//! storage names. The server upserts pushed items by `local_id`, so a
//! re-sent item is a no-op on its side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tally_core::{
    CachedCategory, CachedCustomer, CachedPaymentMethod, CachedProduct, ConflictResolution,
    CoreResult, EntityType, SyncOperation, SyncPayload, SyncQueueItem,
};

// =============================================================================
// Push
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub branch_id: String,
    pub register_id: String,
    pub items: Vec<PushItem>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// One queue item on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    pub entity_type: EntityType,
    pub local_id: String,
    pub operation: SyncOperation,
    pub data: Value,
    pub local_created_at: DateTime<Utc>,
}

impl PushItem {
    /// Decodes the stored snapshot and re-encodes it as the wire `data`.
    ///
    /// Going through [`SyncPayload`] means a corrupt snapshot is caught here,
    /// before anything leaves the terminal.
    pub fn from_queue_item(item: &SyncQueueItem) -> CoreResult<Self> {
        let payload = SyncPayload::decode(item.entity_type, &item.payload)?;

        Ok(PushItem {
            entity_type: item.entity_type,
            local_id: item.local_id.clone(),
            operation: item.operation,
            data: payload.to_value()?,
            local_created_at: item.local_created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub success: bool,
    #[serde(default)]
    pub processed: i64,
    #[serde(default)]
    pub failed: i64,
    #[serde(default)]
    pub conflicts: Vec<ConflictReport>,
    pub server_time: DateTime<Utc>,

    /// Items the server could not apply, with its reason.
    #[serde(default)]
    pub errors: Vec<ItemError>,

    /// Server identifiers given to newly created records.
    #[serde(default)]
    pub assigned_ids: Vec<AssignedId>,

    #[serde(default)]
    pub message: Option<String>,
}

impl PushResponse {
    /// An all-clear response for `processed` items.
    pub fn accepted(processed: i64, server_time: DateTime<Utc>) -> Self {
        PushResponse {
            success: true,
            processed,
            failed: 0,
            conflicts: Vec::new(),
            server_time,
            errors: Vec::new(),
            assigned_ids: Vec::new(),
            message: None,
        }
    }

    pub fn conflict_for(&self, entity_type: EntityType, local_id: &str) -> Option<&ConflictReport> {
        self.conflicts
            .iter()
            .find(|c| c.local_id == local_id && c.entity_type.map_or(true, |t| t == entity_type))
    }

    pub fn error_for(&self, entity_type: EntityType, local_id: &str) -> Option<&ItemError> {
        self.errors
            .iter()
            .find(|e| e.local_id == local_id && e.entity_type.map_or(true, |t| t == entity_type))
    }

    pub fn server_id_for(&self, entity_type: EntityType, local_id: &str) -> Option<&str> {
        self.assigned_ids
            .iter()
            .find(|a| a.local_id == local_id && a.entity_type.map_or(true, |t| t == entity_type))
            .map(|a| a.server_id.as_str())
    }
}

/// A divergence the server found between its version and ours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub local_id: String,
    /// Absent when the server keys conflicts by local id alone.
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    pub conflict_type: String,
    #[serde(default)]
    pub local_data: Option<Value>,
    #[serde(default)]
    pub server_data: Option<Value>,
    #[serde(default)]
    pub suggested_resolution: Option<ConflictResolution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub local_id: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignedId {
    pub local_id: String,
    #[serde(default)]
    pub entity_type: Option<EntityType>,
    pub server_id: String,
}

// =============================================================================
// Pull
// =============================================================================

/// Reference collections the terminal caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullEntity {
    Products,
    Customers,
    PaymentMethods,
    Categories,
}

impl PullEntity {
    pub const ALL: [PullEntity; 4] = [
        PullEntity::Products,
        PullEntity::Customers,
        PullEntity::PaymentMethods,
        PullEntity::Categories,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub branch_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// `None` asks for every collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<Vec<PullEntity>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub success: bool,
    #[serde(default)]
    pub data: PullData,
    pub server_time: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Changed reference rows. A missing collection means "nothing changed".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullData {
    #[serde(default)]
    pub products: Option<Vec<CachedProduct>>,
    #[serde(default)]
    pub customers: Option<Vec<CachedCustomer>>,
    #[serde(default)]
    pub payment_methods: Option<Vec<CachedPaymentMethod>>,
    #[serde(default)]
    pub categories: Option<Vec<CachedCategory>>,
}

// =============================================================================
// Conflict Resolution
// =============================================================================

/// A person's decision on a conflicting queue item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSubmission {
    pub queue_id: String,
    pub resolution: ConflictResolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}
