//! # Domain Types
//!
//! Records the terminal creates offline, the queue that carries them to the
//! server, and the cached reference data it reads while disconnected.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  PENDING (pushed)               QUEUE                 CACHED (pulled)   │
//! │  ───────────────────            ─────────────         ───────────────   │
//! │  PendingSale ─┬─ items          SyncQueueItem         CachedProduct     │
//! │               └─ payments        entity_type          CachedCustomer    │
//! │  PendingStockMovement            local_id ──────┐     CachedCategory    │
//! │  PendingRegisterOperation        status         │     CachedPaymentMeth │
//! │        ▲                         retry_count    │                       │
//! │        └────── local_id ◄───────────────────────┘                       │
//! │                                                                         │
//! │  local_id: client-generated, stable, never reused                      │
//! │  server_id: assigned by the server after a successful push (optional)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Status Fields
//! Pending records carry a lifecycle status (`SaleStatus`) and an
//! independent [`EntitySyncStatus`]. The queue item carries the finer
//! [`QueueStatus`]; [`QueueStatus::entity_sync_status`] is the projection that
//! keeps both in lockstep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::CoreError;
use crate::money::Money;

/// Implements `as_str`, `Display` and `FromStr` using the SCREAMING_SNAKE_CASE
/// names shared by the database, the wire format and the logs.
macro_rules! impl_str_conversions {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Returns the storage/wire name of this value.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(CoreError::unknown($kind, other)),
                }
            }
        }
    };
}

// =============================================================================
// Status Enums
// =============================================================================

/// Lifecycle status of a sale, independent of its sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum SaleStatus {
    /// Built but not yet settled (reserved for parked sales).
    Pending,
    /// Paid in full.
    #[default]
    Completed,
    /// Cancelled after completion; stock restored.
    Voided,
    /// Returned by the customer; stock restored.
    Returned,
}

impl_str_conversions!(SaleStatus, "sale status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Voided => "VOIDED",
    Returned => "RETURNED",
});

/// Sync status carried by every pending record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum EntitySyncStatus {
    /// Not yet acknowledged by the server.
    #[default]
    Pending,
    /// Acknowledged by the server.
    Synced,
    /// The server reported a divergence that needs a human decision.
    Conflict,
}

impl_str_conversions!(EntitySyncStatus, "entity sync status", {
    Pending => "PENDING",
    Synced => "SYNCED",
    Conflict => "CONFLICT",
});

/// Processing status of a queue item.
///
/// ## Transitions
/// ```text
///            claim (atomic)          push ok
///  PENDING ────────────────► PROCESSING ─────────► SYNCED
///     ▲                          │  │
///     │ retry_failed             │  └── conflict ──► CONFLICT ── resolve ──► SYNCED
///     │ (retry_count < max)      │
///     └──────── FAILED ◄─────────┘ transport error / timeout / stale
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum QueueStatus {
    #[default]
    Pending,
    Processing,
    Synced,
    Failed,
    Conflict,
}

impl_str_conversions!(QueueStatus, "queue status", {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Synced => "SYNCED",
    Failed => "FAILED",
    Conflict => "CONFLICT",
});

impl QueueStatus {
    /// All statuses, in display order.
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Pending,
        QueueStatus::Processing,
        QueueStatus::Synced,
        QueueStatus::Failed,
        QueueStatus::Conflict,
    ];

    /// The sync status the owning entity must carry while its queue item is
    /// in this status.
    ///
    /// In-flight and failed items still belong to an unacknowledged entity,
    /// so they all project onto `Pending`.
    pub const fn entity_sync_status(&self) -> EntitySyncStatus {
        match self {
            QueueStatus::Pending | QueueStatus::Processing | QueueStatus::Failed => {
                EntitySyncStatus::Pending
            }
            QueueStatus::Synced => EntitySyncStatus::Synced,
            QueueStatus::Conflict => EntitySyncStatus::Conflict,
        }
    }
}

/// Kind of aggregate a queue item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum EntityType {
    Sale,
    StockMovement,
    RegisterOperation,
}

impl_str_conversions!(EntityType, "entity type", {
    Sale => "SALE",
    StockMovement => "STOCK_MOVEMENT",
    RegisterOperation => "REGISTER_OPERATION",
});

/// Mutation kind recorded on a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum SyncOperation {
    #[default]
    Insert,
    Update,
    Delete,
}

impl_str_conversions!(SyncOperation, "sync operation", {
    Insert => "INSERT",
    Update => "UPDATE",
    Delete => "DELETE",
});

/// Resolution of a conflict, suggested by the server or chosen by a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum ConflictResolution {
    LocalWins,
    ServerWins,
    Merged,
}

impl_str_conversions!(ConflictResolution, "conflict resolution", {
    LocalWins => "LOCAL_WINS",
    ServerWins => "SERVER_WINS",
    Merged => "MERGED",
});

/// Why the cached stock level changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum MovementType {
    /// Stock leaves with a sale.
    Sale,
    /// Stock comes back because a sale was voided.
    VoidRestock,
    /// Stock comes back because a sale was returned.
    ReturnRestock,
}

impl_str_conversions!(MovementType, "movement type", {
    Sale => "SALE",
    VoidRestock => "VOID_RESTOCK",
    ReturnRestock => "RETURN_RESTOCK",
});

impl MovementType {
    /// Signed multiplier applied to the movement quantity.
    pub const fn direction(&self) -> i64 {
        match self {
            MovementType::Sale => -1,
            MovementType::VoidRestock | MovementType::ReturnRestock => 1,
        }
    }
}

/// Cash register event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export)]
pub enum RegisterOperationType {
    Open,
    Close,
    CashDrop,
    Withdrawal,
}

impl_str_conversions!(RegisterOperationType, "register operation type", {
    Open => "OPEN",
    Close => "CLOSE",
    CashDrop => "CASH_DROP",
    Withdrawal => "WITHDRAWAL",
});

// =============================================================================
// Terminal Context
// =============================================================================

/// Opaque identifiers supplied by the session layer for every offline write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalContext {
    pub branch_id: String,
    pub register_id: String,
    /// Cash session the register is running under, if any.
    pub session_id: Option<String>,
    /// The performing user. Required.
    pub user_id: String,
}

// =============================================================================
// Pending Sale
// =============================================================================

/// A sale recorded on the terminal, possibly before the server knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingSale {
    pub local_id: String,
    pub server_id: Option<String>,
    pub branch_id: String,
    pub register_id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub customer_id: Option<String>,
    /// Sum of unit price × quantity over all lines.
    pub subtotal_cents: i64,
    /// Line discounts plus the cart-level discount.
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub points_earned: i64,
    pub points_redeemed: i64,
    /// Monetary value of the redeemed points.
    pub points_value_cents: i64,
    pub credit_used_cents: i64,
    /// Change converted into store credit.
    pub credit_granted_cents: i64,
    pub amount_paid_cents: i64,
    /// Change handed back in cash.
    pub change_cents: i64,
    pub status: SaleStatus,
    pub sync_status: EntitySyncStatus,
    pub sync_error: Option<String>,
    #[ts(as = "String")]
    pub local_created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl PendingSale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }

    /// Whether the lifecycle still allows a void or a return.
    pub fn can_reverse(&self) -> bool {
        self.status == SaleStatus::Completed
    }
}

/// A sale line. Immutable once created offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingSaleItem {
    pub local_id: String,
    pub sale_local_id: String,
    /// 1-based position in the cart.
    pub line_no: i64,
    pub product_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub discount_cents: i64,
    pub tax_cents: i64,
    pub line_total_cents: i64,
}

/// A tender applied to a sale. Immutable once created offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingSalePayment {
    pub local_id: String,
    pub sale_local_id: String,
    pub line_no: i64,
    pub payment_method_id: String,
    pub amount_cents: i64,
    /// External reference (card auth code, voucher number).
    pub reference: Option<String>,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// A change to the locally cached stock level.
///
/// `quantity_before`/`quantity_after` are `None` when the product was never
/// downloaded; the server still receives the movement and arbitrates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingStockMovement {
    pub local_id: String,
    pub server_id: Option<String>,
    pub sale_local_id: Option<String>,
    pub branch_id: String,
    pub user_id: String,
    pub product_id: String,
    pub movement_type: MovementType,
    /// Unsigned quantity; the direction comes from `movement_type`.
    pub quantity: i64,
    pub quantity_before: Option<i64>,
    pub quantity_after: Option<i64>,
    pub sync_status: EntitySyncStatus,
    pub sync_error: Option<String>,
    #[ts(as = "String")]
    pub local_created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Register Operation
// =============================================================================

/// Open/close/cash-drop/withdrawal event with declared tender amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PendingRegisterOperation {
    pub local_id: String,
    pub server_id: Option<String>,
    pub branch_id: String,
    pub register_id: String,
    pub session_id: Option<String>,
    pub user_id: String,
    pub operation_type: RegisterOperationType,
    /// Amount moved by the operation (float for OPEN, drop/withdrawal amount).
    pub amount_cents: i64,
    pub declared_cash_cents: i64,
    pub declared_card_cents: i64,
    pub declared_other_cents: i64,
    pub notes: Option<String>,
    pub sync_status: EntitySyncStatus,
    pub sync_error: Option<String>,
    #[ts(as = "String")]
    pub local_created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Sync Queue
// =============================================================================

/// The unit of reconciliation work: one pending mutation of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SyncQueueItem {
    pub id: String,
    pub entity_type: EntityType,
    pub local_id: String,
    pub operation: SyncOperation,
    /// JSON snapshot of the aggregate, see [`crate::payload::SyncPayload`].
    pub payload: String,
    pub status: QueueStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub conflict_type: Option<String>,
    pub suggested_resolution: Option<ConflictResolution>,
    /// Resolution chosen by a person, once resolved.
    pub conflict_resolution: Option<ConflictResolution>,
    /// Server's version of the entity, as reported with the conflict.
    pub server_data: Option<String>,
    #[ts(as = "String")]
    pub local_created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub attempted_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub synced_at: Option<DateTime<Utc>>,
}

impl SyncQueueItem {
    /// Whether the retry path may still pick this item up.
    pub fn is_retryable(&self, max_retries: i64) -> bool {
        self.status == QueueStatus::Failed && self.retry_count < max_retries
    }
}

// =============================================================================
// Cached Reference Rows
// =============================================================================
// Read-only projections of server truth. Never pushed; overwritten by pulls.
// `cached_at` is stamped locally on every write.

fn now() -> DateTime<Utc> {
    Utc::now()
}

fn default_true() -> bool {
    true
}

/// Cached product with its last known stock level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CachedProduct {
    pub id: String,
    pub sku: String,
    #[serde(default)]
    pub barcode: Option<String>,
    pub name: String,
    pub price_cents: i64,
    #[serde(default)]
    pub tax_rate_bps: i64,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default = "default_true")]
    pub track_inventory: bool,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "now")]
    pub cached_at: DateTime<Utc>,
}

/// Cached customer, used for loyalty and credit lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CachedCustomer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub loyalty_points: i64,
    #[serde(default)]
    pub credit_balance_cents: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "now")]
    pub cached_at: DateTime<Utc>,
}

/// Cached payment method (cash, card, voucher...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CachedPaymentMethod {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "now")]
    pub cached_at: DateTime<Utc>,
}

/// Cached product category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CachedCategory {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "now")]
    pub cached_at: DateTime<Utc>,
}

// =============================================================================
// Status Report
// =============================================================================

/// Queue item counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub synced: i64,
    pub failed: i64,
    pub conflict: i64,
}

impl QueueCounts {
    pub fn set(&mut self, status: QueueStatus, count: i64) {
        match status {
            QueueStatus::Pending => self.pending = count,
            QueueStatus::Processing => self.processing = count,
            QueueStatus::Synced => self.synced = count,
            QueueStatus::Failed => self.failed = count,
            QueueStatus::Conflict => self.conflict = count,
        }
    }

    /// Items not yet acknowledged by the server.
    pub fn outstanding(&self) -> i64 {
        self.pending + self.processing + self.failed + self.conflict
    }
}

/// Pending sale counts by sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleSyncCounts {
    pub pending: i64,
    pub synced: i64,
    pub conflict: i64,
}

impl SaleSyncCounts {
    pub fn set(&mut self, status: EntitySyncStatus, count: i64) {
        match status {
            EntitySyncStatus::Pending => self.pending = count,
            EntitySyncStatus::Synced => self.synced = count,
            EntitySyncStatus::Conflict => self.conflict = count,
        }
    }
}

/// Read-side snapshot polled by the UI.
///
/// `failed_retryable` items will be retried automatically; `failed_exhausted`
/// and `queue.conflict` items need a person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatusReport {
    pub queue: QueueCounts,
    pub failed_retryable: i64,
    pub failed_exhausted: i64,
    pub sales: SaleSyncCounts,
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub oldest_pending_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub generated_at: DateTime<Utc>,
}

impl SyncStatusReport {
    /// Whether anything needs an explicit human decision.
    pub fn needs_attention(&self) -> bool {
        self.queue.conflict > 0 || self.failed_exhausted > 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
