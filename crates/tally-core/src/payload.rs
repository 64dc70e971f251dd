//! # Sync Payloads
//!
//! Strongly-typed snapshots carried by queue items.
//!
//! The queue stores a payload as a JSON string next to its `entity_type`
//! column. Inside the engine the payload is always a [`SyncPayload`]; the
//! string form exists only at the storage and wire boundary.
//!
//! ```text
//!   SyncPayload::Sale(SalePayload)          ──encode──►  entity_type = SALE
//!   SyncPayload::StockMovement(..)                       payload     = {"sale":{..},"items":[..],..}
//!   SyncPayload::RegisterOperation(..)      ◄─decode──
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::types::{
    EntityType, PendingRegisterOperation, PendingSale, PendingSaleItem, PendingSalePayment,
    PendingStockMovement,
};

/// A sale together with its immutable lines and tenders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalePayload {
    pub sale: PendingSale,
    pub items: Vec<PendingSaleItem>,
    pub payments: Vec<PendingSalePayment>,
}

/// Tagged union of everything the engine can push.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPayload {
    Sale(SalePayload),
    StockMovement(PendingStockMovement),
    RegisterOperation(PendingRegisterOperation),
}

impl SyncPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            SyncPayload::Sale(_) => EntityType::Sale,
            SyncPayload::StockMovement(_) => EntityType::StockMovement,
            SyncPayload::RegisterOperation(_) => EntityType::RegisterOperation,
        }
    }

    /// Local id of the aggregate this payload snapshots.
    pub fn local_id(&self) -> &str {
        match self {
            SyncPayload::Sale(p) => &p.sale.local_id,
            SyncPayload::StockMovement(m) => &m.local_id,
            SyncPayload::RegisterOperation(op) => &op.local_id,
        }
    }

    /// Converts to the untagged JSON value sent on the wire.
    pub fn to_value(&self) -> CoreResult<Value> {
        let entity_type = self.entity_type();
        let value = match self {
            SyncPayload::Sale(p) => serde_json::to_value(p),
            SyncPayload::StockMovement(m) => serde_json::to_value(m),
            SyncPayload::RegisterOperation(op) => serde_json::to_value(op),
        };

        value.map_err(|e| invalid(entity_type, e))
    }

    /// Rebuilds a payload from its entity type and untagged JSON value.
    pub fn from_value(entity_type: EntityType, value: Value) -> CoreResult<Self> {
        let payload = match entity_type {
            EntityType::Sale => serde_json::from_value(value).map(SyncPayload::Sale),
            EntityType::StockMovement => {
                serde_json::from_value(value).map(SyncPayload::StockMovement)
            }
            EntityType::RegisterOperation => {
                serde_json::from_value(value).map(SyncPayload::RegisterOperation)
            }
        };

        payload.map_err(|e| invalid(entity_type, e))
    }

    /// Encodes for the `sync_queue.payload` column.
    pub fn encode(&self) -> CoreResult<String> {
        let value = self.to_value()?;
        serde_json::to_string(&value).map_err(|e| invalid(self.entity_type(), e))
    }

    /// Decodes a `sync_queue.payload` column.
    pub fn decode(entity_type: EntityType, payload: &str) -> CoreResult<Self> {
        let value: Value = serde_json::from_str(payload).map_err(|e| invalid(entity_type, e))?;
        Self::from_value(entity_type, value)
    }
}

impl From<SalePayload> for SyncPayload {
    fn from(p: SalePayload) -> Self {
        SyncPayload::Sale(p)
    }
}

impl From<PendingStockMovement> for SyncPayload {
    fn from(m: PendingStockMovement) -> Self {
        SyncPayload::StockMovement(m)
    }
}

impl From<PendingRegisterOperation> for SyncPayload {
    fn from(op: PendingRegisterOperation) -> Self {
        SyncPayload::RegisterOperation(op)
    }
}

fn invalid(entity_type: EntityType, e: serde_json::Error) -> CoreError {
    CoreError::InvalidPayload {
        entity_type: entity_type.to_string(),
        reason: e.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntitySyncStatus, MovementType};
    use chrono::Utc;

    fn movement() -> PendingStockMovement {
        PendingStockMovement {
            local_id: "m-1".to_string(),
            server_id: None,
            sale_local_id: Some("s-1".to_string()),
            branch_id: "b-1".to_string(),
            user_id: "u-1".to_string(),
            product_id: "p-1".to_string(),
            movement_type: MovementType::Sale,
            quantity: 2,
            quantity_before: Some(10),
            quantity_after: Some(8),
            sync_status: EntitySyncStatus::Pending,
            sync_error: None,
            local_created_at: Utc::now(),
            synced_at: None,
        }
    }

    #[test]
    fn test_payload_tag_follows_variant() {
        let payload = SyncPayload::from(movement());
        assert_eq!(payload.entity_type(), EntityType::StockMovement);
        assert_eq!(payload.local_id(), "m-1");

        let encoded = payload.encode().unwrap();
        assert!(encoded.contains("\"movement_type\":\"SALE\""));
        assert_eq!(
            SyncPayload::decode(EntityType::StockMovement, &encoded).unwrap(),
            payload
        );
    }

    #[test]
    fn test_decode_with_wrong_entity_type_fails() {
        let encoded = SyncPayload::from(movement()).encode().unwrap();
        let err = SyncPayload::decode(EntityType::Sale, &encoded).unwrap_err();
        assert!(matches!(err, CoreError::InvalidPayload { .. }));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(SyncPayload::decode(EntityType::RegisterOperation, "{not json").is_err());
    }
}
