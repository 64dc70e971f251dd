//! # tally-core: Pure Domain Logic for the Tally Sync Engine
//!
//! Everything the offline sync engine needs to know about sales, stock
//! movements and register operations, expressed as plain data and pure
//! functions. No database, no network.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Tally Sync Layers                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ checkout  │  │  payload  │  │ validation│  │   │
//! │  │   │PendingSale│  │Settlement │  │SyncPayload│  │   rules   │  │   │
//! │  │   │ QueueItem │  │ loyalty   │  │ (tagged)  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tally-db (Local Store)                          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 tally-sync (Engine)                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Pending records, queue items, cached reference rows
//! - [`money`] - Integer money type
//! - [`checkout`] - Sale settlement (loyalty, credit, change)
//! - [`payload`] - Strongly-typed queue payloads
//! - [`validation`] - Input validation
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//!
//! let price = Money::from_cents(1099);
//! let line = price.multiply_quantity(3);
//! assert_eq!(line.cents(), 3297);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod checkout;
pub mod error;
pub mod money;
pub mod payload;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use checkout::{
    Cart, CartLine, CheckoutPolicy, CustomerBalances, LoyaltyRequest, PaymentInput, Settlement,
};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use payload::{SalePayload, SyncPayload};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum lines allowed in a single offline sale.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity of a single line.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Generates a new local identifier.
///
/// Local identifiers are assigned once at creation time and never reused or
/// mutated; the server upserts by them.
pub fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
