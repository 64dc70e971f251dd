//! # Repository Module
//!
//! Typed access to every table of the local store.
//!
//! ## Two Calling Styles
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Pool-level (&self)                 Connection-level (associated fn)   │
//! │  ───────────────────                ─────────────────────────────────  │
//! │  db.queue().count_by_status()       let mut tx = db.begin().await?;    │
//! │  db.sales().get(local_id)           SaleRepository::insert_sale(       │
//! │  db.cache().get_product(id)             &mut tx, &sale).await?;        │
//! │                                     QueueRepository::enqueue(          │
//! │  one statement, own connection          &mut tx, &payload, op).await?; │
//! │                                     tx.commit().await?;                │
//! │                                                                         │
//! │  When both styles exist for one operation, the connection-level        │
//! │  function carries an `_in` suffix (`get` / `get_in`).                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All mutations of cached rows and pending records go through these typed
//! calls; nothing outside this module writes SQL.
//!
//! ## Available Repositories
//!
//! - [`CacheRepository`](cache::CacheRepository) - Cached reference rows and stock projection
//! - [`SaleRepository`](sale::SaleRepository) - Pending sales, items, payments
//! - [`StockRepository`](stock::StockRepository) - Pending stock movements
//! - [`RegisterRepository`](register::RegisterRepository) - Pending register operations
//! - [`QueueRepository`](queue::QueueRepository) - Sync queue and status propagation
//! - [`MetadataRepository`](metadata::MetadataRepository) - Sync watermark and key/value

pub mod cache;
pub mod metadata;
pub mod queue;
pub mod register;
pub mod sale;
pub mod stock;
