//! # tally-sync: Offline Sync Engine for Tally POS
//!
//! Lets a terminal keep selling without the server and reconciles with it
//! once it is reachable again.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Components                              │
//! │                                                                         │
//! │  cart + payments                                                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌────────────────────┐   one tx    ┌──────────────────────────────┐    │
//! │  │ OfflineSaleBuilder │ ──────────► │ Local Store (tally-db)       │    │
//! │  └────────────────────┘             │  pending_* rows              │    │
//! │                                     │  sync_queue                  │    │
//! │  ┌────────────────────┐  claim/ack  │  cached_* reference rows     │    │
//! │  │ SyncProcessor      │ ◄─────────► │  sync_metadata (watermark)   │    │
//! │  └─────────┬──────────┘             └──────────────▲───────────────┘    │
//! │            │ push                                  │ upsert             │
//! │            ▼                                       │                    │
//! │  ┌────────────────────┐   pull     ┌───────────────┴──────────────┐     │
//! │  │ dyn SyncTransport  │ ─────────► │ Downloader                   │     │
//! │  │ (HttpTransport)    │            └──────────────────────────────┘     │
//! │  └─────────▲──────────┘                                                 │
//! │            │ resolve                                                    │
//! │  ┌─────────┴──────────┐            ┌──────────────────────────────┐     │
//! │  │ ConflictService    │            │ StatusReporter (read-only)   │     │
//! │  └────────────────────┘            └──────────────────────────────┘     │
//! │                                                                         │
//! │  SyncAgent schedules push and pull in the background.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`builder`] - Offline sales, voids, returns and register operations
//! - [`processor`] - Push cycle and retry path
//! - [`downloader`] - Reference data pull
//! - [`status`] - Queue and sale counts for the UI
//! - [`conflict`] - Conflict listing and resolution hand-off
//! - [`agent`] - Background push and pull loops
//! - [`transport`] - `SyncTransport` seam and its HTTP implementation
//! - [`protocol`] - Wire types
//! - [`config`] - Terminal, server and sync settings
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tally_db::{Database, DbConfig};
//! use tally_sync::{HttpTransport, SyncAgent, SyncConfig, TransportConfig};
//!
//! let config = SyncConfig::load(None)?;
//! let db = Database::new(DbConfig::new("tally.db")).await?;
//! let transport = Arc::new(HttpTransport::new(TransportConfig::from_sync_config(&config)?)?);
//!
//! let handle = SyncAgent::new(config, db, transport).start().await?;
//! handle.sync_now()?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod builder;
pub mod config;
pub mod conflict;
pub mod downloader;
pub mod error;
pub mod processor;
pub mod protocol;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{
    NoOpEmitter, SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncEventEmitter, SyncStatus,
};
pub use builder::{BuiltSale, OfflineSaleBuilder, RegisterOperationInput};
pub use config::{SyncConfig, SyncMode};
pub use conflict::{
    ConflictResolutionHandler, ConflictService, ConflictView, LoggingResolutionHandler,
    ResolvedConflict,
};
pub use downloader::{Downloader, PullReport};
pub use error::{SyncError, SyncResult};
pub use processor::{ProcessorSettings, SyncProcessor, SyncReport};
pub use protocol::{PullEntity, ResolutionSubmission};
pub use status::StatusReporter;
pub use transport::{HttpTransport, SyncTransport, TransportConfig};
