//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidResponse        │ │
//! │  │  InvalidUrl     │  │  HttpStatus     │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  Timeout        │  │  Rejected               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │ Local store     │  │    Domain       │  │      Conflicts          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Database       │  │  Core           │  │  NotInConflict          │ │
//! │  │  (DbError)      │  │  (CoreError)    │  │  MergedDataRequired     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors never escape the Sync Processor: they become FAILED
//! queue items. Database errors are fatal to the current operation.

use thiserror::Error;

use tally_core::CoreError;
use tally_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Server unreachable, connection reset, DNS failure...
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server answered with a non-success HTTP status.
    #[error("Server returned HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// Request did not complete in time.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Response body could not be decoded.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Server answered `success: false`.
    #[error("Server rejected request: {0}")]
    Rejected(String),

    // =========================================================================
    // Local Store & Domain Errors
    // =========================================================================
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The sale's queue item is being pushed or awaits a conflict decision.
    #[error("Sale {local_id} cannot change while its queue item is {queue_status}")]
    SaleLocked {
        local_id: String,
        queue_status: String,
    },

    // =========================================================================
    // Conflict Resolution Errors
    // =========================================================================
    #[error("Queue item {queue_id} is not awaiting a conflict decision")]
    NotInConflict { queue_id: String },

    #[error("MERGED resolution for {queue_id} requires merged_data")]
    MergedDataRequired { queue_id: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::Database(DbError::from(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if let Some(status) = err.status() {
            SyncError::HttpStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failure is a transport problem the retry path
    /// can recover from.
    ///
    /// ## Retryable
    /// - Connection failures and timeouts
    /// - 5xx, 408 and 429 responses
    /// - Undecodable responses and explicit rejections
    ///
    /// ## Not Retryable
    /// - Local store and domain errors
    /// - Configuration errors
    /// - Other 4xx responses
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Timeout(_)
            | SyncError::InvalidResponse(_)
            | SyncError::Rejected(_) => true,
            SyncError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Returns true for failures of the network round trip itself.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectionFailed(_)
                | SyncError::HttpStatus { .. }
                | SyncError::Timeout(_)
                | SyncError::InvalidResponse(_)
                | SyncError::Rejected(_)
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::Timeout(30).is_retryable());
        assert!(SyncError::HttpStatus {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!SyncError::HttpStatus {
            status: 401,
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::Database(DbError::PoolExhausted).is_retryable());
    }

    #[test]
    fn test_transport_errors_are_not_config_errors() {
        let err = SyncError::Timeout(30);
        assert!(err.is_transport_error());
        assert!(!err.is_config_error());
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());
    }

    #[test]
    fn test_core_error_is_transparent() {
        let err: SyncError = CoreError::InsufficientPayment {
            due_cents: 1500,
            paid_cents: 1000,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Payments of 1000 cents do not cover amount due of 1500 cents"
        );
    }
}
