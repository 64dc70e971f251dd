//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors                                                       │
//! │  └── DbError          - Local persistence failures                     │
//! │                                                                         │
//! │  tally-sync errors                                                     │
//! │  └── SyncError        - Transport, config, conflict handling           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations detected before anything is persisted.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Payments do not cover the amount due.
    ///
    /// ## When This Occurs
    /// ```text
    /// Total $20.00, 500 points redeemed ($5.00), credit $0
    ///      │
    ///      ▼
    /// Amount due: $15.00, tendered: $10.00
    ///      │
    ///      ▼
    /// InsufficientPayment { due_cents: 1500, paid_cents: 1000 }
    /// ```
    #[error("Payments of {paid_cents} cents do not cover amount due of {due_cents} cents")]
    InsufficientPayment { due_cents: i64, paid_cents: i64 },

    /// Loyalty points or store credit were requested without a customer.
    #[error("{benefit} requires a customer on the sale")]
    CustomerRequired { benefit: String },

    /// A money sum or product does not fit in i64 cents.
    #[error("{field} is out of range")]
    AmountOverflow { field: String },

    /// Sale lifecycle does not allow the requested transition.
    #[error("Sale {local_id} is {current_status}, cannot {action}")]
    InvalidSaleStatus {
        local_id: String,
        current_status: String,
        action: String,
    },

    /// Queue payload could not be encoded or decoded.
    #[error("Invalid {entity_type} payload: {reason}")]
    InvalidPayload { entity_type: String, reason: String },

    /// Unknown enum value read from storage or the wire.
    #[error("Unknown {kind} value: '{value}'")]
    UnknownValue { kind: String, value: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub(crate) fn unknown(kind: &str, value: &str) -> Self {
        CoreError::UnknownValue {
            kind: kind.to_string(),
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientPayment {
            due_cents: 1500,
            paid_cents: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Payments of 1000 cents do not cover amount due of 1500 cents"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "user_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: user_id is required");
    }
}
