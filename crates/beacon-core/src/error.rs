//! # Error Types
//!
//! Domain-specific error types for beacon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  beacon-core errors (this file)                                        │
//! │  ├── ValidationError  - Malformed input, never retried                 │
//! │  ├── DomainError      - Business rule refusals (AmountMismatch, ...)   │
//! │  └── QueueError       - Illegal queue transitions / exhausted items    │
//! │                                                                         │
//! │  beacon-db errors (separate crate)                                     │
//! │  └── DbError          - Storage failures (mostly transient)            │
//! │                                                                         │
//! │  beacon-engine errors                                                  │
//! │  └── EngineError      - Everything above + infrastructure categories   │
//! │                                                                         │
//! │  Flow: ValidationError/DomainError → EngineError → caller / Fail()     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (cart id, product id, amounts)
//! 3. Errors are enum variants, never String
//! 4. Domain errors and infrastructure errors never share a type

use thiserror::Error;

use crate::money::Money;
use crate::types::OperationStatus;

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Always surfaced synchronously to the caller and never retried: resubmitting
/// the same input would fail the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., invalid UUID).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub(crate) fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub(crate) fn must_be_positive(field: &str) -> Self {
        ValidationError::MustBePositive {
            field: field.to_string(),
        }
    }
}

// =============================================================================
// Domain Error
// =============================================================================

/// Business rule refusals raised by settlement and refund.
///
/// ## Caller Workflow
/// ```text
/// settle_single(cart 42, CASH, $40.00)
///      │
///      ▼
/// cart total is $100.00
///      │
///      ▼
/// AmountMismatch { expected: $100.00, tendered: $40.00 }
///      │
///      ▼
/// UI asks cashier for the remaining $60.00 (nothing was written)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Tendered total does not match the cart total within tolerance.
    #[error("Amount mismatch for cart {cart_id}: expected {expected}, tendered {tendered}")]
    AmountMismatch {
        cart_id: i64,
        expected: Money,
        tendered: Money,
    },

    /// The cart was completed by someone else while this settlement ran.
    #[error("Cart {cart_id} was already settled")]
    AlreadySettled { cart_id: i64 },

    /// Stock could not be decremented for a line.
    #[error("Stock unavailable for product {product_id} (requested {requested}): {reason}")]
    StockUnavailable {
        product_id: i64,
        requested: i64,
        reason: String,
    },

    /// Entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Entity is not in a state that allows the operation.
    #[error("{entity} {id} is {status}, cannot perform operation")]
    InvalidState {
        entity: String,
        id: String,
        status: String,
    },
}

impl DomainError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        DomainError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl ToString,
        status: impl ToString,
    ) -> Self {
        DomainError::InvalidState {
            entity: entity.into(),
            id: id.to_string(),
            status: status.to_string(),
        }
    }
}

// =============================================================================
// Queue Error
// =============================================================================

/// Errors raised by the queued operation state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The requested transition is not allowed from the current status.
    #[error("Queued operation {id} is {from}, cannot {action}")]
    InvalidTransition {
        id: String,
        from: OperationStatus,
        action: &'static str,
    },

    /// The item reached max_attempts and is frozen in FAILED.
    ///
    /// Requires administrative intervention: resubmit or purge.
    #[error("Queued operation {id} failed after {attempts} attempts: {last_error}")]
    AttemptsExhausted {
        id: String,
        attempts: u32,
        last_error: String,
    },
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Convenience type alias for Results with DomainError.
pub type DomainResult<T> = Result<T, DomainError>;

/// Convenience type alias for Results with QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

// =============================================================================
// Unit Tests
// =============================================================================
