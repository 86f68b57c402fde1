//! # Validation Module
//!
//! Input validation for settlement requests and queued operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization                                              │
//! │  └── OperationPayload tag must name a known schema                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE (before anything is written)                     │
//! │  ├── ids positive, priority 1..=5                                      │
//! │  ├── at least one tender, every tender positive                        │
//! │  └── payload content non-empty                                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK constraints (priority, attempt_count ≤ max_attempts)        │
//! │  └── UNIQUE (receipt_number, idempotency_key)                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Payloads are checked at enqueue time, so a malformed operation never sits
//! in the queue waiting to fail at drain time.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{NewOperation, OperationPayload, PaymentLeg};
use crate::{MAX_PRIORITY, MIN_PRIORITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of free-text notes and refund reasons.
pub const MAX_NOTES_LEN: usize = 500;

/// Maximum length of an idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

// =============================================================================
// Scalar Validators
// =============================================================================

/// Validates an entity id (cart, sale, product, terminal, cashier).
///
/// ## Example
/// ```rust
/// use beacon_core::validation::validate_id;
///
/// assert!(validate_id("cart_id", 42).is_ok());
/// assert!(validate_id("cart_id", 0).is_err());
/// ```
pub fn validate_id(field: &str, id: i64) -> ValidationResult<()> {
    if id <= 0 {
        return Err(ValidationError::must_be_positive(field));
    }
    Ok(())
}

/// Validates a quantity on a stock or restock line.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::must_be_positive("quantity"));
    }
    Ok(())
}

/// Validates a queue priority (1 = most urgent, 5 = least).
pub fn validate_priority(priority: u8) -> ValidationResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(ValidationError::OutOfRange {
            field: "priority".to_string(),
            min: MIN_PRIORITY as i64,
            max: MAX_PRIORITY as i64,
        });
    }
    Ok(())
}

fn validate_optional_text(field: &str, value: Option<&str>) -> ValidationResult<()> {
    if let Some(text) = value {
        if text.chars().count() > MAX_NOTES_LEN {
            return Err(ValidationError::TooLong {
                field: field.to_string(),
                max: MAX_NOTES_LEN,
            });
        }
    }
    Ok(())
}

/// Validates an idempotency key: non-blank, bounded, no whitespace.
pub fn validate_idempotency_key(key: &str) -> ValidationResult<()> {
    if key.trim().is_empty() {
        return Err(ValidationError::required("idempotency_key"));
    }
    if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "idempotency_key".to_string(),
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }
    if key.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "idempotency_key".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Settlement Validators
// =============================================================================

/// Validates the tenders of a settlement.
///
/// ## Rules
/// - At least one leg
/// - Every leg amount strictly positive
/// - The legs sum without overflowing
///
/// ## Example
/// ```rust
/// use beacon_core::validation::validate_legs;
/// use beacon_core::{Money, PaymentLeg, PaymentMethod};
///
/// assert!(validate_legs(&[PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(100))]).is_ok());
/// assert!(validate_legs(&[]).is_err());
/// ```
pub fn validate_legs(legs: &[PaymentLeg]) -> ValidationResult<()> {
    if legs.is_empty() {
        return Err(ValidationError::required("payments"));
    }
    if legs.iter().any(|leg| leg.amount_cents <= 0) {
        return Err(ValidationError::must_be_positive("payment amount"));
    }
    if Money::checked_sum(legs.iter().map(PaymentLeg::amount)).is_none() {
        return Err(ValidationError::OutOfRange {
            field: "payment total".to_string(),
            min: 1,
            max: i64::MAX,
        });
    }
    for leg in legs {
        validate_optional_text("payment reference", leg.reference.as_deref())?;
    }
    Ok(())
}

// =============================================================================
// Queue Validators
// =============================================================================

/// Validates that a payload carries everything its handler needs.
pub fn validate_payload(payload: &OperationPayload) -> ValidationResult<()> {
    match payload {
        OperationPayload::Sale(sale) => {
            validate_id("cart_id", sale.cart_id)?;
            validate_legs(&sale.legs)?;
            validate_idempotency_key(&sale.idempotency_key)
        }
        OperationPayload::Refund(refund) => {
            validate_id("sale_id", refund.sale_id)?;
            if refund.amount_cents <= 0 {
                return Err(ValidationError::must_be_positive("refund amount"));
            }
            validate_optional_text("reason", refund.reason.as_deref())?;
            for line in &refund.restock {
                validate_id("product_id", line.product_id)?;
                validate_quantity(line.quantity)?;
            }
            Ok(())
        }
        OperationPayload::StockDecrement(stock) => {
            validate_id("product_id", stock.product_id)?;
            validate_quantity(stock.quantity)
        }
    }
}

/// Validates an enqueue request.
///
/// ## Example
/// ```rust
/// use beacon_core::validation::validate_new_operation;
/// use beacon_core::{NewOperation, OperationPayload, StockDecrementPayload};
///
/// let payload = OperationPayload::StockDecrement(StockDecrementPayload { product_id: 7, quantity: 2 });
/// assert!(validate_new_operation(&NewOperation::new(payload.clone(), 1, 9)).is_ok());
/// assert!(validate_new_operation(&NewOperation::new(payload.clone(), 0, 9)).is_err());
/// assert!(validate_new_operation(&NewOperation::new(payload, 1, 9).with_priority(6)).is_err());
/// ```
pub fn validate_new_operation(op: &NewOperation) -> ValidationResult<()> {
    validate_id("terminal_id", op.terminal_id)?;
    validate_id("cashier_id", op.cashier_id)?;
    validate_priority(op.priority)?;
    validate_optional_text("notes", op.notes.as_deref())?;
    validate_payload(&op.payload)
}

// =============================================================================
// Unit Tests
// =============================================================================
