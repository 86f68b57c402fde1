//! # Settlement Math
//!
//! The pure parts of settling a cart: matching tendered legs against the cart
//! total, numbering receipts, and deriving idempotency keys for deferred
//! settlements.

use chrono::{DateTime, Utc};

use crate::error::{DomainError, DomainResult};
use crate::money::Money;
use crate::types::{Cart, PaymentLeg};

/// Largest accepted difference between tendered and owed, in cents.
pub const DEFAULT_AMOUNT_TOLERANCE_CENTS: i64 = 1;

/// A cart whose tenders were checked against its total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub cart_id: i64,
    pub total: Money,
    pub tendered: Money,
}

impl SettlementPlan {
    /// Sums the legs and compares against the cart total.
    ///
    /// A mismatch means `|tendered - total| > tolerance_cents`.
    ///
    /// ## Example
    /// ```rust
    /// use beacon_core::{Cart, CartLine, CartStatus, DomainError, Money, PaymentLeg,
    ///     PaymentMethod, SettlementPlan};
    ///
    /// let cart = Cart {
    ///     id: 42, terminal_id: 1, cashier_id: 9, status: CartStatus::Active,
    ///     lines: vec![CartLine { product_id: 7, quantity: 2, unit_price_cents: 5000 }],
    ///     discount_cents: 0,
    /// };
    /// let short = [PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(4000))];
    /// assert!(matches!(
    ///     SettlementPlan::check(&cart, &short, 1),
    ///     Err(DomainError::AmountMismatch { .. })
    /// ));
    /// ```
    pub fn check(cart: &Cart, legs: &[PaymentLeg], tolerance_cents: i64) -> DomainResult<Self> {
        let total = cart.total();
        // An overflowing tender can never match; clamp it so it reports as one.
        let tendered = legs
            .iter()
            .fold(Money::zero(), |acc, leg| acc.saturating_add(leg.amount()));

        if !total.matches(tendered, tolerance_cents) {
            return Err(DomainError::AmountMismatch {
                cart_id: cart.id,
                expected: total,
                tendered,
            });
        }

        Ok(SettlementPlan {
            cart_id: cart.id,
            total,
            tendered,
        })
    }
}

/// Generates the receipt number printed for a completed sale.
///
/// Format: `YYYYMMDD-T{terminal:03}-{sale_id:06}`. Unique because sale ids are.
///
/// ## Example
/// ```rust
/// use beacon_core::settlement::receipt_number;
/// use chrono::{TimeZone, Utc};
///
/// let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
/// assert_eq!(receipt_number(3, 1042, at), "20240115-T003-001042");
/// ```
pub fn receipt_number(terminal_id: i64, sale_id: i64, at: DateTime<Utc>) -> String {
    format!("{}-T{:03}-{:06}", at.format("%Y%m%d"), terminal_id, sale_id)
}

/// Idempotency key for a settlement deferred to the offline queue.
///
/// Cart id plus the enqueue instant in milliseconds: a replay of the same
/// queued item carries the same key, a later re-deferral of the same cart does
/// not.
pub fn sale_idempotency_key(cart_id: i64, enqueued_at: DateTime<Utc>) -> String {
    format!("SALE:cart-{}:{}", cart_id, enqueued_at.timestamp_millis())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CartLine, CartStatus, PaymentMethod};
    use chrono::TimeZone;

    fn cart_42() -> Cart {
        Cart {
            id: 42,
            terminal_id: 1,
            cashier_id: 9,
            status: CartStatus::Active,
            lines: vec![CartLine {
                product_id: 7,
                quantity: 2,
                unit_price_cents: 5000,
            }],
            discount_cents: 0,
        }
    }

    #[test]
    fn test_exact_single_leg_matches() {
        let legs = [PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(10000))];
        let plan = SettlementPlan::check(&cart_42(), &legs, 1).unwrap();
        assert_eq!(plan.total, Money::from_cents(10000));
    }

    #[test]
    fn test_split_legs_within_tolerance() {
        let legs = [
            PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(3333)),
            PaymentLeg::new(PaymentMethod::Card, Money::from_cents(3333)),
            PaymentLeg::new(PaymentMethod::Transfer, Money::from_cents(3333)),
        ];
        assert!(SettlementPlan::check(&cart_42(), &legs, 1).is_ok());
        assert!(SettlementPlan::check(&cart_42(), &legs, 0).is_err());
    }

    #[test]
    fn test_overpayment_is_mismatch() {
        let legs = [PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(10002))];
        let err = SettlementPlan::check(&cart_42(), &legs, 1).unwrap_err();
        assert_eq!(
            err,
            DomainError::AmountMismatch {
                cart_id: 42,
                expected: Money::from_cents(10000),
                tendered: Money::from_cents(10002),
            }
        );
    }

    #[test]
    fn test_overflowing_tender_is_mismatch() {
        let legs = [
            PaymentLeg::new(PaymentMethod::Card, Money::from_cents(i64::MAX)),
            PaymentLeg::new(PaymentMethod::Card, Money::from_cents(i64::MAX)),
            PaymentLeg::new(PaymentMethod::Cash, Money::from_cents(10002)),
        ];
        let err = SettlementPlan::check(&cart_42(), &legs, 1).unwrap_err();
        assert!(matches!(
            err,
            DomainError::AmountMismatch { tendered, .. } if tendered == Money::from_cents(i64::MAX)
        ));
    }

    #[test]
    fn test_idempotency_key_is_stable() {
        let at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(sale_idempotency_key(42, at), sale_idempotency_key(42, at));
        assert_eq!(sale_idempotency_key(42, at), "SALE:cart-42:1705314600000");
    }
}
