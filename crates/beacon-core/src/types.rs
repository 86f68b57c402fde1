//! # Domain Types
//!
//! Core domain types used throughout Beacon POS settlement and offline sync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Cart       │   │      Sale       │   │    Payment      │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (i64)       │──►│  cart_id (FK)   │◄──│  sale_id (FK)   │       │
//! │  │  status         │   │  receipt_number │   │  method         │       │
//! │  │  lines[]        │   │  idempotency_key│   │  amount_cents   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────┐     │
//! │  │  QueuedOperation (id: UUID v4)                                │     │
//! │  │  ───────────────────────────────────────────────────────────  │     │
//! │  │  payload: OperationPayload ── Sale | Refund | StockDecrement  │     │
//! │  │  status:  PENDING → PROCESSING → DONE | PENDING | FAILED      │     │
//! │  │  attempt_count ≤ max_attempts, priority 1..=5                 │     │
//! │  └───────────────────────────────────────────────────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Carts, sales, payments and products use store-assigned integer ids.
//! Queued operations use UUID v4 strings because they are created while the
//! primary store is unreachable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Cart
// =============================================================================

/// Lifecycle status of a cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CartStatus {
    /// Items are being scanned; the only status that can be settled.
    Active,
    /// Parked by the cashier.
    Held,
    /// Settled by a sale.
    Completed,
    /// Abandoned.
    Cancelled,
}

impl CartStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Active => "ACTIVE",
            CartStatus::Held => "HELD",
            CartStatus::Completed => "COMPLETED",
            CartStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for CartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One product line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i64,
    /// Unit price in cents, frozen when the line was scanned.
    pub unit_price_cents: i64,
}

impl CartLine {
    /// Returns the unit price as Money.
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Returns quantity × unit price.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

/// Snapshot of an in-progress basket at a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    pub id: i64,
    pub terminal_id: i64,
    pub cashier_id: i64,
    pub status: CartStatus,
    /// Lines in scan order.
    pub lines: Vec<CartLine>,
    /// Whole-cart discount in cents.
    pub discount_cents: i64,
}

impl Cart {
    /// Sum of line totals before the discount.
    pub fn subtotal(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Amount the customer owes: subtotal minus discount, never below zero.
    ///
    /// ## Example
    /// ```rust
    /// use beacon_core::{Cart, CartLine, CartStatus, Money};
    ///
    /// let cart = Cart {
    ///     id: 42,
    ///     terminal_id: 1,
    ///     cashier_id: 9,
    ///     status: CartStatus::Active,
    ///     lines: vec![CartLine { product_id: 7, quantity: 2, unit_price_cents: 5000 }],
    ///     discount_cents: 0,
    /// };
    /// assert_eq!(cart.total(), Money::from_cents(10000));
    /// ```
    pub fn total(&self) -> Money {
        let total = self.subtotal() - Money::from_cents(self.discount_cents);
        if total.is_negative() {
            Money::zero()
        } else {
            total
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == CartStatus::Active
    }
}

// =============================================================================
// Sale
// =============================================================================

/// The status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    /// Created inside a settlement that has not finished yet.
    Pending,
    /// Paid, stock decremented, cart closed.
    Completed,
    Cancelled,
    /// A refund was recorded against the completed sale.
    Refunded,
}

impl SaleStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "PENDING",
            SaleStatus::Completed => "COMPLETED",
            SaleStatus::Cancelled => "CANCELLED",
            SaleStatus::Refunded => "REFUNDED",
        }
    }
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Pending
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of a purchase derived from a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: i64,
    pub cart_id: i64,
    pub terminal_id: i64,
    pub cashier_id: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub status: SaleStatus,
    /// Set only when the sale completes.
    pub receipt_number: Option<String>,
    /// Deduplication key for replayed settlements (unique when present).
    pub idempotency_key: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// Input for creating a PENDING sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSale {
    pub cart_id: i64,
    pub terminal_id: i64,
    pub cashier_id: i64,
    pub total_cents: i64,
    pub discount_cents: i64,
    pub idempotency_key: Option<String>,
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on an external terminal.
    Card,
    /// Bank transfer.
    Transfer,
    /// Marker for a tender that was itself split upstream.
    Split,
    /// Charged to a customer account.
    OpenAccount,
}

impl PaymentMethod {
    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Card => "CARD",
            PaymentMethod::Transfer => "TRANSFER",
            PaymentMethod::Split => "SPLIT",
            PaymentMethod::OpenAccount => "OPEN_ACCOUNT",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payment towards a sale.
/// A sale has one row per settlement leg; refunds add a negative row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: i64,
    pub sale_id: i64,
    pub method: PaymentMethod,
    /// Amount paid in cents (negative for refund legs).
    pub amount_cents: i64,
    /// External reference (card auth code, transfer id, etc.).
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// One tender in a settlement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentLeg {
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub reference: Option<String>,
}

impl PaymentLeg {
    pub fn new(method: PaymentMethod, amount: Money) -> Self {
        PaymentLeg {
            method,
            amount_cents: amount.cents(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// Outcome of a successful settlement, returned to the terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementReceipt {
    pub sale_id: i64,
    pub cart_id: i64,
    pub receipt_number: String,
    pub total_cents: i64,
    pub payment_ids: Vec<i64>,
    /// True when an earlier settlement with the same idempotency key was found
    /// and nothing was written.
    pub replayed: bool,
}

// =============================================================================
// Queued Operations
// =============================================================================

/// Kind of deferred operation. Always the tag of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Sale,
    Refund,
    StockDecrement,
}

impl OperationType {
    pub const ALL: [OperationType; 3] = [
        OperationType::Sale,
        OperationType::Refund,
        OperationType::StockDecrement,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationType::Sale => "SALE",
            OperationType::Refund => "REFUND",
            OperationType::StockDecrement => "STOCK_DECREMENT",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a queued operation.
///
/// ```text
/// PENDING ──begin──► PROCESSING ──complete──► DONE
///    ▲                   │
///    └──── fail (< max) ─┤
///                        └─ fail (= max) ───► FAILED ──resubmit──► PENDING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl OperationStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Processing => "PROCESSING",
            OperationStatus::Done => "DONE",
            OperationStatus::Failed => "FAILED",
        }
    }
}

impl Default for OperationStatus {
    fn default() -> Self {
        OperationStatus::Pending
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deferred settlement of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SalePayload {
    pub cart_id: i64,
    pub legs: Vec<PaymentLeg>,
    /// Stored on the sale row so a replay is recognised.
    pub idempotency_key: String,
}

/// A product quantity returned to stock by a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RestockLine {
    pub product_id: i64,
    pub quantity: i64,
}

/// Deferred refund of a completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RefundPayload {
    pub sale_id: i64,
    /// Positive amount handed back; recorded as a negative payment leg.
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub reason: Option<String>,
    #[serde(default)]
    pub restock: Vec<RestockLine>,
}

/// Deferred stock adjustment outside a settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StockDecrementPayload {
    pub product_id: i64,
    pub quantity: i64,
}

/// Typed payload of a queued operation.
///
/// Serialized adjacently tagged so the stored JSON names its own schema:
/// `{"type":"STOCK_DECREMENT","data":{"product_id":7,"quantity":2}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationPayload {
    Sale(SalePayload),
    Refund(RefundPayload),
    StockDecrement(StockDecrementPayload),
}

impl OperationPayload {
    pub fn operation_type(&self) -> OperationType {
        match self {
            OperationPayload::Sale(_) => OperationType::Sale,
            OperationPayload::Refund(_) => OperationType::Refund,
            OperationPayload::StockDecrement(_) => OperationType::StockDecrement,
        }
    }
}

/// Request to enqueue a deferred operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOperation {
    pub payload: OperationPayload,
    pub terminal_id: i64,
    pub cashier_id: i64,
    /// 1 (most urgent) ..= 5.
    pub priority: u8,
    pub notes: Option<String>,
}

impl NewOperation {
    pub fn new(payload: OperationPayload, terminal_id: i64, cashier_id: i64) -> Self {
        NewOperation {
            payload,
            terminal_id,
            cashier_id,
            priority: crate::DEFAULT_PRIORITY,
            notes: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// An operation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueuedOperation {
    /// UUID v4.
    pub id: String,
    pub operation_type: OperationType,
    pub payload: OperationPayload,
    pub terminal_id: i64,
    pub cashier_id: i64,
    pub status: OperationStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub priority: u8,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the next retry may start. Unset for fresh items.
    #[ts(as = "Option<String>")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Queue counts for administrative views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    #[ts(as = "Option<String>")]
    pub oldest_pending_at: Option<DateTime<Utc>>,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.done + self.failed
    }
}

/// Rows removed by one retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PurgeReport {
    pub done_purged: u64,
    pub failed_purged: u64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cart(lines: Vec<CartLine>, discount_cents: i64) -> Cart {
        Cart {
            id: 42,
            terminal_id: 1,
            cashier_id: 9,
            status: CartStatus::Active,
            lines,
            discount_cents,
        }
    }

    #[test]
    fn test_cart_total_with_discount() {
        let c = cart(
            vec![
                CartLine { product_id: 7, quantity: 2, unit_price_cents: 5000 },
                CartLine { product_id: 8, quantity: 1, unit_price_cents: 250 },
            ],
            250,
        );
        assert_eq!(c.subtotal().cents(), 10250);
        assert_eq!(c.total().cents(), 10000);
    }

    #[test]
    fn test_cart_total_floors_at_zero() {
        let c = cart(
            vec![CartLine { product_id: 7, quantity: 1, unit_price_cents: 100 }],
            500,
        );
        assert_eq!(c.total(), Money::zero());
    }

    #[test]
    fn test_payload_tag_matches_operation_type() {
        let payload = OperationPayload::StockDecrement(StockDecrementPayload {
            product_id: 7,
            quantity: 2,
        });
        assert_eq!(payload.operation_type(), OperationType::StockDecrement);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "STOCK_DECREMENT");
        assert_eq!(json["data"]["product_id"], 7);
    }

    #[test]
    fn test_refund_payload_restock_defaults_to_empty() {
        let json = r#"{"type":"REFUND","data":{"sale_id":3,"amount_cents":500,"method":"CASH","reason":null}}"#;
        let payload: OperationPayload = serde_json::from_str(json).unwrap();
        match payload {
            OperationPayload::Refund(refund) => {
                assert_eq!(refund.sale_id, 3);
                assert!(refund.restock.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn test_status_display_matches_stored_form() {
        assert_eq!(OperationStatus::Processing.to_string(), "PROCESSING");
        assert_eq!(PaymentMethod::OpenAccount.to_string(), "OPEN_ACCOUNT");
        assert_eq!(CartStatus::Active.to_string(), "ACTIVE");
        assert_eq!(OperationStatus::default(), OperationStatus::Pending);
    }
}
