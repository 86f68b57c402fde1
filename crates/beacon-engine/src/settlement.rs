//! # Payment Orchestrator
//!
//! Settles a cart against one or more tenders inside a single unit of work,
//! and refunds completed sales.
//!
//! ## Settlement Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  settle(cart 42, [CASH $60, CARD $40])                                  │
//! │       │                                                                 │
//! │       ├── validate ids / legs / key          ── ValidationError         │
//! │       ├── lock "cart:42"                     ── LockTimeout             │
//! │       ├── begin unit of work                 ── Persistence             │
//! │       ├── key already on a COMPLETED sale?   ── replayed receipt        │
//! │       ├── load cart (ACTIVE?)                ── NotFound / InvalidState │
//! │       ├── Σ legs vs total                    ── AmountMismatch          │
//! │       │                                                                 │
//! │       │   ┌──────────── mutations ─────────────┐                        │
//! │       ├── │ create sale (PENDING)              │                        │
//! │       ├── │ one payment row per leg            │                        │
//! │       ├── │ decrement stock per line           │── StockUnavailable     │
//! │       ├── │ re-check cart ACTIVE               │── AlreadySettled       │
//! │       ├── │ complete sale + receipt number     │                        │
//! │       ├── │ cart → COMPLETED                   │                        │
//! │       │   └────────────────────────────────────┘                        │
//! │       ├── commit                                                        │
//! │       └── release lock                                                  │
//! │                                                                         │
//! │  On any error after begin: applied decrements are compensated with     │
//! │  increments in reverse order, then the unit of work is rolled back.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use beacon_core::settlement::receipt_number;
use beacon_core::validation::{
    validate_id, validate_idempotency_key, validate_legs, validate_quantity,
};
use beacon_core::{
    CartLine, CartStatus, DomainError, Money, NewSale, PaymentLeg, PaymentMethod, RefundPayload,
    RestockLine, Sale, SaleStatus, SettlementPlan, SettlementReceipt, ValidationError,
};

use crate::error::{EngineError, EngineResult};
use crate::gateway::{
    CartGateway, GatewayError, SaleGateway, StockGateway, UnitOfWork, UnitOfWorkFactory,
};
use crate::lock::LockManager;

/// Advisory lock key serializing settlement of one cart.
pub fn cart_lock_key(cart_id: i64) -> String {
    format!("cart:{}", cart_id)
}

/// Advisory lock key serializing refunds of one sale.
pub fn sale_lock_key(sale_id: i64) -> String {
    format!("sale:{}", sale_id)
}

// =============================================================================
// Requests
// =============================================================================

/// Settlement of one cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub cart_id: i64,
    pub legs: Vec<PaymentLeg>,
    /// Replays carrying a key that already completed a sale return that sale.
    pub idempotency_key: Option<String>,
}

impl SettlementRequest {
    pub fn single(cart_id: i64, method: PaymentMethod, amount: Money) -> Self {
        SettlementRequest {
            cart_id,
            legs: vec![PaymentLeg::new(method, amount)],
            idempotency_key: None,
        }
    }

    pub fn split(cart_id: i64, legs: Vec<PaymentLeg>) -> Self {
        SettlementRequest {
            cart_id,
            legs,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Refund of a completed sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub sale_id: i64,
    pub amount: Money,
    pub method: PaymentMethod,
    pub reason: Option<String>,
    pub restock: Vec<RestockLine>,
}

impl From<RefundPayload> for RefundRequest {
    fn from(payload: RefundPayload) -> Self {
        RefundRequest {
            sale_id: payload.sale_id,
            amount: Money::from_cents(payload.amount_cents),
            method: payload.method,
            reason: payload.reason,
            restock: payload.restock,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub sale_id: i64,
    /// The negative payment leg; `None` when the sale was already refunded.
    pub payment_id: Option<i64>,
    pub refunded_cents: i64,
    pub replayed: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs settlements and refunds against a [`UnitOfWorkFactory`].
#[derive(Clone)]
pub struct PaymentOrchestrator {
    units: Arc<dyn UnitOfWorkFactory>,
    locks: LockManager,
    tolerance_cents: i64,
}

impl PaymentOrchestrator {
    pub fn new(units: Arc<dyn UnitOfWorkFactory>, locks: LockManager, tolerance_cents: i64) -> Self {
        PaymentOrchestrator {
            units,
            locks,
            tolerance_cents,
        }
    }

    /// Settles a cart with a single tender.
    pub async fn settle_single(
        &self,
        cart_id: i64,
        method: PaymentMethod,
        amount: Money,
    ) -> EngineResult<SettlementReceipt> {
        self.settle(SettlementRequest::single(cart_id, method, amount)).await
    }

    /// Settles a cart across several tenders.
    pub async fn settle_split(
        &self,
        cart_id: i64,
        legs: Vec<PaymentLeg>,
    ) -> EngineResult<SettlementReceipt> {
        self.settle(SettlementRequest::split(cart_id, legs)).await
    }

    /// Settles a cart.
    ///
    /// All or nothing: on error no sale is reachable, the cart keeps its
    /// status and stock levels are unchanged.
    ///
    /// Once validated, the settlement runs on its own task and is not
    /// cancelled when the caller stops waiting: the lease is always released
    /// and failed stock decrements are always compensated.
    pub async fn settle(&self, request: SettlementRequest) -> EngineResult<SettlementReceipt> {
        validate_id("cart_id", request.cart_id)?;
        validate_legs(&request.legs)?;
        if let Some(key) = request.idempotency_key.as_deref() {
            validate_idempotency_key(key)?;
        }

        let cart_id = request.cart_id;
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.settle_exclusive(request).await })
            .await
            .map_err(|e| EngineError::Task(format!("settlement of cart {}: {}", cart_id, e)))?
    }

    async fn settle_exclusive(&self, request: SettlementRequest) -> EngineResult<SettlementReceipt> {
        let lease = self.locks.acquire(&cart_lock_key(request.cart_id)).await?;
        let result = self.settle_locked(&request).await;
        self.locks.release_quietly(lease).await;

        match &result {
            Ok(receipt) if receipt.replayed => info!(
                cart_id = request.cart_id,
                sale_id = receipt.sale_id,
                "Settlement replayed, sale already completed"
            ),
            Ok(receipt) => info!(
                cart_id = request.cart_id,
                sale_id = receipt.sale_id,
                receipt_number = %receipt.receipt_number,
                total_cents = receipt.total_cents,
                legs = request.legs.len(),
                "Sale settled"
            ),
            Err(e) => warn!(
                cart_id = request.cart_id,
                category = %e.category(),
                error = %e,
                "Settlement failed"
            ),
        }
        result
    }

    async fn settle_locked(&self, request: &SettlementRequest) -> EngineResult<SettlementReceipt> {
        let mut uow = self.units.begin().await?;
        let mut decremented = Vec::new();

        let outcome = self
            .apply_settlement(uow.as_mut(), request, &mut decremented)
            .await;
        match outcome {
            Ok(receipt) if receipt.replayed => {
                rollback_quietly(uow.as_mut()).await;
                Ok(receipt)
            }
            Ok(receipt) => {
                uow.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                restore_stock(uow.as_mut(), &decremented).await;
                rollback_quietly(uow.as_mut()).await;
                Err(err)
            }
        }
    }

    async fn apply_settlement(
        &self,
        uow: &mut dyn UnitOfWork,
        request: &SettlementRequest,
        decremented: &mut Vec<(i64, i64)>,
    ) -> EngineResult<SettlementReceipt> {
        let cart_id = request.cart_id;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(sale) = uow.find_sale_by_idempotency_key(key).await? {
                return replayed_receipt(uow, sale).await;
            }
        }

        let cart = uow
            .get_cart(cart_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Cart", cart_id))?;
        if !cart.is_active() {
            return Err(DomainError::invalid_state("Cart", cart_id, cart.status).into());
        }

        let plan = SettlementPlan::check(&cart, &request.legs, self.tolerance_cents)?;

        let sale_id = uow
            .create_sale(&NewSale {
                cart_id,
                terminal_id: cart.terminal_id,
                cashier_id: cart.cashier_id,
                total_cents: plan.total.cents(),
                discount_cents: cart.discount_cents,
                idempotency_key: request.idempotency_key.clone(),
            })
            .await?;

        let mut payment_ids = Vec::with_capacity(request.legs.len());
        for leg in &request.legs {
            let payment_id = uow
                .add_payment(sale_id, leg.method, leg.amount(), leg.reference.as_deref())
                .await?;
            payment_ids.push(payment_id);
        }

        for line in &cart.lines {
            uow.decrement(line.product_id, line.quantity)
                .await
                .map_err(|e| stock_error(line, e))?;
            decremented.push((line.product_id, line.quantity));
            debug!(sale_id, product_id = line.product_id, quantity = line.quantity, "Stock decremented");
        }

        let still_active = uow
            .get_cart(cart_id)
            .await?
            .is_some_and(|current| current.status == CartStatus::Active);
        if !still_active {
            return Err(DomainError::AlreadySettled { cart_id }.into());
        }

        let receipt_number = receipt_number(cart.terminal_id, sale_id, Utc::now());
        uow.complete_sale(sale_id, &receipt_number).await?;
        uow.set_cart_status(cart_id, CartStatus::Completed).await?;

        Ok(SettlementReceipt {
            sale_id,
            cart_id,
            receipt_number,
            total_cents: plan.total.cents(),
            payment_ids,
            replayed: false,
        })
    }

    // =========================================================================
    // Refunds
    // =========================================================================

    /// Refunds a completed sale, returning restocked lines to inventory.
    ///
    /// Refunding a sale that is already REFUNDED succeeds without effects.
    /// Runs to completion on its own task, like [`Self::settle`].
    pub async fn refund(&self, request: RefundRequest) -> EngineResult<RefundReceipt> {
        validate_id("sale_id", request.sale_id)?;
        if !request.amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "refund amount".to_string(),
            }
            .into());
        }
        for line in &request.restock {
            validate_id("product_id", line.product_id)?;
            validate_quantity(line.quantity)?;
        }

        let sale_id = request.sale_id;
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.refund_exclusive(request).await })
            .await
            .map_err(|e| EngineError::Task(format!("refund of sale {}: {}", sale_id, e)))?
    }

    async fn refund_exclusive(&self, request: RefundRequest) -> EngineResult<RefundReceipt> {
        let lease = self.locks.acquire(&sale_lock_key(request.sale_id)).await?;
        let result = self.refund_locked(&request).await;
        self.locks.release_quietly(lease).await;

        match &result {
            Ok(receipt) if receipt.replayed => {
                info!(sale_id = request.sale_id, "Refund replayed, sale already refunded")
            }
            Ok(receipt) => info!(
                sale_id = request.sale_id,
                refunded_cents = receipt.refunded_cents,
                restocked = request.restock.len(),
                "Sale refunded"
            ),
            Err(e) => warn!(sale_id = request.sale_id, error = %e, "Refund failed"),
        }
        result
    }

    async fn refund_locked(&self, request: &RefundRequest) -> EngineResult<RefundReceipt> {
        let mut uow = self.units.begin().await?;
        let mut restocked = Vec::new();

        let outcome = apply_refund(uow.as_mut(), request, &mut restocked).await;
        match outcome {
            Ok(receipt) if receipt.replayed => {
                rollback_quietly(uow.as_mut()).await;
                Ok(receipt)
            }
            Ok(receipt) => {
                uow.commit().await?;
                Ok(receipt)
            }
            Err(err) => {
                for &(product_id, quantity) in restocked.iter().rev() {
                    if let Err(e) = uow.decrement(product_id, quantity).await {
                        warn!(product_id, quantity, error = %e, "Failed to undo restock");
                    }
                }
                rollback_quietly(uow.as_mut()).await;
                Err(err)
            }
        }
    }
}

async fn apply_refund(
    uow: &mut dyn UnitOfWork,
    request: &RefundRequest,
    restocked: &mut Vec<(i64, i64)>,
) -> EngineResult<RefundReceipt> {
    let sale_id = request.sale_id;
    let sale = uow
        .get_sale(sale_id)
        .await?
        .ok_or_else(|| DomainError::not_found("Sale", sale_id))?;

    match sale.status {
        SaleStatus::Refunded => {
            return Ok(RefundReceipt {
                sale_id,
                payment_id: None,
                refunded_cents: 0,
                replayed: true,
            })
        }
        SaleStatus::Completed => {}
        other => return Err(DomainError::invalid_state("Sale", sale_id, other).into()),
    }

    if request.amount > sale.total() {
        return Err(ValidationError::OutOfRange {
            field: "refund amount".to_string(),
            min: 1,
            max: sale.total_cents,
        }
        .into());
    }

    let payment_id = uow
        .add_payment(sale_id, request.method, -request.amount, request.reason.as_deref())
        .await?;

    for line in &request.restock {
        uow.increment(line.product_id, line.quantity).await?;
        restocked.push((line.product_id, line.quantity));
    }

    uow.mark_refunded(sale_id).await?;

    Ok(RefundReceipt {
        sale_id,
        payment_id: Some(payment_id),
        refunded_cents: request.amount.cents(),
        replayed: false,
    })
}

// =============================================================================
// Helpers
// =============================================================================

async fn replayed_receipt(uow: &mut dyn UnitOfWork, sale: Sale) -> EngineResult<SettlementReceipt> {
    if !matches!(sale.status, SaleStatus::Completed | SaleStatus::Refunded) {
        return Err(DomainError::invalid_state("Sale", sale.id, sale.status).into());
    }
    let receipt_number = sale
        .receipt_number
        .clone()
        .ok_or_else(|| DomainError::invalid_state("Sale", sale.id, "missing receipt number"))?;

    let payment_ids = uow
        .payments(sale.id)
        .await?
        .into_iter()
        .filter(|p| p.amount_cents > 0)
        .map(|p| p.id)
        .collect();

    Ok(SettlementReceipt {
        sale_id: sale.id,
        cart_id: sale.cart_id,
        receipt_number,
        total_cents: sale.total_cents,
        payment_ids,
        replayed: true,
    })
}

fn stock_error(line: &CartLine, err: GatewayError) -> EngineError {
    match err {
        GatewayError::NotFound { .. } => DomainError::StockUnavailable {
            product_id: line.product_id,
            requested: line.quantity,
            reason: "product is not stocked".to_string(),
        }
        .into(),
        other => other.into(),
    }
}

/// Puts back decremented stock, newest first.
async fn restore_stock(uow: &mut dyn UnitOfWork, decremented: &[(i64, i64)]) {
    for &(product_id, quantity) in decremented.iter().rev() {
        if let Err(e) = uow.increment(product_id, quantity).await {
            warn!(product_id, quantity, error = %e, "Failed to compensate stock decrement");
        }
    }
}

async fn rollback_quietly(uow: &mut dyn UnitOfWork) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
