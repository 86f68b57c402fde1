//! # Queue Handlers
//!
//! One handler per operation type, looked up by the synchronizer.
//!
//! ```text
//! SALE            → PaymentOrchestrator::settle   (idempotency key on the sale row)
//! REFUND          → PaymentOrchestrator::refund   (no-op once REFUNDED)
//! STOCK_DECREMENT → unit of work: decrement + commit
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use beacon_core::validation::{validate_id, validate_quantity};
use beacon_core::{OperationPayload, OperationType, QueuedOperation, ValidationError};

use crate::error::EngineResult;
use crate::gateway::{StockGateway, UnitOfWorkFactory};
use crate::settlement::{PaymentOrchestrator, RefundRequest, SettlementRequest};

/// Applies one queued operation against the primary store.
///
/// Handlers may run more than once for the same item; each must tolerate
/// replay of work that already committed.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    fn operation_type(&self) -> OperationType;

    async fn handle(&self, op: &QueuedOperation) -> EngineResult<()>;
}

fn payload_mismatch(op: &QueuedOperation, expected: OperationType) -> ValidationError {
    ValidationError::InvalidFormat {
        field: "payload".to_string(),
        reason: format!(
            "expected {} payload, got {}",
            expected,
            op.payload.operation_type()
        ),
    }
}

// =============================================================================
// Handlers
// =============================================================================

pub struct SaleHandler {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl SaleHandler {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        SaleHandler { orchestrator }
    }
}

#[async_trait]
impl OperationHandler for SaleHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::Sale
    }

    async fn handle(&self, op: &QueuedOperation) -> EngineResult<()> {
        let OperationPayload::Sale(sale) = &op.payload else {
            return Err(payload_mismatch(op, OperationType::Sale).into());
        };

        let request = SettlementRequest::split(sale.cart_id, sale.legs.clone())
            .with_idempotency_key(sale.idempotency_key.clone());
        let receipt = self.orchestrator.settle(request).await?;

        debug!(
            id = %op.id,
            sale_id = receipt.sale_id,
            replayed = receipt.replayed,
            "Deferred sale applied"
        );
        Ok(())
    }
}

pub struct RefundHandler {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl RefundHandler {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        RefundHandler { orchestrator }
    }
}

#[async_trait]
impl OperationHandler for RefundHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::Refund
    }

    async fn handle(&self, op: &QueuedOperation) -> EngineResult<()> {
        let OperationPayload::Refund(refund) = &op.payload else {
            return Err(payload_mismatch(op, OperationType::Refund).into());
        };

        let receipt = self
            .orchestrator
            .refund(RefundRequest::from(refund.clone()))
            .await?;

        debug!(id = %op.id, sale_id = receipt.sale_id, replayed = receipt.replayed, "Deferred refund applied");
        Ok(())
    }
}

/// Not idempotent: a replay after a commit whose completion was lost
/// decrements twice.
pub struct StockDecrementHandler {
    units: Arc<dyn UnitOfWorkFactory>,
}

impl StockDecrementHandler {
    pub fn new(units: Arc<dyn UnitOfWorkFactory>) -> Self {
        StockDecrementHandler { units }
    }
}

#[async_trait]
impl OperationHandler for StockDecrementHandler {
    fn operation_type(&self) -> OperationType {
        OperationType::StockDecrement
    }

    async fn handle(&self, op: &QueuedOperation) -> EngineResult<()> {
        let OperationPayload::StockDecrement(stock) = &op.payload else {
            return Err(payload_mismatch(op, OperationType::StockDecrement).into());
        };
        validate_id("product_id", stock.product_id)?;
        validate_quantity(stock.quantity)?;

        let mut uow = self.units.begin().await?;
        if let Err(e) = uow.decrement(stock.product_id, stock.quantity).await {
            uow.rollback().await?;
            return Err(e.into());
        }
        uow.commit().await?;

        debug!(id = %op.id, product_id = stock.product_id, quantity = stock.quantity, "Deferred stock decrement applied");
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Handlers keyed by operation type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<OperationType, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// SALE, REFUND and STOCK_DECREMENT handlers over one primary store.
    pub fn with_defaults(
        orchestrator: Arc<PaymentOrchestrator>,
        units: Arc<dyn UnitOfWorkFactory>,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SaleHandler::new(orchestrator.clone())));
        registry.register(Arc::new(RefundHandler::new(orchestrator)));
        registry.register(Arc::new(StockDecrementHandler::new(units)));
        registry
    }

    /// Registers a handler, replacing any previous one for its type.
    pub fn register(&mut self, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(handler.operation_type(), handler);
    }

    pub fn get(&self, operation_type: OperationType) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&operation_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
