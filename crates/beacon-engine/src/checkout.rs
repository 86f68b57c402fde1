//! Settle now, or defer to the offline queue when the primary store is down.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use beacon_core::settlement::sale_idempotency_key;
use beacon_core::{NewOperation, OperationPayload, SalePayload, SettlementReceipt};

use crate::error::{EngineError, EngineResult};
use crate::offline::OfflineQueue;
use crate::settlement::{PaymentOrchestrator, SettlementRequest};

/// What the terminal tells the cashier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckoutOutcome {
    /// Settled online; print the receipt.
    Settled(SettlementReceipt),
    /// Captured for replay; the sale completes when the queue drains.
    Deferred { operation_id: String },
}

#[derive(Clone)]
pub struct Checkout {
    orchestrator: Arc<PaymentOrchestrator>,
    queue: Arc<OfflineQueue>,
}

impl Checkout {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>, queue: Arc<OfflineQueue>) -> Self {
        Checkout { orchestrator, queue }
    }

    /// Attempts online settlement and falls back to the queue when the
    /// primary store is unreachable.
    ///
    /// The idempotency key is fixed before the online attempt, so a commit
    /// that landed before the connection dropped is recognised on replay.
    /// Validation and domain errors are returned unchanged.
    pub async fn settle_or_defer(
        &self,
        request: SettlementRequest,
        terminal_id: i64,
        cashier_id: i64,
    ) -> EngineResult<CheckoutOutcome> {
        let key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| sale_idempotency_key(request.cart_id, Utc::now()));
        let request = request.with_idempotency_key(key.clone());

        match self.orchestrator.settle(request.clone()).await {
            Ok(receipt) => Ok(CheckoutOutcome::Settled(receipt)),
            Err(EngineError::Persistence(reason)) => {
                warn!(cart_id = request.cart_id, %reason, "Primary store unreachable, deferring sale");

                let payload = OperationPayload::Sale(SalePayload {
                    cart_id: request.cart_id,
                    legs: request.legs,
                    idempotency_key: key,
                });
                let operation = NewOperation::new(payload, terminal_id, cashier_id)
                    .with_notes(format!("deferred: {}", reason));
                let operation_id = self.queue.enqueue(operation).await?;

                info!(cart_id = request.cart_id, %operation_id, "Sale deferred");
                Ok(CheckoutOutcome::Deferred { operation_id })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{InProcessLocks, LockManager, LockSettings};
    use crate::testing::{Faults, MemoryGateway};
    use beacon_core::{
        DomainError, Money, OperationStatus, PaymentMethod, RetentionPolicy, RetryPolicy,
    };
    use beacon_db::{Database, DbConfig};

    async fn checkout(gateway: &MemoryGateway) -> (Checkout, Arc<OfflineQueue>) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = Arc::new(OfflineQueue::new(
            Arc::new(db.queue()),
            RetryPolicy::default(),
            RetentionPolicy::default(),
        ));
        let locks = LockManager::new(Arc::new(InProcessLocks::new()), "terminal-3", LockSettings::default());
        let orchestrator = Arc::new(PaymentOrchestrator::new(Arc::new(gateway.clone()), locks, 1));
        (Checkout::new(orchestrator, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_settles_online_when_store_is_up() {
        let gateway = MemoryGateway::with_cart_42();
        let (checkout, queue) = checkout(&gateway).await;

        let outcome = checkout
            .settle_or_defer(
                SettlementRequest::single(42, PaymentMethod::Cash, Money::from_cents(10000)),
                3,
                9,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, CheckoutOutcome::Settled(ref r) if r.total_cents == 10000));
        let sale = &gateway.sales()[0];
        assert!(sale.idempotency_key.as_deref().unwrap().starts_with("SALE:cart-42:"));
        assert_eq!(queue.stats(None).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_defers_when_store_is_down() {
        let gateway = MemoryGateway::with_cart_42();
        gateway.set_faults(Faults {
            unavailable: true,
            ..Faults::default()
        });
        let (checkout, queue) = checkout(&gateway).await;

        let outcome = checkout
            .settle_or_defer(
                SettlementRequest::single(42, PaymentMethod::Cash, Money::from_cents(10000))
                    .with_idempotency_key("SALE:cart-42:1700000000000"),
                3,
                9,
            )
            .await
            .unwrap();

        let CheckoutOutcome::Deferred { operation_id } = outcome else {
            panic!("expected deferral, got {outcome:?}");
        };
        let op = queue.get(&operation_id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!((op.terminal_id, op.cashier_id), (3, 9));
        assert!(op.notes.as_deref().unwrap().starts_with("deferred:"));
        match op.payload {
            OperationPayload::Sale(sale) => {
                assert_eq!(sale.cart_id, 42);
                assert_eq!(sale.idempotency_key, "SALE:cart-42:1700000000000");
                assert_eq!(sale.legs.len(), 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_deferred() {
        let gateway = MemoryGateway::with_cart_42();
        let (checkout, queue) = checkout(&gateway).await;

        let err = checkout
            .settle_or_defer(
                SettlementRequest::single(42, PaymentMethod::Cash, Money::from_cents(4000)),
                3,
                9,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Domain(DomainError::AmountMismatch { .. })));
        assert_eq!(queue.stats(None).await.unwrap().total(), 0);
    }
}
