//! # SQLite Gateways
//!
//! Binds the gateway traits to beacon-db.
//!
//! ```text
//! UnitOfWorkFactory  ← Database          (begin_settlement)
//! UnitOfWork         ← SettlementTx      (one sqlx transaction)
//! QueueStore         ← QueueRepository
//! AdvisoryLock       ← SqliteLocks       (advisory_locks table)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use beacon_core::retry::RetentionCutoffs;
use beacon_core::{
    Cart, CartStatus, Money, NewSale, OperationStatus, Payment, PaymentMethod, PurgeReport,
    QueueStats, QueuedOperation, Sale,
};
use beacon_db::{Database, LockRepository, QueueRepository, SettlementTx};

use crate::gateway::{
    AdvisoryLock, CartGateway, GatewayError, GatewayResult, QueueStore, SaleGateway, StockGateway,
    UnitOfWork, UnitOfWorkFactory,
};

// =============================================================================
// Unit of Work
// =============================================================================

#[async_trait]
impl UnitOfWorkFactory for Database {
    async fn begin(&self) -> GatewayResult<Box<dyn UnitOfWork>> {
        let tx = self.begin_settlement().await?;
        Ok(Box::new(tx))
    }
}

#[async_trait]
impl CartGateway for SettlementTx {
    async fn get_cart(&mut self, id: i64) -> GatewayResult<Option<Cart>> {
        Ok(SettlementTx::get_cart(self, id).await?)
    }

    async fn set_cart_status(&mut self, id: i64, status: CartStatus) -> GatewayResult<()> {
        Ok(SettlementTx::set_cart_status(self, id, status).await?)
    }
}

#[async_trait]
impl SaleGateway for SettlementTx {
    async fn create_sale(&mut self, sale: &NewSale) -> GatewayResult<i64> {
        Ok(SettlementTx::create_sale(self, sale).await?)
    }

    async fn add_payment(
        &mut self,
        sale_id: i64,
        method: PaymentMethod,
        amount: Money,
        reference: Option<&str>,
    ) -> GatewayResult<i64> {
        Ok(SettlementTx::add_payment(self, sale_id, method, amount.cents(), reference).await?)
    }

    async fn complete_sale(&mut self, sale_id: i64, receipt_number: &str) -> GatewayResult<()> {
        Ok(SettlementTx::complete_sale(self, sale_id, receipt_number).await?)
    }

    async fn get_sale(&mut self, id: i64) -> GatewayResult<Option<Sale>> {
        Ok(SettlementTx::get_sale(self, id).await?)
    }

    async fn find_sale_by_idempotency_key(&mut self, key: &str) -> GatewayResult<Option<Sale>> {
        Ok(SettlementTx::find_sale_by_idempotency_key(self, key).await?)
    }

    async fn payments(&mut self, sale_id: i64) -> GatewayResult<Vec<Payment>> {
        Ok(SettlementTx::payments(self, sale_id).await?)
    }

    async fn mark_refunded(&mut self, sale_id: i64) -> GatewayResult<()> {
        Ok(SettlementTx::mark_refunded(self, sale_id).await?)
    }
}

#[async_trait]
impl StockGateway for SettlementTx {
    async fn decrement(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()> {
        Ok(self.decrement_stock(product_id, quantity).await?)
    }

    async fn increment(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()> {
        Ok(self.increment_stock(product_id, quantity).await?)
    }
}

#[async_trait]
impl UnitOfWork for SettlementTx {
    async fn commit(&mut self) -> GatewayResult<()> {
        Ok(SettlementTx::commit(self).await?)
    }

    async fn rollback(&mut self) -> GatewayResult<()> {
        Ok(SettlementTx::rollback(self).await?)
    }
}

// =============================================================================
// Queue Store
// =============================================================================

#[async_trait]
impl QueueStore for QueueRepository {
    async fn insert(&self, op: &QueuedOperation) -> GatewayResult<()> {
        Ok(QueueRepository::insert(self, op).await?)
    }

    async fn get(&self, id: &str) -> GatewayResult<Option<QueuedOperation>> {
        Ok(QueueRepository::get(self, id).await?)
    }

    async fn update(&self, op: &QueuedOperation, expected: OperationStatus) -> GatewayResult<()> {
        Ok(self.update_transition(op, expected).await?)
    }

    async fn pending(
        &self,
        terminal_id: Option<i64>,
        limit: u32,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        Ok(QueueRepository::pending(self, terminal_id, limit).await?)
    }

    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        Ok(QueueRepository::due_pending(self, now, limit).await?)
    }

    async fn failed(
        &self,
        terminal_id: Option<i64>,
        limit: u32,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        Ok(QueueRepository::failed(self, terminal_id, limit).await?)
    }

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> GatewayResult<Vec<QueuedOperation>> {
        Ok(QueueRepository::stale_processing(self, started_before, limit).await?)
    }

    async fn purge(&self, cutoffs: RetentionCutoffs) -> GatewayResult<PurgeReport> {
        Ok(QueueRepository::purge(self, cutoffs).await?)
    }

    async fn stats(&self, terminal_id: Option<i64>) -> GatewayResult<QueueStats> {
        Ok(QueueRepository::stats(self, terminal_id).await?)
    }
}

// =============================================================================
// Advisory Locks
// =============================================================================

/// Leases in the `advisory_locks` table, shared by every process that opens
/// the same database file.
#[derive(Debug, Clone)]
pub struct SqliteLocks {
    repo: LockRepository,
}

impl SqliteLocks {
    pub fn new(db: &Database) -> Self {
        SqliteLocks { repo: db.locks() }
    }
}

#[async_trait]
impl AdvisoryLock for SqliteLocks {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> GatewayResult<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| GatewayError::Conflict(format!("lease ttl out of range: {}", e)))?;
        Ok(self.repo.try_acquire(key, owner, ttl, Utc::now()).await?)
    }

    async fn release(&self, key: &str, owner: &str) -> GatewayResult<()> {
        self.repo.release(key, owner).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::CartLine;
    use beacon_db::{DbConfig, NewCart};

    #[tokio::test]
    async fn test_unit_of_work_through_trait_objects() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stock().set_level(7, 3).await.unwrap();
        let cart = db
            .carts()
            .create(NewCart {
                terminal_id: 1,
                cashier_id: 9,
                lines: vec![CartLine { product_id: 7, quantity: 2, unit_price_cents: 5000 }],
                discount_cents: 0,
            })
            .await
            .unwrap();

        let factory: &dyn UnitOfWorkFactory = &db;
        let mut uow = factory.begin().await.unwrap();
        let loaded = uow.get_cart(cart.id).await.unwrap().unwrap();
        assert_eq!(loaded.lines.len(), 1);

        uow.decrement(7, 2).await.unwrap();
        assert!(matches!(
            uow.decrement(7, 2).await,
            Err(GatewayError::InsufficientStock { available: 1, .. })
        ));
        uow.rollback().await.unwrap();

        assert_eq!(db.stock().level(7).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_sqlite_locks_are_exclusive() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let locks = SqliteLocks::new(&db);
        let ttl = Duration::from_secs(30);

        assert!(locks.try_acquire("cart:42", "terminal-1", ttl).await.unwrap());
        assert!(!locks.try_acquire("cart:42", "worker", ttl).await.unwrap());
        locks.release("cart:42", "terminal-1").await.unwrap();
        assert!(locks.try_acquire("cart:42", "worker", ttl).await.unwrap());
    }
}
