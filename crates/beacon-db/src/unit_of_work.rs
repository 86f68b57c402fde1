//! # Settlement Transaction Scope
//!
//! One SQLite transaction owned by one settlement or refund.
//!
//! ## Scope
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  db.begin_settlement()                                                  │
//! │       │   BEGIN                                                         │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  SettlementTx                                                   │   │
//! │  │  get_cart → create_sale → add_payment × n → decrement × lines  │   │
//! │  │  → complete_sale → set_cart_status                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ├── commit()    COMMIT   (all effects visible at once)           │
//! │       └── rollback()  ROLLBACK (no effect visible, ever)               │
//! │                                                                         │
//! │  Dropped without either? sqlx rolls back when the connection returns   │
//! │  to the pool.                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! After `commit` or `rollback` every method fails with
//! [`DbError::TransactionFailed`].

use chrono::Utc;
use std::fmt;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{cart, sale, stock};
use beacon_core::{Cart, CartStatus, NewSale, Payment, PaymentMethod, Sale};

/// Open transaction for one settlement.
pub struct SettlementTx {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl fmt::Debug for SettlementTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettlementTx")
            .field("open", &self.is_open())
            .finish()
    }
}

impl SettlementTx {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        SettlementTx { tx: Some(tx) }
    }

    /// True until commit or rollback.
    pub fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    fn conn(&mut self) -> DbResult<&mut SqliteConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DbError::TransactionFailed(
                "settlement transaction already finished".to_string(),
            )),
        }
    }

    // ===== Carts =====

    pub async fn get_cart(&mut self, id: i64) -> DbResult<Option<Cart>> {
        cart::fetch_cart(self.conn()?, id).await
    }

    pub async fn set_cart_status(&mut self, id: i64, status: CartStatus) -> DbResult<()> {
        cart::update_cart_status(self.conn()?, id, status, Utc::now()).await
    }

    // ===== Sales =====

    pub async fn create_sale(&mut self, new_sale: &NewSale) -> DbResult<i64> {
        sale::insert_sale(self.conn()?, new_sale, Utc::now()).await
    }

    pub async fn add_payment(
        &mut self,
        sale_id: i64,
        method: PaymentMethod,
        amount_cents: i64,
        reference: Option<&str>,
    ) -> DbResult<i64> {
        sale::insert_payment(self.conn()?, sale_id, method, amount_cents, reference, Utc::now())
            .await
    }

    pub async fn complete_sale(&mut self, sale_id: i64, receipt_number: &str) -> DbResult<()> {
        sale::complete_sale(self.conn()?, sale_id, receipt_number, Utc::now()).await
    }

    pub async fn get_sale(&mut self, id: i64) -> DbResult<Option<Sale>> {
        sale::fetch_sale(self.conn()?, id).await
    }

    pub async fn find_sale_by_idempotency_key(&mut self, key: &str) -> DbResult<Option<Sale>> {
        sale::fetch_sale_by_key(self.conn()?, key).await
    }

    pub async fn payments(&mut self, sale_id: i64) -> DbResult<Vec<Payment>> {
        sale::fetch_payments(self.conn()?, sale_id).await
    }

    pub async fn mark_refunded(&mut self, sale_id: i64) -> DbResult<()> {
        sale::mark_refunded(self.conn()?, sale_id).await
    }

    // ===== Stock =====

    pub async fn decrement_stock(&mut self, product_id: i64, quantity: i64) -> DbResult<()> {
        stock::decrement_stock(self.conn()?, product_id, quantity, Utc::now()).await
    }

    pub async fn increment_stock(&mut self, product_id: i64, quantity: i64) -> DbResult<()> {
        stock::increment_stock(self.conn()?, product_id, quantity, Utc::now()).await
    }

    // ===== Outcome =====

    /// Makes every effect of the scope visible.
    pub async fn commit(&mut self) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionFailed("settlement transaction already finished".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Settlement transaction committed");
        Ok(())
    }

    /// Discards every effect of the scope.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DbError::TransactionFailed("settlement transaction already finished".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;
        debug!("Settlement transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::cart::NewCart;
    use crate::{Database, DbConfig};
    use beacon_core::{CartLine, SaleStatus};

    async fn seeded() -> (Database, Cart) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.stock().set_level(7, 10).await.unwrap();
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
        (db, cart)
    }

    fn new_sale(cart: &Cart) -> NewSale {
        NewSale {
            cart_id: cart.id,
            terminal_id: cart.terminal_id,
            cashier_id: cart.cashier_id,
            total_cents: cart.total().cents(),
            discount_cents: 0,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn test_commit_makes_effects_visible() {
        let (db, cart) = seeded().await;

        let mut tx = db.begin_settlement().await.unwrap();
        let sale_id = tx.create_sale(&new_sale(&cart)).await.unwrap();
        tx.add_payment(sale_id, PaymentMethod::Cash, 10000, None).await.unwrap();
        tx.decrement_stock(7, 2).await.unwrap();
        tx.complete_sale(sale_id, "R-1").await.unwrap();
        tx.set_cart_status(cart.id, CartStatus::Completed).await.unwrap();
        tx.commit().await.unwrap();
        assert!(!tx.is_open());

        let sale = db.sales().get(sale_id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(db.stock().level(7).await.unwrap(), Some(8));
        let cart = db.carts().get(cart.id).await.unwrap().unwrap();
        assert_eq!(cart.status, CartStatus::Completed);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let (db, cart) = seeded().await;

        let mut tx = db.begin_settlement().await.unwrap();
        let sale_id = tx.create_sale(&new_sale(&cart)).await.unwrap();
        tx.add_payment(sale_id, PaymentMethod::Cash, 10000, None).await.unwrap();
        tx.decrement_stock(7, 2).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(db.sales().get(sale_id).await.unwrap().is_none());
        assert!(db.sales().payments(sale_id).await.unwrap().is_empty());
        assert_eq!(db.stock().level(7).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_finished_scope_rejects_use() {
        let (db, cart) = seeded().await;

        let mut tx = db.begin_settlement().await.unwrap();
        tx.rollback().await.unwrap();

        assert!(matches!(
            tx.get_cart(cart.id).await,
            Err(DbError::TransactionFailed(_))
        ));
        assert!(tx.commit().await.is_err());
    }
}
