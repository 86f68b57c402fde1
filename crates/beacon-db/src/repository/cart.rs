//! # Cart Repository
//!
//! Carts are read by the settlement and closed by it; creation lives here for
//! the front end, the seed binary and tests.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use beacon_core::{Cart, CartLine, CartStatus};

/// Input for creating a cart.
#[derive(Debug, Clone)]
pub struct NewCart {
    pub terminal_id: i64,
    pub cashier_id: i64,
    pub lines: Vec<CartLine>,
    pub discount_cents: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CartRow {
    id: i64,
    terminal_id: i64,
    cashier_id: i64,
    status: CartStatus,
    discount_cents: i64,
}

/// Repository for cart database operations.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Gets a cart with its lines.
    pub async fn get(&self, id: i64) -> DbResult<Option<Cart>> {
        let mut conn = self.pool.acquire().await?;
        fetch_cart(&mut conn, id).await
    }

    /// Creates an ACTIVE cart with the given lines.
    pub async fn create(&self, cart: NewCart) -> DbResult<Cart> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let id = sqlx::query(
            r#"
            INSERT INTO carts (terminal_id, cashier_id, status, discount_cents, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(cart.terminal_id)
        .bind(cart.cashier_id)
        .bind(CartStatus::Active)
        .bind(cart.discount_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for (position, line) in cart.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO cart_lines (cart_id, position, product_id, quantity, unit_price_cents)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(line.product_id)
            .bind(line.quantity)
            .bind(line.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(cart_id = id, lines = cart.lines.len(), "Cart created");

        Ok(Cart {
            id,
            terminal_id: cart.terminal_id,
            cashier_id: cart.cashier_id,
            status: CartStatus::Active,
            lines: cart.lines,
            discount_cents: cart.discount_cents,
        })
    }

    /// Sets a cart's status outside any settlement (hold, cancel).
    pub async fn set_status(&self, id: i64, status: CartStatus) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        update_cart_status(&mut conn, id, status, Utc::now()).await
    }
}

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn fetch_cart(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Cart>> {
    let row: Option<CartRow> = sqlx::query_as(
        r#"
        SELECT id, terminal_id, cashier_id, status, discount_cents
        FROM carts
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let lines: Vec<CartLine> = sqlx::query_as(
        r#"
        SELECT product_id, quantity, unit_price_cents
        FROM cart_lines
        WHERE cart_id = ?1
        ORDER BY position
        "#,
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Cart {
        id: row.id,
        terminal_id: row.terminal_id,
        cashier_id: row.cashier_id,
        status: row.status,
        lines,
        discount_cents: row.discount_cents,
    }))
}

pub(crate) async fn update_cart_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: CartStatus,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query("UPDATE carts SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status)
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::not_found("Cart", id));
    }

    debug!(cart_id = id, status = %status, "Cart status updated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn lines() -> Vec<CartLine> {
        vec![
            CartLine { product_id: 7, quantity: 2, unit_price_cents: 5000 },
            CartLine { product_id: 3, quantity: 1, unit_price_cents: 199 },
        ]
    }

    #[tokio::test]
    async fn test_create_and_get_preserves_line_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let created = db
            .carts()
            .create(NewCart {
                terminal_id: 1,
                cashier_id: 9,
                lines: lines(),
                discount_cents: 0,
            })
            .await
            .unwrap();

        let loaded = db.carts().get(created.id).await.unwrap().unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.lines[0].product_id, 7);
        assert_eq!(loaded.total().cents(), 10199);
    }

    #[tokio::test]
    async fn test_set_status() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cart = db
            .carts()
            .create(NewCart { terminal_id: 1, cashier_id: 9, lines: lines(), discount_cents: 0 })
            .await
            .unwrap();

        db.carts().set_status(cart.id, CartStatus::Held).await.unwrap();
        let loaded = db.carts().get(cart.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CartStatus::Held);
    }

    #[tokio::test]
    async fn test_missing_cart() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.carts().get(404).await.unwrap().is_none());
        assert!(matches!(
            db.carts().set_status(404, CartStatus::Cancelled).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
