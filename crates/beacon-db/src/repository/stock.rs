//! # Stock Repository
//!
//! Per-product stock levels. A decrement is a single conditional UPDATE, so
//! SQLite serializes concurrent terminals and the level never goes negative.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for stock level operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Current level, or None for an untracked product.
    pub async fn level(&self, product_id: i64) -> DbResult<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        fetch_level(&mut conn, product_id).await
    }

    /// Sets an absolute level (stock take, seeding).
    pub async fn set_level(&self, product_id: i64, quantity: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (product_id, quantity, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(product_id) DO UPDATE SET
                quantity = excluded.quantity,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Decrements outside a settlement.
    pub async fn decrement(&self, product_id: i64, quantity: i64) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        decrement_stock(&mut conn, product_id, quantity, Utc::now()).await
    }

    /// Increments outside a settlement.
    pub async fn increment(&self, product_id: i64, quantity: i64) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        increment_stock(&mut conn, product_id, quantity, Utc::now()).await
    }
}

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn fetch_level(
    conn: &mut SqliteConnection,
    product_id: i64,
) -> DbResult<Option<i64>> {
    let level = sqlx::query_scalar("SELECT quantity FROM stock_levels WHERE product_id = ?1")
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(level)
}

/// Removes `quantity` units, failing without change if fewer are on hand.
pub(crate) async fn decrement_stock(
    conn: &mut SqliteConnection,
    product_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE stock_levels
        SET quantity = quantity - ?1, updated_at = ?2
        WHERE product_id = ?3 AND quantity >= ?1
        "#,
    )
    .bind(quantity)
    .bind(now)
    .bind(product_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(match fetch_level(conn, product_id).await? {
            Some(available) => DbError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            },
            None => DbError::not_found("Stock", product_id),
        });
    }

    debug!(product_id, quantity, "Stock decremented");
    Ok(())
}

/// Adds `quantity` units, creating the level row if needed.
pub(crate) async fn increment_stock(
    conn: &mut SqliteConnection,
    product_id: i64,
    quantity: i64,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO stock_levels (product_id, quantity, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(product_id) DO UPDATE SET
            quantity = quantity + excluded.quantity,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(product_id)
    .bind(quantity)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(product_id, quantity, "Stock incremented");
    Ok(())
}
