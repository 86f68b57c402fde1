//! # Sale Repository
//!
//! Database operations for sales and payments.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sale Lifecycle                                    │
//! │                                                                         │
//! │  1. CREATE (inside a settlement transaction)                           │
//! │     └── insert_sale() → Sale { status: PENDING, receipt: NULL }        │
//! │                                                                         │
//! │  2. PAY                                                                │
//! │     └── insert_payment() × legs                                        │
//! │                                                                         │
//! │  3. COMPLETE                                                           │
//! │     └── complete_sale() → Sale { status: COMPLETED, receipt_number }   │
//! │                                                                         │
//! │  4. (OPTIONAL) REFUND                                                  │
//! │     └── insert_payment(negative) + mark_refunded()                     │
//! │                                                                         │
//! │  A rolled-back settlement leaves none of this behind.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use beacon_core::{NewSale, Payment, PaymentMethod, Sale, SaleStatus};

const SALE_COLUMNS: &str = "id, cart_id, terminal_id, cashier_id, total_cents, discount_cents, \
     status, receipt_number, idempotency_key, created_at, completed_at";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get(&self, id: i64) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale(&mut conn, id).await
    }

    /// Finds the sale created under an idempotency key.
    pub async fn find_by_idempotency_key(&self, key: &str) -> DbResult<Option<Sale>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sale_by_key(&mut conn, key).await
    }

    /// All sales ever created for a cart, oldest first.
    pub async fn list_for_cart(&self, cart_id: i64) -> DbResult<Vec<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE cart_id = ?1 ORDER BY id");
        let sales = sqlx::query_as(&sql)
            .bind(cart_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(sales)
    }

    /// Gets all payments for a sale.
    pub async fn payments(&self, sale_id: i64) -> DbResult<Vec<Payment>> {
        let mut conn = self.pool.acquire().await?;
        fetch_payments(&mut conn, sale_id).await
    }
}

// =============================================================================
// Statements
// =============================================================================

pub(crate) async fn fetch_sale(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
    let sale = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(sale)
}

pub(crate) async fn fetch_sale_by_key(
    conn: &mut SqliteConnection,
    key: &str,
) -> DbResult<Option<Sale>> {
    let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE idempotency_key = ?1");
    let sale = sqlx::query_as(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(sale)
}

pub(crate) async fn fetch_payments(
    conn: &mut SqliteConnection,
    sale_id: i64,
) -> DbResult<Vec<Payment>> {
    let payments = sqlx::query_as(
        r#"
        SELECT id, sale_id, method, amount_cents, reference, created_at
        FROM payments
        WHERE sale_id = ?1
        ORDER BY id
        "#,
    )
    .bind(sale_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(payments)
}

/// Inserts a PENDING sale and returns its id.
pub(crate) async fn insert_sale(
    conn: &mut SqliteConnection,
    sale: &NewSale,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO sales (
            cart_id, terminal_id, cashier_id, total_cents, discount_cents,
            status, idempotency_key, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(sale.cart_id)
    .bind(sale.terminal_id)
    .bind(sale.cashier_id)
    .bind(sale.total_cents)
    .bind(sale.discount_cents)
    .bind(SaleStatus::Pending)
    .bind(sale.idempotency_key.as_deref())
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(sale_id = id, cart_id = sale.cart_id, "Sale created");
    Ok(id)
}

/// Appends a payment row and returns its id.
pub(crate) async fn insert_payment(
    conn: &mut SqliteConnection,
    sale_id: i64,
    method: PaymentMethod,
    amount_cents: i64,
    reference: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO payments (sale_id, method, amount_cents, reference, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(sale_id)
    .bind(method)
    .bind(amount_cents)
    .bind(reference)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    debug!(sale_id, payment_id = id, method = %method, amount_cents, "Payment added");
    Ok(id)
}

/// PENDING → COMPLETED with a receipt number.
pub(crate) async fn complete_sale(
    conn: &mut SqliteConnection,
    sale_id: i64,
    receipt_number: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sales
        SET status = ?1, receipt_number = ?2, completed_at = ?3
        WHERE id = ?4 AND status = ?5
        "#,
    )
    .bind(SaleStatus::Completed)
    .bind(receipt_number)
    .bind(now)
    .bind(sale_id)
    .bind(SaleStatus::Pending)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(missing_or_conflict(conn, sale_id).await);
    }

    debug!(sale_id, receipt_number, "Sale completed");
    Ok(())
}

/// COMPLETED → REFUNDED.
pub(crate) async fn mark_refunded(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<()> {
    let result = sqlx::query("UPDATE sales SET status = ?1 WHERE id = ?2 AND status = ?3")
        .bind(SaleStatus::Refunded)
        .bind(sale_id)
        .bind(SaleStatus::Completed)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(missing_or_conflict(conn, sale_id).await);
    }

    debug!(sale_id, "Sale refunded");
    Ok(())
}

async fn missing_or_conflict(conn: &mut SqliteConnection, sale_id: i64) -> DbError {
    match fetch_sale(conn, sale_id).await {
        Ok(Some(_)) => DbError::conflict("Sale", sale_id),
        Ok(None) => DbError::not_found("Sale", sale_id),
        Err(e) => e,
    }
}
