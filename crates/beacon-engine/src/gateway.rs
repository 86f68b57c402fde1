//! # Gateways
//!
//! Capabilities the engine consumes from the transactional store.
//!
//! ## Unit of Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  UnitOfWorkFactory::begin()                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Box<dyn UnitOfWork>                                                    │
//! │  ├── CartGateway    get_cart, set_cart_status                          │
//! │  ├── SaleGateway    create_sale, add_payment, complete_sale, ...       │
//! │  ├── StockGateway   decrement, increment                               │
//! │  └── commit() / rollback()                                             │
//! │                                                                         │
//! │  The orchestrator owns the scope for exactly one settlement and ends   │
//! │  it explicitly. beacon-db's SettlementTx is the SQLite implementation. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The offline queue is persisted through [`QueueStore`]; named leases go
//! through [`AdvisoryLock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use beacon_core::retry::RetentionCutoffs;
use beacon_core::{
    Cart, CartStatus, Money, NewSale, OperationStatus, Payment, PaymentMethod, PurgeReport,
    QueueStats, QueuedOperation, Sale,
};
use beacon_db::DbError;

/// Result type alias for gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Failures reported by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    /// The write was refused by the store (lost race, constraint).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The store could not be reached. Transient.
    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        GatewayError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }
}

impl From<DbError> for GatewayError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            return GatewayError::Unavailable(err.to_string());
        }
        match err {
            DbError::NotFound { entity, id } => GatewayError::NotFound { entity, id },
            DbError::InsufficientStock {
                product_id,
                requested,
                available,
            } => GatewayError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            other => GatewayError::Conflict(other.to_string()),
        }
    }
}

// =============================================================================
// Transactional Gateways
// =============================================================================

#[async_trait]
pub trait CartGateway: Send {
    async fn get_cart(&mut self, id: i64) -> GatewayResult<Option<Cart>>;

    async fn set_cart_status(&mut self, id: i64, status: CartStatus) -> GatewayResult<()>;
}

#[async_trait]
pub trait SaleGateway: Send {
    /// Inserts a PENDING sale and returns its id.
    async fn create_sale(&mut self, sale: &NewSale) -> GatewayResult<i64>;

    /// Appends a payment row and returns its id. Refund legs are negative.
    async fn add_payment(
        &mut self,
        sale_id: i64,
        method: PaymentMethod,
        amount: Money,
        reference: Option<&str>,
    ) -> GatewayResult<i64>;

    async fn complete_sale(&mut self, sale_id: i64, receipt_number: &str) -> GatewayResult<()>;

    async fn get_sale(&mut self, id: i64) -> GatewayResult<Option<Sale>>;

    async fn find_sale_by_idempotency_key(&mut self, key: &str) -> GatewayResult<Option<Sale>>;

    async fn payments(&mut self, sale_id: i64) -> GatewayResult<Vec<Payment>>;

    async fn mark_refunded(&mut self, sale_id: i64) -> GatewayResult<()>;
}

#[async_trait]
pub trait StockGateway: Send {
    /// Fails with [`GatewayError::InsufficientStock`] and no change when short.
    async fn decrement(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()>;

    async fn increment(&mut self, product_id: i64, quantity: i64) -> GatewayResult<()>;
}

/// Cart, sale and stock access scoped to one transaction.
///
/// Nothing done through the scope is visible to others before `commit`;
/// after `rollback` none of it ever is.
#[async_trait]
pub trait UnitOfWork: CartGateway + SaleGateway + StockGateway + Send {
    async fn commit(&mut self) -> GatewayResult<()>;

    async fn rollback(&mut self) -> GatewayResult<()>;
}

/// Opens units of work against the primary store.
#[async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn begin(&self) -> GatewayResult<Box<dyn UnitOfWork>>;
}

// =============================================================================
// Queue Persistence
// =============================================================================

/// Durable storage for queued operations.
///
/// `update` writes only when the stored row is still in `expected`;
/// otherwise it fails with [`GatewayError::Conflict`].
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert(&self, op: &QueuedOperation) -> GatewayResult<()>;

    async fn get(&self, id: &str) -> GatewayResult<Option<QueuedOperation>>;

    async fn update(&self, op: &QueuedOperation, expected: OperationStatus) -> GatewayResult<()>;

    async fn pending(&self, terminal_id: Option<i64>, limit: u32)
        -> GatewayResult<Vec<QueuedOperation>>;

    async fn due_pending(&self, now: DateTime<Utc>, limit: u32)
        -> GatewayResult<Vec<QueuedOperation>>;

    async fn failed(&self, terminal_id: Option<i64>, limit: u32)
        -> GatewayResult<Vec<QueuedOperation>>;

    async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> GatewayResult<Vec<QueuedOperation>>;

    async fn purge(&self, cutoffs: RetentionCutoffs) -> GatewayResult<PurgeReport>;

    async fn stats(&self, terminal_id: Option<i64>) -> GatewayResult<QueueStats>;
}

// =============================================================================
// Advisory Locks
// =============================================================================

/// Named leases honoured by cooperating processes.
///
/// A lease lapses after `ttl`, so a crashed holder cannot block a key
/// forever. Acquiring a key already held by the same owner renews it.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> GatewayResult<bool>;

    async fn release(&self, key: &str, owner: &str) -> GatewayResult<()>;
}
