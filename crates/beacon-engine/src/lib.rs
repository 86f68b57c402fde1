//! # beacon-engine: Settlement & Offline Sync
//!
//! Settles carts against one or more tenders and keeps a durable queue of
//! operations captured while the primary store was unreachable.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Beacon POS Engine                              │
//! │                                                                         │
//! │  Terminal                                                              │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  ┌──────────────┐   Persistence error   ┌──────────────┐               │
//! │  │   Checkout   │──────────────────────►│ OfflineQueue │               │
//! │  └──────┬───────┘                       └──────┬───────┘               │
//! │         │                                      │ due items             │
//! │         ▼                                      ▼                       │
//! │  ┌──────────────────┐   handlers    ┌───────────────────┐              │
//! │  │ PaymentOrchestr. │◄──────────────│ QueueSynchronizer │              │
//! │  │ settle / refund  │               │ timeouts, budget  │              │
//! │  └──────┬───────────┘               └─────────▲─────────┘              │
//! │         │                                     │ every poll_interval    │
//! │         ▼                                     │                        │
//! │  ┌──────────────────┐               ┌─────────┴─────────┐              │
//! │  │ UnitOfWork       │               │    SyncWorker     │              │
//! │  │ (gateway traits) │               │ recover, purge,   │              │
//! │  └──────┬───────────┘               │ back off          │              │
//! │         │                           └───────────────────┘              │
//! │         ▼                                                               │
//! │   beacon-db (SQLite)          LockManager: cart:{id} sale:{id}          │
//! │                                            queue:{id}                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`settlement`] - `PaymentOrchestrator`: single/split settle, refund
//! - [`checkout`] - Settle online or defer to the queue
//! - [`offline`] - `OfflineQueue` facade over the queue state machine
//! - [`synchronizer`] - One drain cycle over due items
//! - [`handlers`] - SALE / REFUND / STOCK_DECREMENT handlers
//! - [`worker`] - Background `SyncWorker` and its handle
//! - [`gateway`] - Storage traits the engine is written against
//! - [`sqlite`] - Gateway implementations over beacon-db
//! - [`lock`] - Advisory lock leases
//! - [`config`] - `EngineConfig` (TOML + environment)
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_engine::{EngineConfig, PaymentOrchestrator, LockManager, SqliteLocks};
//! use beacon_core::{Money, PaymentMethod};
//! use beacon_db::Database;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(config.database.primary()).await?;
//! let locks = LockManager::new(
//!     Arc::new(SqliteLocks::new(&db)),
//!     "terminal-3",
//!     config.settlement_locks(),
//! );
//! let orchestrator = PaymentOrchestrator::new(
//!     Arc::new(db.clone()),
//!     locks,
//!     config.settlement.amount_tolerance_cents,
//! );
//!
//! let receipt = orchestrator
//!     .settle_single(42, PaymentMethod::Cash, Money::from_cents(10000))
//!     .await?;
//! println!("Receipt {}", receipt.receipt_number);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod sqlite;

pub mod checkout;
pub mod handlers;
pub mod offline;
pub mod settlement;
pub mod synchronizer;
pub mod worker;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use checkout::{Checkout, CheckoutOutcome};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorCategory};
pub use gateway::{
    AdvisoryLock, CartGateway, GatewayError, GatewayResult, QueueStore, SaleGateway,
    StockGateway, UnitOfWork, UnitOfWorkFactory,
};
pub use handlers::{HandlerRegistry, OperationHandler};
pub use lock::{InProcessLocks, LockLease, LockManager, LockSettings};
pub use offline::OfflineQueue;
pub use settlement::{PaymentOrchestrator, RefundReceipt, RefundRequest, SettlementRequest};
pub use sqlite::SqliteLocks;
pub use synchronizer::{CycleReport, QueueSynchronizer, SynchronizerConfig};
pub use worker::{SyncWorker, SyncWorkerHandle, WorkerConfig};
