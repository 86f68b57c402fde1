//! # beacon-db: Database Layer for Beacon POS
//!
//! SQLite storage for carts, sales, stock, the offline operation queue and
//! advisory locks, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon POS Data Flow                             │
//! │                                                                         │
//! │  beacon-engine (PaymentOrchestrator, OfflineQueue, SyncWorker)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    beacon-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ CartRepo      │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ SaleRepo      │    │ 001_initial  │  │   │
//! │  │   │ SettlementTx  │    │ StockRepo     │    │ _schema.sql  │  │   │
//! │  │   │               │    │ QueueRepo     │    │              │  │   │
//! │  │   │               │    │ LockRepo      │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//! - [`unit_of_work`] - Transaction scope for one settlement
//!
//! ## Usage
//!
//! ```rust,ignore
//! use beacon_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/beacon.db")).await?;
//!
//! let pending = db.queue().pending(None, 50).await?;
//!
//! let mut tx = db.begin_settlement().await?;
//! let cart = tx.get_cart(42).await?;
//! // ...
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::SettlementTx;

// Repository re-exports for convenience
pub use repository::cart::{CartRepository, NewCart};
pub use repository::lock::LockRepository;
pub use repository::queue::QueueRepository;
pub use repository::sale::SaleRepository;
pub use repository::stock::StockRepository;
