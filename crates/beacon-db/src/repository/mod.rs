//! # Repository Module
//!
//! Database repository implementations for Beacon POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways Into The Same SQL                           │
//! │                                                                         │
//! │  db.carts().get(42)                    tx.get_cart(42)                 │
//! │       │                                     │                           │
//! │       ▼                                     ▼                           │
//! │  CartRepository (pool)              SettlementTx (one transaction)     │
//! │       │                                     │                           │
//! │       └──────────────┬──────────────────────┘                           │
//! │                      ▼                                                  │
//! │        cart::fetch_cart(&mut SqliteConnection, 42)                     │
//! │                                                                         │
//! │  Every statement is a free function over a connection, so the pooled   │
//! │  repositories and the settlement transaction run identical SQL.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`cart::CartRepository`] - Carts and their lines
//! - [`sale::SaleRepository`] - Sales and payments
//! - [`stock::StockRepository`] - Stock levels
//! - [`queue::QueueRepository`] - Offline operation queue
//! - [`lock::LockRepository`] - Advisory lock leases

pub mod cart;
pub mod lock;
pub mod queue;
pub mod sale;
pub mod stock;
