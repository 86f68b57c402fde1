//! # beacon-core: Pure Settlement & Queue Logic for Beacon POS
//!
//! This crate holds every rule of the settlement and offline-queue core that
//! can be expressed without I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Beacon POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 beacon-engine (orchestration)                   │   │
//! │  │   PaymentOrchestrator ── OfflineQueue ── QueueSynchronizer      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ beacon-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │   queue   │  │   retry   │  │   │
//! │  │   │ Cart/Sale │  │   Money   │  │  state    │  │  back-off │  │   │
//! │  │   │  Payment  │  │           │  │  machine  │  │ retention │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                 │   │
//! │  │   │settlement │  │validation │  │   error   │                 │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘                 │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CLOCK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 beacon-db (SQLite repositories)                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Cart, Sale, Payment, QueuedOperation and friends
//! - [`money`] - Integer-cent money type
//! - [`error`] - Validation, domain and queue error types
//! - [`validation`] - Input validation rules
//! - [`retry`] - Exponential back-off and retention policies
//! - [`queue`] - Queued operation state transitions
//! - [`settlement`] - Amount matching, receipt numbers, idempotency keys
//!
//! ## Example Usage
//!
//! ```rust
//! use beacon_core::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.delay_seconds(0), 60);
//! assert_eq!(policy.delay_seconds(1), 120);
//! assert_eq!(policy.delay_seconds(10), 1800); // capped at 30 minutes
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod queue;
pub mod retry;
pub mod settlement;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{DomainError, QueueError, ValidationError};
pub use money::Money;
pub use queue::FailOutcome;
pub use retry::{RetentionPolicy, RetryPolicy};
pub use settlement::{SettlementPlan, DEFAULT_AMOUNT_TOLERANCE_CENTS};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of attempts before a queued operation is frozen in FAILED.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Highest urgency a queued operation can carry.
pub const MIN_PRIORITY: u8 = 1;

/// Lowest urgency a queued operation can carry.
pub const MAX_PRIORITY: u8 = 5;

/// Priority used when the caller does not pick one.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Maximum length of a stored queue error message.
///
/// Handler errors can embed whole SQL statements; anything longer is cut so
/// the failed list stays readable.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;
