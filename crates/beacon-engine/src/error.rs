//! # Engine Error Types
//!
//! Error types for settlement, the offline queue and the sync worker.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │     Domain      │  │    Infrastructure       │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  bad ids        │  │  AmountMismatch │  │  Persistence  (retry)   │ │
//! │  │  empty legs     │  │  AlreadySettled │  │  LockTimeout  (retry)   │ │
//! │  │  priority 0     │  │  StockUnavail.  │  │  HandlerTimeout (retry) │ │
//! │  │                 │  │  NotFound       │  │  Conflict               │ │
//! │  │                 │  │  InvalidState   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │ Terminal Queue  │  │ Configuration   │                              │
//! │  │                 │  │                 │                              │
//! │  │  InvalidTrans.  │  │  Config         │                              │
//! │  │  Exhausted      │  │  NoHandler      │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! │                                                                         │
//! │  The synchronizer turns retryable errors into Fail (back-off) and      │
//! │  everything else into FailTerminally.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use thiserror::Error;

use beacon_core::{DomainError, OperationType, QueueError, ValidationError};

use crate::gateway::GatewayError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Malformed input.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A business rule refused the operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Illegal queue transition or an exhausted item.
    #[error(transparent)]
    Queue(#[from] QueueError),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// The primary or queue store is unreachable.
    #[error("Persistence unavailable: {0}")]
    Persistence(String),

    /// A write lost a race or hit a constraint.
    #[error("Storage conflict: {0}")]
    Conflict(String),

    /// The advisory lock stayed held by someone else.
    #[error("Timed out after {waited_ms}ms waiting for lock {key}")]
    LockTimeout { key: String, waited_ms: u64 },

    /// A queue handler ran past its time budget.
    #[error("Handler for {operation_id} timed out after {timeout_ms}ms")]
    HandlerTimeout { operation_id: String, timeout_ms: u64 },

    /// A background task's control channel is closed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// A detached settlement task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// No handler is registered for the operation type.
    #[error("No handler registered for {0}")]
    NoHandler(OperationType),

    /// Invalid or unreadable configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Coarse error classes used for routing and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Domain,
    Infrastructure,
    TerminalQueue,
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Domain => "domain",
            ErrorCategory::Infrastructure => "infrastructure",
            ErrorCategory::TerminalQueue => "terminal_queue",
            ErrorCategory::Configuration => "configuration",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { entity, id } => {
                EngineError::Domain(DomainError::NotFound { entity, id })
            }
            GatewayError::InsufficientStock {
                product_id,
                requested,
                available,
            } => EngineError::Domain(DomainError::StockUnavailable {
                product_id,
                requested,
                reason: format!("only {} on hand", available),
            }),
            GatewayError::Conflict(msg) => EngineError::Conflict(msg),
            GatewayError::Unavailable(msg) => EngineError::Persistence(msg),
        }
    }
}

impl From<beacon_db::DbError> for EngineError {
    fn from(err: beacon_db::DbError) -> Self {
        GatewayError::from(err).into()
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl EngineError {
    /// Returns the coarse class of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Validation(_) => ErrorCategory::Validation,
            EngineError::Domain(_) => ErrorCategory::Domain,
            EngineError::Queue(_) => ErrorCategory::TerminalQueue,
            EngineError::Persistence(_)
            | EngineError::Conflict(_)
            | EngineError::Channel(_)
            | EngineError::Task(_)
            | EngineError::LockTimeout { .. }
            | EngineError::HandlerTimeout { .. } => ErrorCategory::Infrastructure,
            EngineError::NoHandler(_) | EngineError::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Returns true if running the same operation again may succeed.
    ///
    /// ## Retryable Errors
    /// - Store unreachable
    /// - Lock held elsewhere
    /// - Handler timeout
    ///
    /// ## Non-Retryable Errors
    /// - Validation and domain refusals
    /// - Queue state errors
    /// - Conflicts and configuration problems
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Persistence(_)
                | EngineError::LockTimeout { .. }
                | EngineError::HandlerTimeout { .. }
        )
    }
}
