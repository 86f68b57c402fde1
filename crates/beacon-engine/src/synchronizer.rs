//! # Queue Synchronizer
//!
//! Drains due operations from the offline queue through their handlers.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  run_cycle()                                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  queue.due(now, batch_size)      priority asc, created_at asc          │
//! │       │                                                                 │
//! │       ▼  for each item, while the cycle budget lasts                   │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │ try_acquire("queue:{id}")     held elsewhere → skipped         │   │
//! │  │ begin_processing              moved on meanwhile → skipped      │   │
//! │  │ handler = registry[type]      missing → FailTerminally          │   │
//! │  │ timeout(min(item_timeout, budget left), handler.handle(op))     │   │
//! │  │     Ok                       → Complete                         │   │
//! │  │     retryable / timed out    → Fail (back-off or FAILED)        │   │
//! │  │     validation / domain      → FailTerminally                   │   │
//! │  │ release("queue:{id}")                                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  CycleReport { processed, succeeded, requeued, failed_terminally,      │
//! │                skipped }                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handler errors never escape a cycle. Only queue store failures do, so the
//! worker can back off from an unreachable store.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use beacon_core::{DomainError, FailOutcome, QueuedOperation};

use crate::error::{EngineError, EngineResult};
use crate::gateway::AdvisoryLock;
use crate::handlers::HandlerRegistry;
use crate::lock::lease_token;
use crate::offline::OfflineQueue;

/// Advisory lock key serializing work on one queued item.
pub fn queue_lock_key(operation_id: &str) -> String {
    format!("queue:{}", operation_id)
}

/// Per-cycle limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizerConfig {
    /// Due items fetched per cycle.
    pub batch_size: u32,
    /// Time allowed to one handler invocation.
    pub item_timeout: Duration,
    /// No new item is started once this much time has passed.
    pub cycle_budget: Duration,
    /// Lease on `queue:{id}` while the item is handled.
    pub item_lock_ttl: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        SynchronizerConfig {
            batch_size: 50,
            item_timeout: Duration::from_secs(30),
            cycle_budget: Duration::from_secs(120),
            item_lock_ttl: Duration::from_secs(60),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Items that reached a handler or had none: the sum of the next three.
    pub processed: u32,
    pub succeeded: u32,
    /// Failed and back in PENDING with a retry time.
    pub requeued: u32,
    /// Frozen in FAILED.
    pub failed_terminally: u32,
    /// Locked elsewhere or moved on before this cycle reached them.
    pub skipped: u32,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.processed == 0 && self.skipped == 0
    }

    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Succeeded => self.succeeded += 1,
            ItemOutcome::Requeued => self.requeued += 1,
            ItemOutcome::FailedTerminally => self.failed_terminally += 1,
            ItemOutcome::Skipped => self.skipped += 1,
        }
        self.processed = self.succeeded + self.requeued + self.failed_terminally;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Succeeded,
    Requeued,
    FailedTerminally,
    Skipped,
}

pub struct QueueSynchronizer {
    queue: Arc<OfflineQueue>,
    handlers: Arc<HandlerRegistry>,
    locks: Arc<dyn AdvisoryLock>,
    owner: String,
    config: SynchronizerConfig,
}

impl QueueSynchronizer {
    pub fn new(
        queue: Arc<OfflineQueue>,
        handlers: Arc<HandlerRegistry>,
        locks: Arc<dyn AdvisoryLock>,
        owner: impl Into<String>,
        config: SynchronizerConfig,
    ) -> Self {
        QueueSynchronizer {
            queue,
            handlers,
            locks,
            owner: owner.into(),
            config,
        }
    }

    pub fn config(&self) -> &SynchronizerConfig {
        &self.config
    }

    /// Runs one drain cycle.
    ///
    /// Errors only when the queue store itself fails.
    pub async fn run_cycle(&self) -> EngineResult<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        let due = self.queue.due(Utc::now(), self.config.batch_size).await?;
        if due.is_empty() {
            debug!("No due operations");
            return Ok(report);
        }
        debug!(count = due.len(), "Draining due operations");

        let total = due.len();
        for (index, op) in due.iter().enumerate() {
            let elapsed = started.elapsed();
            if elapsed >= self.config.cycle_budget {
                info!(
                    left = total - index,
                    budget_ms = self.config.cycle_budget.as_millis() as u64,
                    "Cycle budget spent, leaving items for the next cycle"
                );
                break;
            }

            let outcome = self.process(op, self.config.cycle_budget - elapsed).await?;
            report.record(outcome);
        }

        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            requeued = report.requeued,
            failed = report.failed_terminally,
            skipped = report.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync cycle finished"
        );
        Ok(report)
    }

    async fn process(&self, op: &QueuedOperation, remaining: Duration) -> EngineResult<ItemOutcome> {
        let key = queue_lock_key(&op.id);
        let token = lease_token(&self.owner);
        match self.locks.try_acquire(&key, &token, self.config.item_lock_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %op.id, "Operation held by another worker, skipping");
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => {
                warn!(id = %op.id, error = %e, "Could not lock operation, skipping");
                return Ok(ItemOutcome::Skipped);
            }
        }

        let outcome = self.process_locked(op, remaining).await;

        if let Err(e) = self.locks.release(&key, &token).await {
            warn!(id = %op.id, error = %e, "Failed to release operation lock, waiting for expiry");
        }
        outcome
    }

    async fn process_locked(
        &self,
        op: &QueuedOperation,
        remaining: Duration,
    ) -> EngineResult<ItemOutcome> {
        let op = match self.queue.begin_processing(&op.id).await {
            Ok(op) => op,
            Err(e) if moved_on(&e) => {
                debug!(id = %op.id, error = %e, "Operation moved on since listing, skipping");
                return Ok(ItemOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        let Some(handler) = self.handlers.get(op.operation_type) else {
            let err = EngineError::NoHandler(op.operation_type);
            error!(id = %op.id, error = %err, "Operation cannot be handled");
            let resolved = self
                .queue
                .fail_terminally(&op.id, &err.to_string())
                .await
                .map(|_| ItemOutcome::FailedTerminally);
            return self.settle_outcome(&op, resolved);
        };

        let budget = self.config.item_timeout.min(remaining);
        let result = match tokio::time::timeout(budget, handler.handle(&op)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::HandlerTimeout {
                operation_id: op.id.clone(),
                timeout_ms: budget.as_millis() as u64,
            }),
        };

        let resolved = match result {
            Ok(()) => self.queue.complete(&op.id).await.map(|_| ItemOutcome::Succeeded),
            Err(e) if e.is_retryable() => {
                self.queue
                    .fail(&op.id, &e.to_string())
                    .await
                    .map(|outcome| match outcome {
                        FailOutcome::Requeued { .. } => ItemOutcome::Requeued,
                        FailOutcome::Exhausted => ItemOutcome::FailedTerminally,
                    })
            }
            Err(e) => {
                warn!(
                    id = %op.id,
                    operation_type = %op.operation_type,
                    category = %e.category(),
                    error = %e,
                    "Operation rejected, not retrying"
                );
                self.queue
                    .fail_terminally(&op.id, &e.to_string())
                    .await
                    .map(|_| ItemOutcome::FailedTerminally)
            }
        };
        self.settle_outcome(&op, resolved)
    }

    /// Store failures abort the cycle; a lost race on the row only skips.
    fn settle_outcome(
        &self,
        op: &QueuedOperation,
        resolved: EngineResult<ItemOutcome>,
    ) -> EngineResult<ItemOutcome> {
        match resolved {
            Err(e) if moved_on(&e) => {
                warn!(id = %op.id, error = %e, "Operation changed while handled, leaving as is");
                Ok(ItemOutcome::Skipped)
            }
            other => other,
        }
    }
}

fn moved_on(err: &EngineError) -> bool {
    matches!(
        err,
        EngineError::Conflict(_)
            | EngineError::Queue(_)
            | EngineError::Domain(DomainError::NotFound { .. })
    )
}
