//! # Offline Queue
//!
//! Durable capture and bookkeeping of operations that could not reach the
//! primary store.
//!
//! ## Transition Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  queue.fail(id, "db unreachable")                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  store.get(id)                  load current row                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  op.fail(msg, now, &retry)      pure state machine (beacon-core)        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  store.update(op, expected)     write only if the row is unchanged     │
//! │       │                                                                 │
//! │       ├── Requeued { retry_at }   PENDING, invisible until retry_at    │
//! │       └── Exhausted               FAILED, needs resubmit or purge      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use beacon_core::validation::validate_new_operation;
use beacon_core::{
    DomainError, FailOutcome, NewOperation, PurgeReport, QueueStats, QueuedOperation,
    RetentionPolicy, RetryPolicy,
};

use crate::error::{EngineError, EngineResult};
use crate::gateway::QueueStore;

/// Recorded on items found PROCESSING after their worker went away.
pub const INTERRUPTED_MESSAGE: &str = "processing interrupted";

/// Stale items recovered per call.
const RECOVERY_BATCH: u32 = 100;

/// Facade over a [`QueueStore`] applying the queue state machine.
#[derive(Clone)]
pub struct OfflineQueue {
    store: Arc<dyn QueueStore>,
    retry: RetryPolicy,
    retention: RetentionPolicy,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn QueueStore>, retry: RetryPolicy, retention: RetentionPolicy) -> Self {
        OfflineQueue {
            store,
            retry,
            retention,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Validates and stores a new PENDING operation. Returns its id.
    pub async fn enqueue(&self, request: NewOperation) -> EngineResult<String> {
        validate_new_operation(&request)?;

        let op = QueuedOperation::new(
            Uuid::new_v4().to_string(),
            request,
            self.retry.max_attempts,
            Utc::now(),
        );
        self.store.insert(&op).await?;

        info!(
            id = %op.id,
            operation_type = %op.operation_type,
            terminal_id = op.terminal_id,
            priority = op.priority,
            "Operation queued"
        );
        Ok(op.id)
    }

    /// Loads an operation or fails with `NotFound`.
    pub async fn get(&self, id: &str) -> EngineResult<QueuedOperation> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DomainError::not_found("QueuedOperation", id).into())
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// PENDING → PROCESSING.
    pub async fn begin_processing(&self, id: &str) -> EngineResult<QueuedOperation> {
        let mut op = self.get(id).await?;
        let expected = op.status;
        op.begin_processing(Utc::now())?;
        self.store.update(&op, expected).await?;
        debug!(id, attempt = op.attempt_count + 1, "Operation processing");
        Ok(op)
    }

    /// → DONE.
    pub async fn complete(&self, id: &str) -> EngineResult<QueuedOperation> {
        let mut op = self.get(id).await?;
        let expected = op.status;
        op.complete(Utc::now())?;
        self.store.update(&op, expected).await?;
        info!(id, operation_type = %op.operation_type, "Operation done");
        Ok(op)
    }

    /// Records a failed attempt; requeues with back-off or freezes in FAILED.
    pub async fn fail(&self, id: &str, message: &str) -> EngineResult<FailOutcome> {
        let mut op = self.get(id).await?;
        let expected = op.status;
        let outcome = op.fail(message, Utc::now(), &self.retry)?;
        self.store.update(&op, expected).await?;

        match outcome {
            FailOutcome::Requeued { retry_at } => warn!(
                id,
                attempt = op.attempt_count,
                max_attempts = op.max_attempts,
                %retry_at,
                error = message,
                "Operation failed, will retry"
            ),
            FailOutcome::Exhausted => {
                if let Some(err) = op.exhausted_error() {
                    warn!(id, error = %err, "Operation frozen in FAILED");
                }
            }
        }
        Ok(outcome)
    }

    /// Records a failure that must not be retried.
    pub async fn fail_terminally(&self, id: &str, message: &str) -> EngineResult<QueuedOperation> {
        let mut op = self.get(id).await?;
        let expected = op.status;
        op.fail_terminally(message, Utc::now())?;
        self.store.update(&op, expected).await?;
        warn!(id, operation_type = %op.operation_type, error = message, "Operation failed terminally");
        Ok(op)
    }

    /// FAILED → PENDING with attempts reset.
    pub async fn resubmit(&self, id: &str) -> EngineResult<QueuedOperation> {
        let mut op = self.get(id).await?;
        let expected = op.status;
        op.resubmit()?;
        self.store.update(&op, expected).await?;
        info!(id, "Operation resubmitted");
        Ok(op)
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// PENDING items by (priority, created_at), back-off ignored.
    pub async fn pending(&self, terminal_id: Option<i64>, limit: u32) -> EngineResult<Vec<QueuedOperation>> {
        Ok(self.store.pending(terminal_id, limit).await?)
    }

    /// PENDING items eligible at `now`, in drain order.
    pub async fn due(&self, now: DateTime<Utc>, limit: u32) -> EngineResult<Vec<QueuedOperation>> {
        Ok(self.store.due_pending(now, limit).await?)
    }

    /// FAILED items, most recently attempted first.
    pub async fn failed(&self, terminal_id: Option<i64>, limit: u32) -> EngineResult<Vec<QueuedOperation>> {
        Ok(self.store.failed(terminal_id, limit).await?)
    }

    pub async fn stats(&self, terminal_id: Option<i64>) -> EngineResult<QueueStats> {
        Ok(self.store.stats(terminal_id).await?)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Deletes DONE and FAILED items past their retention horizons.
    pub async fn purge(&self, now: DateTime<Utc>) -> EngineResult<PurgeReport> {
        let report = self.store.purge(self.retention.cutoffs(now)).await?;
        if report.done_purged + report.failed_purged > 0 {
            info!(
                done = report.done_purged,
                failed = report.failed_purged,
                "Queue retention purge"
            );
        }
        Ok(report)
    }

    /// Fails PROCESSING items whose attempt started more than `older_than`
    /// before `now`. Returns the recovered ids.
    pub async fn recover_stale(&self, older_than: Duration, now: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let threshold = chrono::Duration::from_std(older_than)
            .map_err(|e| EngineError::Config(format!("stale threshold out of range: {}", e)))?;
        let Some(cutoff) = now.checked_sub_signed(threshold) else {
            return Ok(Vec::new());
        };
        let stale = self.store.stale_processing(cutoff, RECOVERY_BATCH).await?;

        let mut recovered = Vec::with_capacity(stale.len());
        for op in stale {
            match self.fail(&op.id, INTERRUPTED_MESSAGE).await {
                Ok(_) => recovered.push(op.id),
                // Someone else moved it on since the listing.
                Err(EngineError::Conflict(_)) | Err(EngineError::Queue(_)) => {
                    debug!(id = %op.id, "Stale item already moved on");
                }
                Err(e) => return Err(e),
            }
        }

        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Recovered interrupted operations");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{
        OperationPayload, OperationStatus, OperationType, StockDecrementPayload, ValidationError,
    };
    use beacon_db::{Database, DbConfig};

    async fn queue() -> (Database, OfflineQueue) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = OfflineQueue::new(
            Arc::new(db.queue()),
            RetryPolicy::default(),
            RetentionPolicy::default(),
        );
        (db, queue)
    }

    fn stock_op(product_id: i64) -> NewOperation {
        NewOperation::new(
            OperationPayload::StockDecrement(StockDecrementPayload { product_id, quantity: 1 }),
            1,
            9,
        )
    }

    #[tokio::test]
    async fn test_enqueue_defaults() {
        let (_db, queue) = queue().await;

        let id = queue.enqueue(stock_op(7).with_notes("network down")).await.unwrap();
        let op = queue.get(&id).await.unwrap();

        assert_eq!(op.operation_type, OperationType::StockDecrement);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert_eq!(op.max_attempts, 3);
        assert_eq!(op.priority, 1);
        assert_eq!(op.notes.as_deref(), Some("network down"));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_input() {
        let (_db, queue) = queue().await;

        let mut bad_terminal = stock_op(7);
        bad_terminal.terminal_id = 0;
        assert!(matches!(
            queue.enqueue(bad_terminal).await,
            Err(EngineError::Validation(_))
        ));

        assert!(matches!(
            queue.enqueue(stock_op(7).with_priority(6)).await,
            Err(EngineError::Validation(ValidationError::OutOfRange { .. }))
        ));
        assert_eq!(queue.stats(None).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_three_failures_exhaust() {
        let (_db, queue) = queue().await;
        let id = queue.enqueue(stock_op(7)).await.unwrap();

        for expected_attempts in 1..=2u32 {
            queue.begin_processing(&id).await.unwrap();
            let outcome = queue.fail(&id, "x").await.unwrap();
            assert!(matches!(outcome, FailOutcome::Requeued { .. }));

            let op = queue.get(&id).await.unwrap();
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(op.attempt_count, expected_attempts);
        }

        queue.begin_processing(&id).await.unwrap();
        assert_eq!(queue.fail(&id, "x").await.unwrap(), FailOutcome::Exhausted);

        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.attempt_count, 3);
        assert_eq!(op.error_message.as_deref(), Some("x"));
        assert_eq!(queue.failed(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_hides_item_until_due() {
        let (_db, queue) = queue().await;
        let id = queue.enqueue(stock_op(7)).await.unwrap();

        queue.begin_processing(&id).await.unwrap();
        let FailOutcome::Requeued { retry_at } = queue.fail(&id, "offline").await.unwrap() else {
            panic!("expected requeue");
        };

        let now = Utc::now();
        assert!(queue.due(now, 10).await.unwrap().is_empty());
        assert_eq!(queue.pending(None, 10).await.unwrap().len(), 1);
        assert_eq!(queue.due(retry_at, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_begin_processing_requires_pending() {
        let (_db, queue) = queue().await;
        let id = queue.enqueue(stock_op(7)).await.unwrap();

        queue.begin_processing(&id).await.unwrap();
        assert!(matches!(
            queue.begin_processing(&id).await,
            Err(EngineError::Queue(_))
        ));

        queue.complete(&id).await.unwrap();
        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Done);
        assert!(op.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_fail_terminally_and_resubmit() {
        let (_db, queue) = queue().await;
        let id = queue.enqueue(stock_op(7)).await.unwrap();

        queue.begin_processing(&id).await.unwrap();
        let op = queue.fail_terminally(&id, "no such product").await.unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.attempt_count, 1);

        let op = queue.resubmit(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert!(op.error_message.is_none());
        assert!(op.next_attempt_at.is_none());

        let stored = queue.get(&id).await.unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert!(matches!(queue.resubmit(&id).await, Err(EngineError::Queue(_))));
    }

    #[tokio::test]
    async fn test_recover_stale_counts_an_attempt() {
        let (_db, queue) = queue().await;
        let id = queue.enqueue(stock_op(7)).await.unwrap();
        queue.begin_processing(&id).await.unwrap();

        let now = Utc::now();
        assert!(queue
            .recover_stale(Duration::from_secs(300), now)
            .await
            .unwrap()
            .is_empty());

        let later = now + chrono::Duration::seconds(301);
        let recovered = queue.recover_stale(Duration::from_secs(300), later).await.unwrap();
        assert_eq!(recovered, vec![id.clone()]);

        let op = queue.get(&id).await.unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 1);
        assert_eq!(op.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (_db, queue) = queue().await;
        assert!(matches!(
            queue.get("missing").await,
            Err(EngineError::Domain(DomainError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_purge_uses_retention() {
        let (_db, queue) = queue().await;
        let done = queue.enqueue(stock_op(7)).await.unwrap();
        queue.complete(&done).await.unwrap();

        let now = Utc::now();
        assert_eq!(queue.purge(now).await.unwrap(), PurgeReport::default());

        let report = queue.purge(now + chrono::Duration::days(31)).await.unwrap();
        assert_eq!(report.done_purged, 1);
        assert!(queue.store.get(&done).await.unwrap().is_none());
    }
}
