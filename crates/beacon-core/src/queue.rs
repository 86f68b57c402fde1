//! # Queued Operation State Machine
//!
//! Every status change of a queued operation goes through these methods. The
//! queue repository loads a row, applies one transition here, and writes the
//! row back, so storage never invents a transition of its own.
//!
//! ## Transitions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  action            allowed from            result                       │
//! │  ────────────────  ──────────────────────  ───────────────────────────  │
//! │  begin_processing  PENDING                 PROCESSING, last_attempt_at  │
//! │  complete          PENDING, PROCESSING     DONE, completed_at           │
//! │  fail              PENDING, PROCESSING     PENDING + next_attempt_at    │
//! │                                            or FAILED when exhausted     │
//! │  fail_terminally   PENDING, PROCESSING     FAILED                       │
//! │  resubmit          FAILED                  PENDING, attempt_count = 0   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::{QueueError, QueueResult};
use crate::retry::RetryPolicy;
use crate::types::{NewOperation, OperationStatus, QueuedOperation};
use crate::MAX_ERROR_MESSAGE_LEN;

/// Stored when a failure arrives without a message.
pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back in PENDING; not eligible before `retry_at`.
    Requeued { retry_at: DateTime<Utc> },
    /// Attempts used up; frozen in FAILED.
    Exhausted,
}

impl QueuedOperation {
    /// Builds a fresh PENDING operation from a validated request.
    pub fn new(id: String, request: NewOperation, max_attempts: u32, now: DateTime<Utc>) -> Self {
        QueuedOperation {
            id,
            operation_type: request.payload.operation_type(),
            payload: request.payload,
            terminal_id: request.terminal_id,
            cashier_id: request.cashier_id,
            status: OperationStatus::Pending,
            attempt_count: 0,
            max_attempts,
            priority: request.priority,
            notes: request.notes,
            created_at: now,
            last_attempt_at: None,
            next_attempt_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// True when the item is PENDING and its back-off has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending
            && self.next_attempt_at.map_or(true, |at| at <= now)
    }

    fn ensure(&self, allowed: &[OperationStatus], action: &'static str) -> QueueResult<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(QueueError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                action,
            })
        }
    }

    /// PENDING → PROCESSING.
    pub fn begin_processing(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.ensure(&[OperationStatus::Pending], "begin processing")?;
        self.status = OperationStatus::Processing;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    /// → DONE.
    pub fn complete(&mut self, now: DateTime<Utc>) -> QueueResult<()> {
        self.ensure(
            &[OperationStatus::Pending, OperationStatus::Processing],
            "complete",
        )?;
        self.status = OperationStatus::Done;
        self.completed_at = Some(now);
        self.error_message = None;
        self.next_attempt_at = None;
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// The back-off is indexed by the incremented attempt count. For a
    /// PROCESSING item it is measured from when processing began; a failure
    /// recorded against a PENDING item counts as an attempt made at `now`.
    ///
    /// ## Example
    /// ```rust
    /// use beacon_core::{FailOutcome, NewOperation, OperationPayload, OperationStatus,
    ///     QueuedOperation, RetryPolicy, StockDecrementPayload};
    /// use chrono::Utc;
    ///
    /// let payload = OperationPayload::StockDecrement(StockDecrementPayload { product_id: 7, quantity: 1 });
    /// let now = Utc::now();
    /// let mut op = QueuedOperation::new("op-1".into(), NewOperation::new(payload, 1, 1), 3, now);
    ///
    /// let policy = RetryPolicy::default();
    /// assert!(matches!(op.fail("x", now, &policy).unwrap(), FailOutcome::Requeued { .. }));
    /// assert!(matches!(op.fail("x", now, &policy).unwrap(), FailOutcome::Requeued { .. }));
    /// assert_eq!(op.fail("x", now, &policy).unwrap(), FailOutcome::Exhausted);
    /// assert_eq!(op.status, OperationStatus::Failed);
    /// assert_eq!(op.attempt_count, 3);
    /// ```
    pub fn fail(
        &mut self,
        message: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> QueueResult<FailOutcome> {
        self.ensure(
            &[OperationStatus::Pending, OperationStatus::Processing],
            "fail",
        )?;

        self.attempt_count = self.attempt_count.saturating_add(1);
        self.error_message = Some(normalize_error_message(message));
        let attempted_at = self.stamp_attempt(now);

        if self.attempt_count >= self.max_attempts {
            self.attempt_count = self.max_attempts;
            self.status = OperationStatus::Failed;
            self.next_attempt_at = None;
            return Ok(FailOutcome::Exhausted);
        }

        let retry_at = policy.next_attempt_at(self.attempt_count, Some(attempted_at), now);
        self.status = OperationStatus::Pending;
        self.next_attempt_at = Some(retry_at);
        Ok(FailOutcome::Requeued { retry_at })
    }

    /// Records a failed attempt that must not be retried.
    pub fn fail_terminally(&mut self, message: &str, now: DateTime<Utc>) -> QueueResult<()> {
        self.ensure(
            &[OperationStatus::Pending, OperationStatus::Processing],
            "fail",
        )?;
        self.attempt_count = self.attempt_count.saturating_add(1).min(self.max_attempts);
        self.error_message = Some(normalize_error_message(message));
        self.stamp_attempt(now);
        self.status = OperationStatus::Failed;
        self.next_attempt_at = None;
        Ok(())
    }

    /// When the attempt being failed started.
    fn stamp_attempt(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        match (self.status, self.last_attempt_at) {
            (OperationStatus::Processing, Some(started)) => started,
            _ => {
                self.last_attempt_at = Some(now);
                now
            }
        }
    }

    /// FAILED → PENDING with a fresh attempt allowance.
    pub fn resubmit(&mut self) -> QueueResult<()> {
        self.ensure(&[OperationStatus::Failed], "resubmit")?;
        self.status = OperationStatus::Pending;
        self.attempt_count = 0;
        self.error_message = None;
        self.next_attempt_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Converts a FAILED item into the error callers see.
    pub fn exhausted_error(&self) -> Option<QueueError> {
        (self.status == OperationStatus::Failed).then(|| QueueError::AttemptsExhausted {
            id: self.id.clone(),
            attempts: self.attempt_count,
            last_error: self.error_message.clone().unwrap_or_default(),
        })
    }
}

/// Substitutes a placeholder for blank messages and caps the length.
pub fn normalize_error_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return UNKNOWN_ERROR_MESSAGE.to_string();
    }
    match trimmed.char_indices().nth(MAX_ERROR_MESSAGE_LEN) {
        Some((cut, _)) => trimmed[..cut].to_string(),
        None => trimmed.to_string(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OperationPayload, OperationType, StockDecrementPayload};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn op(max_attempts: u32) -> QueuedOperation {
        let payload = OperationPayload::StockDecrement(StockDecrementPayload {
            product_id: 7,
            quantity: 2,
        });
        QueuedOperation::new(
            "op-1".to_string(),
            NewOperation::new(payload, 1, 9).with_priority(2),
            max_attempts,
            t0(),
        )
    }

    #[test]
    fn test_new_operation_is_pending_and_due() {
        let op = op(3);
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.operation_type, OperationType::StockDecrement);
        assert_eq!(op.priority, 2);
        assert!(op.is_due(t0()));
    }

    #[test]
    fn test_three_failures_reach_failed() {
        let policy = RetryPolicy::default();
        let mut op = op(3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            op.begin_processing(t0()).unwrap();
            op.fail("x", t0(), &policy).unwrap();
            seen.push((op.status, op.attempt_count));
        }

        assert_eq!(
            seen,
            vec![
                (OperationStatus::Pending, 1),
                (OperationStatus::Pending, 2),
                (OperationStatus::Failed, 3),
            ]
        );
        assert_eq!(op.error_message.as_deref(), Some("x"));
        assert!(op.exhausted_error().is_some());
    }

    #[test]
    fn test_requeued_item_waits_for_backoff() {
        let policy = RetryPolicy::default();
        let mut op = op(3);
        op.begin_processing(t0()).unwrap();

        let outcome = op.fail("timeout", t0() + Duration::seconds(5), &policy).unwrap();
        assert_eq!(
            outcome,
            FailOutcome::Requeued {
                retry_at: t0() + Duration::seconds(120)
            }
        );
        assert!(!op.is_due(t0() + Duration::seconds(119)));
        assert!(op.is_due(t0() + Duration::seconds(120)));
    }

    #[test]
    fn test_fail_from_pending_stamps_last_attempt() {
        let policy = RetryPolicy::default();
        let mut op = op(3);
        op.fail("", t0(), &policy).unwrap();
        assert_eq!(op.last_attempt_at, Some(t0()));
        assert_eq!(op.error_message.as_deref(), Some(UNKNOWN_ERROR_MESSAGE));
    }

    #[test]
    fn test_fail_on_retried_pending_item_uses_current_time() {
        let policy = RetryPolicy::default();
        let mut op = op(5);
        op.begin_processing(t0()).unwrap();
        op.fail("x", t0(), &policy).unwrap();

        let later = t0() + Duration::hours(2);
        let outcome = op.fail("y", later, &policy).unwrap();

        assert_eq!(op.last_attempt_at, Some(later));
        assert_eq!(
            outcome,
            FailOutcome::Requeued {
                retry_at: policy.next_attempt_at(2, Some(later), later)
            }
        );

        op.fail_terminally("z", later + Duration::hours(1)).unwrap();
        assert_eq!(op.last_attempt_at, Some(later + Duration::hours(1)));
    }

    #[test]
    fn test_fail_while_processing_measures_from_start() {
        let policy = RetryPolicy::default();
        let mut op = op(3);
        op.begin_processing(t0()).unwrap();

        let outcome = op.fail("x", t0() + Duration::minutes(10), &policy).unwrap();
        assert_eq!(op.last_attempt_at, Some(t0()));
        assert_eq!(
            outcome,
            FailOutcome::Requeued {
                retry_at: policy.next_attempt_at(1, Some(t0()), t0())
            }
        );
    }

    #[test]
    fn test_begin_processing_rejected_unless_pending() {
        let mut op = op(3);
        op.complete(t0()).unwrap();
        assert!(matches!(
            op.begin_processing(t0()),
            Err(QueueError::InvalidTransition { from: OperationStatus::Done, .. })
        ));
        assert!(op.fail("x", t0(), &RetryPolicy::default()).is_err());
    }

    #[test]
    fn test_complete_clears_error() {
        let policy = RetryPolicy::default();
        let mut op = op(3);
        op.begin_processing(t0()).unwrap();
        op.fail("x", t0(), &policy).unwrap();
        op.begin_processing(t0() + Duration::minutes(5)).unwrap();
        op.complete(t0() + Duration::minutes(5)).unwrap();

        assert_eq!(op.status, OperationStatus::Done);
        assert_eq!(op.completed_at, Some(t0() + Duration::minutes(5)));
        assert_eq!(op.error_message, None);
        assert_eq!(op.next_attempt_at, None);
    }

    #[test]
    fn test_fail_terminally_respects_max_attempts() {
        let mut op = op(1);
        op.begin_processing(t0()).unwrap();
        op.fail_terminally("Cart 42 not found", t0()).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.attempt_count, 1);
    }

    #[test]
    fn test_resubmit_resets() {
        let policy = RetryPolicy::default();
        let mut op = op(1);
        op.fail("x", t0(), &policy).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);

        op.resubmit().unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.attempt_count, 0);
        assert_eq!(op.error_message, None);
        assert!(op.is_due(t0()));
        assert!(op.resubmit().is_err());
    }

    #[test]
    fn test_error_message_is_truncated() {
        let long = "é".repeat(MAX_ERROR_MESSAGE_LEN + 20);
        let normalized = normalize_error_message(&long);
        assert_eq!(normalized.chars().count(), MAX_ERROR_MESSAGE_LEN);
    }
}
