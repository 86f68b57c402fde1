//! # Offline Queue Repository
//!
//! Persistence for queued operations. Status changes are decided by the pure
//! state machine in `beacon_core::queue`; this repository loads rows, writes
//! them back, and guards every write with the status it was read in.
//!
//! ## Drain Order
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SELECT ... WHERE status = 'PENDING'                                    │
//! │             AND (next_attempt_at IS NULL OR next_attempt_at <= now)     │
//! │  ORDER BY priority ASC, created_at ASC, rowid ASC                       │
//! │  LIMIT n                                                                │
//! │                                                                         │
//! │  priority 1 ──► drained first                                          │
//! │  same priority ──► oldest enqueue first                                │
//! │  back-off not elapsed ──► invisible until due                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Optimistic Status Guard
//! `update_transition(op, expected)` only writes when the row is still in
//! `expected`. A second worker that read the same row loses with
//! [`DbError::Conflict`] instead of overwriting the winner.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use beacon_core::retry::RetentionCutoffs;
use beacon_core::{
    OperationPayload, OperationStatus, OperationType, PurgeReport, QueueStats, QueuedOperation,
};

const QUEUE_COLUMNS: &str = "id, operation_type, payload, terminal_id, cashier_id, status, \
     attempt_count, max_attempts, priority, notes, created_at, last_attempt_at, \
     next_attempt_at, completed_at, error_message";

/// Raw row; the payload column is JSON.
#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: String,
    operation_type: OperationType,
    payload: String,
    terminal_id: i64,
    cashier_id: i64,
    status: OperationStatus,
    attempt_count: i64,
    max_attempts: i64,
    priority: i64,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl TryFrom<QueueRow> for QueuedOperation {
    type Error = DbError;

    fn try_from(row: QueueRow) -> DbResult<Self> {
        let payload: OperationPayload = serde_json::from_str(&row.payload)?;
        if payload.operation_type() != row.operation_type {
            return Err(DbError::Serialization(format!(
                "queued operation {} is {} but carries a {} payload",
                row.id,
                row.operation_type,
                payload.operation_type()
            )));
        }

        let out_of_range = |field: &str| {
            DbError::Serialization(format!("queued operation {}: {field} out of range", row.id))
        };

        Ok(QueuedOperation {
            attempt_count: u32::try_from(row.attempt_count).map_err(|_| out_of_range("attempt_count"))?,
            max_attempts: u32::try_from(row.max_attempts).map_err(|_| out_of_range("max_attempts"))?,
            priority: u8::try_from(row.priority).map_err(|_| out_of_range("priority"))?,
            id: row.id,
            operation_type: row.operation_type,
            payload,
            terminal_id: row.terminal_id,
            cashier_id: row.cashier_id,
            status: row.status,
            notes: row.notes,
            created_at: row.created_at,
            last_attempt_at: row.last_attempt_at,
            next_attempt_at: row.next_attempt_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

fn into_operations(rows: Vec<QueueRow>) -> DbResult<Vec<QueuedOperation>> {
    rows.into_iter().map(QueuedOperation::try_from).collect()
}

/// Repository for offline queue operations.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    /// Creates a new QueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        QueueRepository { pool }
    }

    /// Inserts a freshly built operation.
    pub async fn insert(&self, op: &QueuedOperation) -> DbResult<()> {
        let payload = serde_json::to_string(&op.payload)?;

        sqlx::query(
            r#"
            INSERT INTO queued_operations (
                id, operation_type, payload, terminal_id, cashier_id, status,
                attempt_count, max_attempts, priority, notes, created_at,
                last_attempt_at, next_attempt_at, completed_at, error_message
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6,
                ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15
            )
            "#,
        )
        .bind(&op.id)
        .bind(op.operation_type)
        .bind(payload)
        .bind(op.terminal_id)
        .bind(op.cashier_id)
        .bind(op.status)
        .bind(i64::from(op.attempt_count))
        .bind(i64::from(op.max_attempts))
        .bind(i64::from(op.priority))
        .bind(op.notes.as_deref())
        .bind(op.created_at)
        .bind(op.last_attempt_at)
        .bind(op.next_attempt_at)
        .bind(op.completed_at)
        .bind(op.error_message.as_deref())
        .execute(&self.pool)
        .await?;

        debug!(
            id = %op.id,
            operation_type = %op.operation_type,
            priority = op.priority,
            "Operation queued"
        );
        Ok(())
    }

    /// Gets an operation by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueuedOperation>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM queued_operations WHERE id = ?1");
        let row: Option<QueueRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(QueuedOperation::try_from).transpose()
    }

    /// Writes the mutable columns of `op` if the row is still in `expected`.
    pub async fn update_transition(
        &self,
        op: &QueuedOperation,
        expected: OperationStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE queued_operations
            SET status = ?1,
                attempt_count = ?2,
                last_attempt_at = ?3,
                next_attempt_at = ?4,
                completed_at = ?5,
                error_message = ?6
            WHERE id = ?7 AND status = ?8
            "#,
        )
        .bind(op.status)
        .bind(i64::from(op.attempt_count))
        .bind(op.last_attempt_at)
        .bind(op.next_attempt_at)
        .bind(op.completed_at)
        .bind(op.error_message.as_deref())
        .bind(&op.id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.exists(&op.id).await? {
                true => DbError::conflict("QueuedOperation", &op.id),
                false => DbError::not_found("QueuedOperation", &op.id),
            });
        }

        debug!(id = %op.id, from = %expected, to = %op.status, "Queue transition saved");
        Ok(())
    }

    async fn exists(&self, id: &str) -> DbResult<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM queued_operations WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// PENDING items in drain order, optionally for one terminal.
    pub async fn pending(&self, terminal_id: Option<i64>, limit: u32) -> DbResult<Vec<QueuedOperation>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM queued_operations
            WHERE status = ?1 AND (?2 IS NULL OR terminal_id = ?2)
            ORDER BY priority ASC, created_at ASC, rowid ASC
            LIMIT ?3
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(OperationStatus::Pending)
            .bind(terminal_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_operations(rows)
    }

    /// PENDING items whose back-off has elapsed at `now`, in drain order.
    pub async fn due_pending(&self, now: DateTime<Utc>, limit: u32) -> DbResult<Vec<QueuedOperation>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM queued_operations
            WHERE status = ?1 AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
            ORDER BY priority ASC, created_at ASC, rowid ASC
            LIMIT ?3
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(OperationStatus::Pending)
            .bind(now)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_operations(rows)
    }

    /// FAILED items, most recent attempt first.
    pub async fn failed(&self, terminal_id: Option<i64>, limit: u32) -> DbResult<Vec<QueuedOperation>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM queued_operations
            WHERE status = ?1 AND (?2 IS NULL OR terminal_id = ?2)
            ORDER BY last_attempt_at DESC, rowid DESC
            LIMIT ?3
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(OperationStatus::Failed)
            .bind(terminal_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_operations(rows)
    }

    /// PROCESSING items whose attempt started before `started_before`.
    pub async fn stale_processing(
        &self,
        started_before: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<QueuedOperation>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS} FROM queued_operations
            WHERE status = ?1 AND last_attempt_at < ?2
            ORDER BY last_attempt_at ASC
            LIMIT ?3
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(OperationStatus::Processing)
            .bind(started_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        into_operations(rows)
    }

    /// Deletes DONE and FAILED items older than their horizons.
    pub async fn purge(&self, cutoffs: RetentionCutoffs) -> DbResult<PurgeReport> {
        let mut tx = self.pool.begin().await?;

        let done = sqlx::query("DELETE FROM queued_operations WHERE status = ?1 AND completed_at < ?2")
            .bind(OperationStatus::Done)
            .bind(cutoffs.done_before)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let failed =
            sqlx::query("DELETE FROM queued_operations WHERE status = ?1 AND last_attempt_at < ?2")
                .bind(OperationStatus::Failed)
                .bind(cutoffs.failed_before)
                .execute(&mut *tx)
                .await?
                .rows_affected();

        tx.commit().await?;

        let report = PurgeReport {
            done_purged: done,
            failed_purged: failed,
        };
        if done + failed > 0 {
            info!(done_purged = done, failed_purged = failed, "Queue retention purge");
        }
        Ok(report)
    }

    /// Counts per status, optionally for one terminal.
    pub async fn stats(&self, terminal_id: Option<i64>) -> DbResult<QueueStats> {
        let counts: Vec<(OperationStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM queued_operations
            WHERE ?1 IS NULL OR terminal_id = ?1
            GROUP BY status
            "#,
        )
        .bind(terminal_id)
        .fetch_all(&self.pool)
        .await?;

        let oldest_pending_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT created_at FROM queued_operations
            WHERE status = ?1 AND (?2 IS NULL OR terminal_id = ?2)
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(OperationStatus::Pending)
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;

        let mut stats = QueueStats {
            oldest_pending_at,
            ..QueueStats::default()
        };
        for (status, count) in counts {
            match status {
                OperationStatus::Pending => stats.pending = count,
                OperationStatus::Processing => stats.processing = count,
                OperationStatus::Done => stats.done = count,
                OperationStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}
