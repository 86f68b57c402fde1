//! # Advisory Lock Repository
//!
//! Named leases in the `advisory_locks` table, shared by every process that
//! opens the same database file.
//!
//! ## Lease Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  try_acquire(key, owner, ttl)                                           │
//! │    no row                     → insert, acquired                        │
//! │    row held by same owner     → extend, acquired (re-entrant)           │
//! │    row expired (any owner)    → take over, acquired                     │
//! │    row held by someone else   → unchanged, not acquired                 │
//! │                                                                         │
//! │  One INSERT ... ON CONFLICT DO UPDATE ... WHERE: the check and the      │
//! │  write are a single statement, so two processes cannot both win.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for advisory lock leases.
#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: SqlitePool,
}

impl LockRepository {
    /// Creates a new LockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        LockRepository { pool }
    }

    /// Tries to take or renew the lease on `key`.
    pub async fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| DbError::CheckViolation {
                message: format!("lease on {} expires out of range (ttl {})", key, ttl),
            })?;

        let result = sqlx::query(
            r#"
            INSERT INTO advisory_locks (lock_key, owner, acquired_at, expires_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(lock_key) DO UPDATE SET
                owner = excluded.owner,
                acquired_at = excluded.acquired_at,
                expires_at = excluded.expires_at
            WHERE advisory_locks.owner = excluded.owner
               OR advisory_locks.expires_at <= excluded.acquired_at
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        let acquired = result.rows_affected() > 0;
        debug!(key, owner, acquired, "Advisory lock attempt");
        Ok(acquired)
    }

    /// Releases `key` if `owner` still holds it. Returns whether a lease was removed.
    pub async fn release(&self, key: &str, owner: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM advisory_locks WHERE lock_key = ?1 AND owner = ?2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current holder of `key`, ignoring expired leases.
    pub async fn holder(&self, key: &str, now: DateTime<Utc>) -> DbResult<Option<String>> {
        let owner = sqlx::query_scalar(
            "SELECT owner FROM advisory_locks WHERE lock_key = ?1 AND expires_at > ?2",
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(owner)
    }

    /// Deletes expired leases. Returns the number removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM advisory_locks WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_exclusive_until_released() {
        let locks = Database::new(DbConfig::in_memory()).await.unwrap().locks();
        let ttl = Duration::seconds(30);

        assert!(locks.try_acquire("cart:42", "terminal-1", ttl, t0()).await.unwrap());
        assert!(!locks.try_acquire("cart:42", "worker", ttl, t0()).await.unwrap());
        assert!(locks.try_acquire("cart:43", "worker", ttl, t0()).await.unwrap());

        assert!(!locks.release("cart:42", "worker").await.unwrap());
        assert!(locks.release("cart:42", "terminal-1").await.unwrap());
        assert!(locks.try_acquire("cart:42", "worker", ttl, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reentrant_for_same_owner() {
        let locks = Database::new(DbConfig::in_memory()).await.unwrap().locks();
        let ttl = Duration::seconds(30);

        assert!(locks.try_acquire("queue:a", "worker", ttl, t0()).await.unwrap());
        assert!(locks.try_acquire("queue:a", "worker", ttl, t0()).await.unwrap());
        assert_eq!(locks.holder("queue:a", t0()).await.unwrap().as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let locks = Database::new(DbConfig::in_memory()).await.unwrap().locks();

        let err = locks
            .try_acquire("cart:42", "terminal-1", Duration::days(1_000_000_000), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
        assert!(!err.is_transient());
        assert_eq!(locks.holder("cart:42", t0()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let locks = Database::new(DbConfig::in_memory()).await.unwrap().locks();
        let ttl = Duration::seconds(30);

        assert!(locks.try_acquire("cart:42", "crashed", ttl, t0()).await.unwrap());
        let later = t0() + Duration::seconds(31);
        assert_eq!(locks.holder("cart:42", later).await.unwrap(), None);
        assert!(locks.try_acquire("cart:42", "terminal-2", ttl, later).await.unwrap());
        assert_eq!(locks.purge_expired(later).await.unwrap(), 0);
        assert_eq!(locks.purge_expired(later + ttl).await.unwrap(), 1);
    }
}
