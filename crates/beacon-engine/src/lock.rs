//! # Advisory Locking
//!
//! Serializes work on one cart, sale or queue item across terminals and the
//! sync worker.
//!
//! ## Lease Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LockManager::acquire("cart:42")                                        │
//! │       │                                                                 │
//! │       ├── try_acquire(key, "{owner}:{uuid}") ── true ──► LockLease     │
//! │       │        │                                                        │
//! │       │      false                                                      │
//! │       │        ▼                                                        │
//! │       │   sleep(poll) ── elapsed < lock_wait ──► try again             │
//! │       │        │                                                        │
//! │       │        └── elapsed ≥ lock_wait ──► EngineError::LockTimeout    │
//! │       │                                                                 │
//! │  LockManager::release(lease)   explicit, never on drop                 │
//! │                                                                         │
//! │  Every acquisition holds under its own token, so two tasks sharing one │
//! │  manager exclude each other like two terminals do.                     │
//! │                                                                         │
//! │  Backends:                                                             │
//! │  • InProcessLocks  - one process (tests, single-terminal installs)     │
//! │  • SqliteLocks     - advisory_locks table (see sqlite.rs)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::gateway::{AdvisoryLock, GatewayError, GatewayResult};

/// Timing for lease acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Lease lifetime; a holder that crashes blocks the key at most this long.
    pub ttl: Duration,
    /// Total time `acquire` keeps trying.
    pub wait: Duration,
    /// Pause between attempts.
    pub poll: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            ttl: Duration::from_secs(30),
            wait: Duration::from_secs(5),
            poll: Duration::from_millis(50),
        }
    }
}

/// A held lease. Must be handed back to [`LockManager::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct LockLease {
    key: String,
    owner: String,
    token: String,
}

impl LockLease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Holder recorded in the backend for this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Unique holder name for one acquisition by `owner`.
pub fn lease_token(owner: &str) -> String {
    format!("{}:{}", owner, Uuid::new_v4())
}

/// Polls an [`AdvisoryLock`] backend on behalf of one owner.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn AdvisoryLock>,
    owner: String,
    settings: LockSettings,
}

impl LockManager {
    pub fn new(backend: Arc<dyn AdvisoryLock>, owner: impl Into<String>, settings: LockSettings) -> Self {
        LockManager {
            backend,
            owner: owner.into(),
            settings,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Waits up to `settings.wait` for `key`.
    pub async fn acquire(&self, key: &str) -> EngineResult<LockLease> {
        let token = lease_token(&self.owner);
        let started = Instant::now();
        loop {
            if self.backend.try_acquire(key, &token, self.settings.ttl).await? {
                debug!(key, token = %token, "Lock acquired");
                return Ok(LockLease {
                    key: key.to_string(),
                    owner: self.owner.clone(),
                    token,
                });
            }

            let waited = started.elapsed();
            if waited >= self.settings.wait {
                warn!(key, owner = %self.owner, waited_ms = waited.as_millis() as u64, "Lock wait expired");
                return Err(EngineError::LockTimeout {
                    key: key.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }

            let remaining = self.settings.wait - waited;
            tokio::time::sleep(self.settings.poll.min(remaining)).await;
        }
    }

    pub async fn release(&self, lease: LockLease) -> EngineResult<()> {
        self.backend.release(&lease.key, &lease.token).await?;
        debug!(key = %lease.key, token = %lease.token, "Lock released");
        Ok(())
    }

    /// Releases without surfacing errors; the lease expires on its own.
    pub async fn release_quietly(&self, lease: LockLease) {
        let key = lease.key.clone();
        if let Err(e) = self.release(lease).await {
            warn!(key = %key, error = %e, "Failed to release lock, waiting for expiry");
        }
    }
}

// =============================================================================
// In-Process Backend
// =============================================================================

#[derive(Debug)]
struct Lease {
    owner: String,
    expires_at: Instant,
}

/// Lease table kept in memory. Only serializes callers in this process.
#[derive(Debug, Default)]
pub struct InProcessLocks {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InProcessLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvisoryLock for InProcessLocks {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> GatewayResult<bool> {
        let now = Instant::now();
        let expires_at = now.checked_add(ttl).ok_or_else(|| {
            GatewayError::Conflict(format!("lease ttl out of range: {:?}", ttl))
        })?;
        let mut leases = self.leases.lock().await;

        if let Some(current) = leases.get(key) {
            if current.owner != owner && current.expires_at > now {
                return Ok(false);
            }
        }

        leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, owner: &str) -> GatewayResult<()> {
        let mut leases = self.leases.lock().await;
        if leases.get(key).is_some_and(|lease| lease.owner == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(backend: Arc<dyn AdvisoryLock>, owner: &str, wait_ms: u64) -> LockManager {
        LockManager::new(
            backend,
            owner,
            LockSettings {
                ttl: Duration::from_secs(30),
                wait: Duration::from_millis(wait_ms),
                poll: Duration::from_millis(10),
            },
        )
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let backend: Arc<dyn AdvisoryLock> = Arc::new(InProcessLocks::new());
        let terminal = manager(backend.clone(), "terminal-1", 50);
        let worker = manager(backend, "worker", 50);

        let lease = terminal.acquire("cart:42").await.unwrap();
        assert_eq!(lease.key(), "cart:42");

        let err = worker.acquire("cart:42").await.unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout { ref key, .. } if key == "cart:42"));
        assert!(err.is_retryable());

        terminal.release(lease).await.unwrap();
        let lease = worker.acquire("cart:42").await.unwrap();
        assert_eq!(lease.owner(), "worker");
    }

    #[tokio::test]
    async fn test_one_manager_does_not_share_a_lease() {
        let backend: Arc<dyn AdvisoryLock> = Arc::new(InProcessLocks::new());
        let terminal = manager(backend, "terminal-3", 50);

        let first = terminal.acquire("cart:42").await.unwrap();
        assert!(first.token().starts_with("terminal-3:"));

        let err = terminal.acquire("cart:42").await.unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout { .. }));

        terminal.release(first).await.unwrap();
        let second = terminal.acquire("cart:42").await.unwrap();
        assert_eq!(second.owner(), "terminal-3");
    }

    #[tokio::test]
    async fn test_stale_lease_release_does_not_free_new_holder() {
        let backend: Arc<dyn AdvisoryLock> = Arc::new(InProcessLocks::new());
        let terminal = manager(backend.clone(), "terminal-3", 50);

        let lease = terminal.acquire("cart:42").await.unwrap();
        let copy = LockLease {
            key: lease.key.clone(),
            owner: lease.owner.clone(),
            token: lease_token("terminal-3"),
        };
        terminal.release(copy).await.unwrap();

        assert!(!backend
            .try_acquire("cart:42", "worker", Duration::from_secs(30))
            .await
            .unwrap());
        terminal.release(lease).await.unwrap();
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let locks = InProcessLocks::new();
        let err = locks.try_acquire("cart:42", "a", Duration::MAX).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let backend: Arc<dyn AdvisoryLock> = Arc::new(InProcessLocks::new());
        let terminal = manager(backend.clone(), "terminal-1", 1000);
        let worker = manager(backend, "worker", 1000);

        let lease = terminal.acquire("cart:42").await.unwrap();
        let waiter = tokio::spawn(async move { worker.acquire("cart:42").await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        terminal.release(lease).await.unwrap();

        let lease = waiter.await.unwrap().unwrap();
        assert_eq!(lease.owner(), "worker");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_taken_over() {
        let locks = InProcessLocks::new();
        let ttl = Duration::from_secs(30);

        assert!(locks.try_acquire("queue:a", "crashed", ttl).await.unwrap());
        assert!(!locks.try_acquire("queue:a", "worker", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(locks.try_acquire("queue:a", "worker", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_by_other_owner_is_ignored() {
        let locks = InProcessLocks::new();
        let ttl = Duration::from_secs(30);

        assert!(locks.try_acquire("sale:9", "a", ttl).await.unwrap());
        locks.release("sale:9", "b").await.unwrap();
        assert!(!locks.try_acquire("sale:9", "b", ttl).await.unwrap());
        assert!(locks.try_acquire("sale:9", "a", ttl).await.unwrap());
    }
}
