//! # Retry & Retention Policies
//!
//! Pure time arithmetic for the offline queue. Callers pass `now`; nothing
//! here reads a clock.
//!
//! ## Back-off Schedule (defaults)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  delay(n) = min(2^n × base, cap)      base = 60 s, cap = 1800 s         │
//! │                                                                         │
//! │   n:      0     1     2     3     4     5     6 ...                     │
//! │   delay:  60   120   240   480   960  1800  1800 ...                    │
//! │                                                                         │
//! │  n is the attempt_count AFTER the failed attempt was recorded, so the  │
//! │  first retry waits 2 minutes and the ceiling is reached at n = 5.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_MAX_ATTEMPTS;

/// Default base delay in seconds.
pub const DEFAULT_BASE_DELAY_SECS: u64 = 60;

/// Default back-off ceiling in seconds (30 minutes).
pub const DEFAULT_MAX_DELAY_SECS: u64 = 1800;

/// Default horizon for DONE items, in days.
pub const DEFAULT_DONE_RETENTION_DAYS: u32 = 30;

/// Default horizon for FAILED items, in days.
pub const DEFAULT_FAILED_RETENTION_DAYS: u32 = 7;

// =============================================================================
// Retry Policy
// =============================================================================

/// Bounded exponential back-off for queued operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed before an item is frozen in FAILED.
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: DEFAULT_BASE_DELAY_SECS,
            max_delay_secs: DEFAULT_MAX_DELAY_SECS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt once `attempt_count` attempts have failed.
    ///
    /// Saturates at `max_delay_secs` instead of overflowing, so the result is
    /// monotonically non-decreasing in `attempt_count`.
    ///
    /// ## Example
    /// ```rust
    /// use beacon_core::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_seconds(2), 240);
    /// assert_eq!(policy.delay_seconds(u32::MAX), 1800);
    /// ```
    pub fn delay_seconds(&self, attempt_count: u32) -> u64 {
        1u64.checked_shl(attempt_count)
            .and_then(|factor| factor.checked_mul(self.base_delay_secs))
            .map_or(self.max_delay_secs, |delay| delay.min(self.max_delay_secs))
    }

    /// Earliest instant a retry may start.
    ///
    /// Measured from the last attempt when known, otherwise from `now`.
    pub fn next_attempt_at(
        &self,
        attempt_count: u32,
        last_attempt_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let from = last_attempt_at.unwrap_or(now);
        let delay = i64::try_from(self.delay_seconds(attempt_count)).unwrap_or(i64::MAX);
        Duration::try_seconds(delay)
            .and_then(|delay| from.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `attempt_count` has used up the allowance.
    #[inline]
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }
}

// =============================================================================
// Retention Policy
// =============================================================================

/// How long finished queue items are kept before purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub done_retention_days: u32,
    pub failed_retention_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy {
            done_retention_days: DEFAULT_DONE_RETENTION_DAYS,
            failed_retention_days: DEFAULT_FAILED_RETENTION_DAYS,
        }
    }
}

/// Purge boundaries derived from a retention policy and a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCutoffs {
    /// DONE items completed before this are removed.
    pub done_before: DateTime<Utc>,
    /// FAILED items last attempted before this are removed.
    pub failed_before: DateTime<Utc>,
}

impl RetentionPolicy {
    /// A horizon reaching past the representable range keeps everything.
    pub fn cutoffs(&self, now: DateTime<Utc>) -> RetentionCutoffs {
        RetentionCutoffs {
            done_before: days_before(now, self.done_retention_days),
            failed_before: days_before(now, self.failed_retention_days),
        }
    }
}

fn days_before(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    Duration::try_days(i64::from(days))
        .and_then(|horizon| now.checked_sub_signed(horizon))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..8).map(|n| policy.delay_seconds(n)).collect();
        assert_eq!(delays, vec![60, 120, 240, 480, 960, 1800, 1800, 1800]);
    }

    #[test]
    fn test_delay_is_monotonic_and_capped() {
        let policy = RetryPolicy::default();
        let mut previous = 0;
        for n in 0..200 {
            let delay = policy.delay_seconds(n);
            assert!(delay >= previous, "delay dropped at attempt {n}");
            assert!(delay <= 1800);
            previous = delay;
        }
    }

    #[test]
    fn test_large_base_saturates() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_secs: u64::MAX / 2,
            max_delay_secs: 900,
        };
        assert_eq!(policy.delay_seconds(4), 900);
    }

    #[test]
    fn test_next_attempt_measured_from_last_attempt() {
        let policy = RetryPolicy::default();
        let last = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let now = last + Duration::seconds(30);

        assert_eq!(
            policy.next_attempt_at(1, Some(last), now),
            last + Duration::seconds(120)
        );
        assert_eq!(policy.next_attempt_at(1, None, now), now + Duration::seconds(120));
    }

    #[test]
    fn test_is_exhausted() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }

    #[test]
    fn test_retention_cutoffs() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let cutoffs = RetentionPolicy::default().cutoffs(now);
        assert_eq!(cutoffs.done_before, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(cutoffs.failed_before, Utc.with_ymd_and_hms(2024, 3, 24, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_unbounded_horizons_do_not_overflow() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let cutoffs = RetentionPolicy {
            done_retention_days: u32::MAX,
            failed_retention_days: u32::MAX,
        }
        .cutoffs(now);
        assert_eq!(cutoffs.done_before, DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoffs.failed_before, DateTime::<Utc>::MIN_UTC);

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_secs: u64::MAX,
            max_delay_secs: u64::MAX,
        };
        assert_eq!(policy.next_attempt_at(1, None, now), DateTime::<Utc>::MAX_UTC);
    }
}
