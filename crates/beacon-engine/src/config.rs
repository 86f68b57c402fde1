//! # Engine Configuration
//!
//! Configuration for settlement, the offline queue and the sync worker.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BEACON_PRIMARY_DB=/var/lib/beacon/pos.db                           │
//! │     BEACON_MAX_ATTEMPTS=5                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path>, or                                                │
//! │     ~/.config/beacon-pos/engine.toml (Linux)                           │
//! │     ~/Library/Application Support/beacon-pos/engine.toml (macOS)       │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! primary_path = "/var/lib/beacon/pos.db"
//! queue_path = "/var/lib/beacon/queue.db"   # omit to share the primary file
//!
//! [queue]
//! max_attempts = 3
//! base_delay_secs = 60
//! max_delay_secs = 1800
//! done_retention_days = 30
//! failed_retention_days = 7
//!
//! [sync]
//! poll_interval_secs = 5
//! batch_size = 50
//! item_timeout_secs = 30
//!
//! [settlement]
//! amount_tolerance_cents = 1
//! lock_wait_ms = 5000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use beacon_core::retry::{
    DEFAULT_BASE_DELAY_SECS, DEFAULT_DONE_RETENTION_DAYS, DEFAULT_FAILED_RETENTION_DAYS,
    DEFAULT_MAX_DELAY_SECS,
};
use beacon_core::{RetentionPolicy, RetryPolicy, DEFAULT_AMOUNT_TOLERANCE_CENTS, DEFAULT_MAX_ATTEMPTS};
use beacon_db::DbConfig;

use crate::error::{EngineError, EngineResult};
use crate::lock::LockSettings;
use crate::synchronizer::SynchronizerConfig;
use crate::worker::WorkerConfig;

/// Longest accepted retention horizon (100 years).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted lease, stale threshold or retry delay (30 days).
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

// =============================================================================
// Database Settings
// =============================================================================

/// Where the primary store and the queue store live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Carts, sales, stock and advisory locks.
    #[serde(default = "default_primary_path")]
    pub primary_path: PathBuf,

    /// Offline queue. Shares the primary file when unset.
    #[serde(default)]
    pub queue_path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_primary_path() -> PathBuf {
    PathBuf::from("beacon.db")
}
fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            primary_path: default_primary_path(),
            queue_path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseSettings {
    fn db_config(&self, path: PathBuf) -> DbConfig {
        DbConfig::new(path)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }

    pub fn primary(&self) -> DbConfig {
        self.db_config(self.primary_path.clone())
    }

    /// None when the queue shares the primary database.
    pub fn queue(&self) -> Option<DbConfig> {
        self.queue_path
            .as_ref()
            .filter(|path| **path != self.primary_path)
            .map(|path| self.db_config(path.clone()))
    }
}

// =============================================================================
// Queue Settings
// =============================================================================

/// Retry and retention for queued operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    #[serde(default = "default_done_retention")]
    pub done_retention_days: u32,

    #[serde(default = "default_failed_retention")]
    pub failed_retention_days: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay() -> u64 {
    DEFAULT_BASE_DELAY_SECS
}
fn default_max_delay() -> u64 {
    DEFAULT_MAX_DELAY_SECS
}
fn default_done_retention() -> u32 {
    DEFAULT_DONE_RETENTION_DAYS
}
fn default_failed_retention() -> u32 {
    DEFAULT_FAILED_RETENTION_DAYS
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            done_retention_days: default_done_retention(),
            failed_retention_days: default_failed_retention(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Synchronizer and worker timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Interval between cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Items picked per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Time budget for one handler call (seconds).
    #[serde(default = "default_item_timeout")]
    pub item_timeout_secs: u64,

    /// Time budget for one whole cycle (seconds).
    #[serde(default = "default_cycle_budget")]
    pub cycle_budget_secs: u64,

    /// PROCESSING items older than this are treated as abandoned (seconds).
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Interval between retention purges (seconds).
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Lease on a queue item while it is processed (seconds).
    #[serde(default = "default_item_lock_ttl")]
    pub item_lock_ttl_secs: u64,

    /// First reconnect delay after a failed cycle (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Longest reconnect delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Lock owner name. Generated per process when unset.
    #[serde(default)]
    pub worker_id: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_batch_size() -> u32 {
    50
}
fn default_item_timeout() -> u64 {
    30
}
fn default_cycle_budget() -> u64 {
    120
}
fn default_stale_after() -> u64 {
    300
}
fn default_purge_interval() -> u64 {
    3600
}
fn default_item_lock_ttl() -> u64 {
    60
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    60
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            item_timeout_secs: default_item_timeout(),
            cycle_budget_secs: default_cycle_budget(),
            stale_after_secs: default_stale_after(),
            purge_interval_secs: default_purge_interval(),
            item_lock_ttl_secs: default_item_lock_ttl(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            worker_id: None,
        }
    }
}

// =============================================================================
// Settlement Settings
// =============================================================================

/// Payment orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementSettings {
    /// Largest accepted |tendered - total|, inclusive.
    #[serde(default = "default_tolerance")]
    pub amount_tolerance_cents: i64,

    /// How long to wait for a cart or sale lock (milliseconds).
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,

    /// Pause between lock attempts (milliseconds).
    #[serde(default = "default_lock_poll")]
    pub lock_poll_ms: u64,

    /// Lease lifetime on a cart or sale (seconds).
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

fn default_tolerance() -> i64 {
    DEFAULT_AMOUNT_TOLERANCE_CENTS
}
fn default_lock_wait() -> u64 {
    5000
}
fn default_lock_poll() -> u64 {
    50
}
fn default_lock_ttl() -> u64 {
    30
}

impl Default for SettlementSettings {
    fn default() -> Self {
        SettlementSettings {
            amount_tolerance_cents: default_tolerance(),
            lock_wait_ms: default_lock_wait(),
            lock_poll_ms: default_lock_poll(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub settlement: SettlementSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (engine.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.primary_path.as_os_str().is_empty() {
            return Err(EngineError::Config("database.primary_path is empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(EngineError::Config(
                "queue.max_attempts must be greater than 0".into(),
            ));
        }
        if self.queue.base_delay_secs > self.queue.max_delay_secs {
            return Err(EngineError::Config(format!(
                "queue.base_delay_secs ({}) exceeds queue.max_delay_secs ({})",
                self.queue.base_delay_secs, self.queue.max_delay_secs
            )));
        }
        if self.sync.batch_size == 0 {
            return Err(EngineError::Config(
                "sync.batch_size must be greater than 0".into(),
            ));
        }
        if self.sync.poll_interval_secs == 0 || self.sync.item_timeout_secs == 0 {
            return Err(EngineError::Config(
                "sync intervals must be greater than 0".into(),
            ));
        }
        if self.sync.item_timeout_secs > self.sync.cycle_budget_secs {
            return Err(EngineError::Config(
                "sync.item_timeout_secs must not exceed sync.cycle_budget_secs".into(),
            ));
        }
        for (name, days) in [
            ("queue.done_retention_days", self.queue.done_retention_days),
            ("queue.failed_retention_days", self.queue.failed_retention_days),
        ] {
            if days > MAX_RETENTION_DAYS {
                return Err(EngineError::Config(format!(
                    "{} ({}) exceeds {}",
                    name, days, MAX_RETENTION_DAYS
                )));
            }
        }
        for (name, secs) in [
            ("queue.max_delay_secs", self.queue.max_delay_secs),
            ("sync.stale_after_secs", self.sync.stale_after_secs),
            ("sync.item_lock_ttl_secs", self.sync.item_lock_ttl_secs),
            ("settlement.lock_ttl_secs", self.settlement.lock_ttl_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(EngineError::Config(format!(
                    "{} ({}) exceeds {}",
                    name, secs, MAX_DURATION_SECS
                )));
            }
        }
        if self.sync.item_lock_ttl_secs == 0 || self.settlement.lock_ttl_secs == 0 {
            return Err(EngineError::Config(
                "lock ttls must be greater than 0".into(),
            ));
        }
        if self.settlement.amount_tolerance_cents < 0 {
            return Err(EngineError::Config(
                "settlement.amount_tolerance_cents must not be negative".into(),
            ));
        }
        Ok(())
    }

    /// Applies `BEACON_*` overrides read through `lookup`.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("BEACON_PRIMARY_DB") {
            debug!(path = %path, "Overriding primary database from environment");
            self.database.primary_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BEACON_QUEUE_DB") {
            debug!(path = %path, "Overriding queue database from environment");
            self.database.queue_path = Some(PathBuf::from(path));
        }

        if let Some(value) = parse_var(&lookup, "BEACON_MAX_ATTEMPTS") {
            self.queue.max_attempts = value;
        }

        if let Some(value) = parse_var(&lookup, "BEACON_POLL_INTERVAL_SECS") {
            self.sync.poll_interval_secs = value;
        }

        if let Some(value) = parse_var(&lookup, "BEACON_BATCH_SIZE") {
            self.sync.batch_size = value;
        }

        if let Some(value) = parse_var(&lookup, "BEACON_AMOUNT_TOLERANCE_CENTS") {
            self.settlement.amount_tolerance_cents = value;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "beacon-pos")
            .map(|dirs| dirs.config_dir().join("engine.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.queue.max_attempts,
            base_delay_secs: self.queue.base_delay_secs,
            max_delay_secs: self.queue.max_delay_secs,
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            done_retention_days: self.queue.done_retention_days,
            failed_retention_days: self.queue.failed_retention_days,
        }
    }

    pub fn settlement_locks(&self) -> LockSettings {
        LockSettings {
            ttl: Duration::from_secs(self.settlement.lock_ttl_secs),
            wait: Duration::from_millis(self.settlement.lock_wait_ms),
            poll: Duration::from_millis(self.settlement.lock_poll_ms),
        }
    }

    pub fn synchronizer(&self) -> SynchronizerConfig {
        SynchronizerConfig {
            batch_size: self.sync.batch_size,
            item_timeout: Duration::from_secs(self.sync.item_timeout_secs),
            cycle_budget: Duration::from_secs(self.sync.cycle_budget_secs),
            item_lock_ttl: Duration::from_secs(self.sync.item_lock_ttl_secs),
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_secs(self.sync.poll_interval_secs),
            purge_interval: Duration::from_secs(self.sync.purge_interval_secs),
            stale_after: Duration::from_secs(self.sync.stale_after_secs),
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.sync.max_backoff_secs),
        }
    }

    /// Lock owner for this process.
    pub fn worker_id(&self) -> String {
        self.sync
            .worker_id
            .clone()
            .unwrap_or_else(|| format!("beacon-sync-{}", uuid::Uuid::new_v4()))
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => {
            debug!(name, value = %raw, "Overriding setting from environment");
            Some(value)
        }
        Err(_) => {
            warn!(name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
