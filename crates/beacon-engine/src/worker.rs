//! # Sync Worker
//!
//! Background task that keeps the offline queue draining.
//!
//! ## Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncWorker::run                                │
//! │                                                                         │
//! │   ┌──────────── select ─────────────┐                                  │
//! │   │ sleep(delay)                    │                                  │
//! │   │ handle.trigger()                │──► tick()                        │
//! │   │ handle.shutdown()  ──► stop     │      │                           │
//! │   └─────────────────────────────────┘      ├── recover_stale           │
//! │                 ▲                          ├── run_cycle               │
//! │                 │                          └── purge (purge_interval)  │
//! │                 │                                 │                     │
//! │                 └──── next_delay(result) ◄────────┘                     │
//! │                                                                         │
//! │   Ok                    → poll_interval, back-off reset                 │
//! │   store unreachable     → exponential back-off (initial → max)         │
//! │   anything else         → poll_interval                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::offline::OfflineQueue;
use crate::synchronizer::{CycleReport, QueueSynchronizer};

/// Worker timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub purge_interval: Duration,
    /// PROCESSING items older than this are treated as interrupted.
    pub stale_after: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_secs(5),
            purge_interval: Duration::from_secs(3600),
            stale_after: Duration::from_secs(300),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

pub struct SyncWorker {
    synchronizer: QueueSynchronizer,
    queue: Arc<OfflineQueue>,
    config: WorkerConfig,
    backoff: ExponentialBackoff,
    last_purge: Option<Instant>,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
}

/// Controls a running [`SyncWorker`].
#[derive(Clone)]
pub struct SyncWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
}

impl SyncWorkerHandle {
    /// Triggers graceful shutdown after the current tick.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| EngineError::Channel("Sync worker already stopped".into()))
    }

    /// Runs a tick now instead of waiting for the poll interval.
    ///
    /// Coalesces with a trigger that has not been picked up yet.
    pub fn trigger(&self) {
        if self.trigger_tx.try_send(()).is_err() {
            debug!("Sync already triggered");
        }
    }
}

impl SyncWorker {
    pub fn new(
        synchronizer: QueueSynchronizer,
        queue: Arc<OfflineQueue>,
        config: WorkerConfig,
    ) -> (Self, SyncWorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let backoff = ExponentialBackoff {
            current_interval: config.initial_backoff,
            initial_interval: config.initial_backoff,
            max_interval: config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        let worker = SyncWorker {
            synchronizer,
            queue,
            config,
            backoff,
            last_purge: None,
            shutdown_rx,
            trigger_rx,
        };
        let handle = SyncWorkerHandle {
            shutdown_tx,
            trigger_tx,
        };

        (worker, handle)
    }

    /// Runs until shut down. Spawn as a background task.
    pub async fn run(mut self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.synchronizer.config().batch_size,
            "Sync worker starting"
        );

        let mut delay = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}

                Some(()) = self.trigger_rx.recv() => {
                    debug!("Sync triggered");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Sync worker shutting down");
                    break;
                }
            }

            let result = self.tick().await;
            delay = self.next_delay(&result);
        }

        info!("Sync worker stopped");
    }

    /// One pass: recover interrupted items, drain, purge when due.
    pub async fn tick(&mut self) -> EngineResult<CycleReport> {
        self.queue
            .recover_stale(self.config.stale_after, Utc::now())
            .await?;

        let report = self.synchronizer.run_cycle().await?;

        if self.purge_due() {
            self.queue.purge(Utc::now()).await?;
            self.last_purge = Some(Instant::now());
        }

        Ok(report)
    }

    fn purge_due(&self) -> bool {
        self.last_purge
            .map_or(true, |at| at.elapsed() >= self.config.purge_interval)
    }

    /// Wait before the next tick.
    fn next_delay(&mut self, result: &EngineResult<CycleReport>) -> Duration {
        match result {
            Ok(_) => {
                self.backoff.reset();
                self.config.poll_interval
            }
            Err(e) if e.is_retryable() => {
                let delay = self
                    .backoff
                    .next_backoff()
                    .unwrap_or(self.config.max_backoff);
                warn!(
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Queue store unreachable, backing off"
                );
                delay
            }
            Err(e) => {
                error!(error = %e, category = %e.category(), "Sync tick failed");
                self.config.poll_interval
            }
        }
    }
}
