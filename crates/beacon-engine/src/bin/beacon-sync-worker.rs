//! # Beacon Sync Worker
//!
//! Drains the offline queue into the primary store until Ctrl-C.
//!
//! ```text
//! engine.toml + BEACON_* ──► EngineConfig
//!                              │
//!          ┌───────────────────┼────────────────────┐
//!          ▼                   ▼                    ▼
//!     primary db          queue db (opt.)     SqliteLocks
//!          │                   │                    │
//!          └──► PaymentOrchestrator ◄── LockManager ┘
//!                     │
//!                     ▼
//!     HandlerRegistry ──► QueueSynchronizer ──► SyncWorker
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beacon_db::Database;
use beacon_engine::{
    EngineConfig, HandlerRegistry, LockManager, OfflineQueue, PaymentOrchestrator,
    QueueSynchronizer, SqliteLocks, SyncWorker, UnitOfWorkFactory,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,beacon_engine=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Beacon POS Sync Worker");
                println!();
                println!("Usage: beacon-sync-worker [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>  Engine config file (default: platform config dir)");
                println!("  -h, --help           Show this help message");
                return Ok(());
            }
            other => warn!(argument = other, "Ignoring unknown argument"),
        }
        i += 1;
    }

    let config = EngineConfig::load(config_path)?;
    let worker_id = config.worker_id();
    info!(
        worker_id = %worker_id,
        primary = ?config.database.primary_path,
        queue = ?config.database.queue_path,
        "Starting Beacon sync worker"
    );

    let primary = Database::new(config.database.primary()).await?;
    let queue_db = match config.database.queue() {
        Some(queue_config) => Database::new(queue_config).await?,
        None => primary.clone(),
    };

    let lock_backend = Arc::new(SqliteLocks::new(&primary));
    let locks = LockManager::new(lock_backend.clone(), worker_id.clone(), config.settlement_locks());
    let units: Arc<dyn UnitOfWorkFactory> = Arc::new(primary.clone());
    let orchestrator = Arc::new(PaymentOrchestrator::new(
        units.clone(),
        locks,
        config.settlement.amount_tolerance_cents,
    ));

    let queue = Arc::new(OfflineQueue::new(
        Arc::new(queue_db.queue()),
        config.retry_policy(),
        config.retention_policy(),
    ));
    let registry = Arc::new(HandlerRegistry::with_defaults(orchestrator, units));
    let synchronizer = QueueSynchronizer::new(
        queue.clone(),
        registry,
        lock_backend,
        worker_id,
        config.synchronizer(),
    );

    let stats = queue.stats(None).await?;
    info!(
        pending = stats.pending,
        processing = stats.processing,
        failed = stats.failed,
        "Queue state at startup"
    );

    let (worker, handle) = SyncWorker::new(synchronizer, queue, config.worker());
    let task = tokio::spawn(worker.run());

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, stopping");
    handle.shutdown().await?;
    task.await?;

    queue_db.close().await;
    primary.close().await;
    info!("Beacon sync worker stopped");
    Ok(())
}
