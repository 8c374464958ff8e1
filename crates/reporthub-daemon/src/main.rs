use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use reporthub_core::clock::SystemClock;
use reporthub_core::config::ReporthubConfig;
use reporthub_scheduler::{
    CancelRegistry, ExecutionLedger, ExecutionRunner, Notifier, SchedulerEngine,
};
use reporthub_store::ScheduleStore;

mod clients;
mod tenants;

/// Reporthub daemon: runs the report scheduling engine against a local
/// SQLite database and the platform's HTTP services.
#[derive(Parser)]
#[command(name = "reporthub", version)]
struct Args {
    /// Path to reporthub.toml (default: $REPORTHUB_CONFIG or ~/.reporthub/reporthub.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reporthub=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = ReporthubConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        ReporthubConfig::default()
    });

    // initialize SQLite database — single file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    reporthub_store::db::init_db(&db)?;
    reporthub_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // build subsystems — store and engine each get their own connection
    let clock = Arc::new(SystemClock);
    let caps = Arc::new(tenants::ConfigCapabilities::new(config.tenants.clone()));
    let store = Arc::new(ScheduleStore::new(
        rusqlite::Connection::open(db_path)?,
        caps,
        clock.clone(),
    ));
    let ledger = Arc::new(ExecutionLedger::new(rusqlite::Connection::open(db_path)?));

    let executor = Arc::new(clients::HttpQueryExecutor::new(&config.executor));
    let transport = Arc::new(clients::HttpEmailTransport::new(&config.delivery));
    let directory = Arc::new(tenants::ConfigTenantDirectory::new(config.tenants.clone()));
    let notifier = Notifier::new(transport, directory);

    let runner = Arc::new(ExecutionRunner::new(
        executor,
        notifier,
        ledger.clone(),
        clock.clone(),
        Duration::from_secs(config.scheduler.execution_timeout_secs),
    ));
    let engine = Arc::new(SchedulerEngine::new(
        store,
        ledger,
        runner,
        Arc::new(CancelRegistry::new()),
        clock,
        &config.scheduler,
    ));

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
