//! Fintrack recurring worker
//!
//! Loads the ledger snapshot, materializes due recurring transactions on a
//! fixed interval and writes the snapshot back after every run.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fintrack_core::clock::SystemClock;
use fintrack_core::notify::TracingSink;
use fintrack_core::recurring::RecurringEngine;
use fintrack_core::storage::{MemoryStore, StoreSnapshot};
use fintrack_shared::AppConfig;
use fintrack_shared::config::StoreConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fintrack_worker=info,fintrack_core=info,fintrack::events=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().context("Failed to load configuration")?;
    let snapshot_path = Path::new(&config.worker.snapshot_path);

    let store = Arc::new(load_store(snapshot_path, &config.store).await?);
    let engine = RecurringEngine::new(
        Arc::clone(&store),
        Arc::new(SystemClock),
        Arc::new(TracingSink),
        config.recurring.clone(),
    );
    info!(
        snapshot = %snapshot_path.display(),
        interval_secs = config.worker.run_interval_secs,
        run_once = config.worker.run_once,
        "Recurring worker started"
    );

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.worker.run_interval_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }

        match engine.run() {
            Ok(report) if !report.failures.is_empty() => {
                warn!(failed = report.failures.len(), "Recurring run finished with failures");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Recurring run aborted"),
        }
        save_store(&store, snapshot_path).await?;

        if config.worker.run_once {
            break;
        }
    }

    Ok(())
}

/// Reads the snapshot at `path`, or starts empty if there is none.
async fn load_store(path: &Path, config: &StoreConfig) -> anyhow::Result<MemoryStore> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let snapshot = StoreSnapshot::from_json(&json)
                .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
            info!(
                accounts = snapshot.accounts.len(),
                templates = snapshot.recurring_templates.len(),
                "Snapshot loaded"
            );
            Ok(MemoryStore::from_snapshot(snapshot, config))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(snapshot = %path.display(), "No snapshot found, starting empty");
            Ok(MemoryStore::from_config(config))
        }
        Err(e) => Err(e).with_context(|| format!("Failed to read snapshot {}", path.display())),
    }
}

/// Writes the store's committed state to `path`.
async fn save_store(store: &MemoryStore, path: &Path) -> anyhow::Result<()> {
    let json = store.snapshot()?.to_json()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write snapshot {}", path.display()))?;
    Ok(())
}
