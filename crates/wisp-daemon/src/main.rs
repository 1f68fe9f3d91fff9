//! # wisp-daemon
//!
//! Maintenance daemon for the Wisp backend.
//!
//! Opens the record store and the payload store, wires up the lifecycle
//! engine and the streak tracker, and runs the periodic sweep that purges
//! expired snaps, stories, and messages and updates streak windows.
//!
//! The HTTP API layer runs as a separate process against the same stores;
//! this binary only owns the time-driven transitions.

mod config;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wisp_core::{
    LifecycleEngine, PayloadStore, StreakTracker, Sweeper, SystemClock,
};
use wisp_store::Database;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wisp_daemon=debug")),
        )
        .init();

    info!("Starting Wisp daemon v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DaemonConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Record store (runs migrations on open).
    let db = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let db = Arc::new(Mutex::new(db));

    // Payload store (creates directory if missing).
    let payloads = Arc::new(
        PayloadStore::new(
            config.payload_storage_path.clone(),
            config.max_payload_size,
            config.payload_timeout(),
        )
        .await?,
    );

    let engine = LifecycleEngine::new(db.clone(), payloads, config.lifecycle.clone());
    let tracker = StreakTracker::new(db, config.streaks.clone());

    // -----------------------------------------------------------------------
    // 4. Run the sweep loop (blocks until shutdown)
    // -----------------------------------------------------------------------
    let sweeper = Sweeper::new(
        engine,
        tracker,
        Arc::new(SystemClock),
        config.sweep_interval(),
    );
    let mut sweep_task = tokio::spawn(sweeper.run());

    tokio::select! {
        result = &mut sweep_task => {
            // The loop never returns; reaching this means the task panicked.
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            sweep_task.abort();
        }
    }

    Ok(())
}
