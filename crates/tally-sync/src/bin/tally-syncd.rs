//! # tally-syncd
//!
//! Runs the sync agent for one terminal until Ctrl-C.
//!
//! ## Startup Sequence
//! ```text
//! 1. Logging      tracing-subscriber, RUST_LOG (default: info)
//! 2. Config       defaults → sync.toml → TALLY_* environment
//! 3. Database     SQLite file (TALLY_DB_PATH or platform data dir), migrations
//! 4. Transport    reqwest client against server.base_url
//! 5. Agent        push + pull loops until Ctrl-C
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tally_db::{Database, DbConfig};
use tally_sync::{HttpTransport, SyncAgent, SyncConfig, SyncError, SyncResult, TransportConfig};

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        error!(error = %e, "tally-syncd failed");
        std::process::exit(1);
    }
}

async fn run() -> SyncResult<()> {
    info!("Starting tally-syncd");

    let config = SyncConfig::load(None)?;
    let db_path = database_path()?;
    info!(?db_path, "Database path determined");

    let db = Database::new(DbConfig::new(db_path)).await?;
    let transport = HttpTransport::new(TransportConfig::from_sync_config(&config)?)?;

    let handle = SyncAgent::new(config, db.clone(), Arc::new(transport))
        .start()
        .await?;

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| SyncError::ChannelError(format!("Ctrl-C handler failed: {e}")))?;
    info!("Ctrl-C received");

    handle.shutdown().await;
    db.close().await;
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=tally_sync=trace` - Trace the engine only
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// `TALLY_DB_PATH` wins over the platform data directory.
fn database_path() -> SyncResult<PathBuf> {
    if let Ok(path) = std::env::var("TALLY_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    let path = SyncConfig::default_database_path().ok_or_else(|| {
        SyncError::InvalidConfig("Could not determine app data directory".into())
    })?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            SyncError::InvalidConfig(format!("Cannot create {}: {e}", dir.display()))
        })?;
    }
    Ok(path)
}
