//! # Podsync
//!
//! Offline-first synchronization of podcast episodes, transcripts and
//! timecodes between a local SQLite store and the hosted backend.

pub mod cache;
pub mod config;
pub mod db;
pub mod store;
pub mod sync;

pub use config::{AppConfig, ConfigError, MonitorConfig, RemoteConfig, SyncConfig};
pub use db::Database;
pub use store::{LocalStore, SqliteStore, StorageStats, StoreError};
pub use sync::{
    HttpDataService, HttpProbe, NetworkMonitor, NetworkState, NetworkStatus, SyncEngine, SyncEngineError, SyncEvent,
};

use std::sync::Arc;

/// Run the sync daemon until Ctrl-C
pub async fn run() {
    // Load .env so RUST_LOG and PODSYNC_* are visible
    dotenvy::dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            eprintln!("FATAL: Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Database path: {:?}", config.db_path);
    let db = match Database::new(config.db_path.clone()) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("Failed to initialize database: {}", e);
            eprintln!("FATAL: Database initialization failed: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Database initialized successfully");

    let engine = match build_engine(&config, db) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("Failed to set up sync engine: {}", e);
            eprintln!("FATAL: Sync engine setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let _network_log = engine.on_network_change(|state: &NetworkState| {
        log::info!("Network is now {}", state.status);
    });
    let _sync_log = engine.on_sync_change(|event: &SyncEvent| match event {
        SyncEvent::Complete(summary) => log::info!(
            "Queue drain finished: {} delivered, {} failed",
            summary.success_count, summary.error_count
        ),
        SyncEvent::ItemError { entity_type, operation, error } => {
            log::warn!("Queued {} {} failed: {}", operation, entity_type, error)
        }
        other => log::debug!("Sync event: {}", other.as_str()),
    });

    engine.monitor().check_connection().await;

    if let Err(e) = engine.start() {
        log::error!("Failed to start background sync: {}", e);
        std::process::exit(1);
    }

    match engine.get_storage_stats().await {
        Ok(stats) => log::info!(
            "Offline store: {} cached entities, {} pending mutations",
            stats.cached_entities(),
            stats.pending_mutations
        ),
        Err(e) => log::warn!("Could not read storage stats: {}", e),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }

    log::info!("Shutting down");
    if let Err(e) = engine.stop() {
        log::warn!("Background sync did not stop cleanly: {}", e);
    }
}

fn build_engine(config: &AppConfig, db: Arc<Database>) -> Result<SyncEngine, ConfigError> {
    let store = Arc::new(SqliteStore::new(db));
    let remote = Arc::new(HttpDataService::new(&config.remote)?);
    let probe = Arc::new(HttpProbe::new(&config.probe_url()?, config.monitor.probe_timeout)?);
    let monitor = NetworkMonitor::new(probe, NetworkStatus::Online, config.monitor.clone());

    Ok(SyncEngine::new(store, remote, monitor, config.sync.clone()))
}
