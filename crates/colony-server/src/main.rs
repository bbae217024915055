//! Ledger server binary for Colony simulations.
//!
//! Wires configuration, storage, the HTTP API and the optional NATS relay
//! together, then serves until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `colony-config.yaml` (or `COLONY_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the storage backend (memory, or `PostgreSQL` plus migrations)
//! 4. Build the ledger with the configured consistency mode
//! 5. Connect the NATS relay, if configured
//! 6. Serve the HTTP API until Ctrl-C or SIGTERM

mod config;
mod error;
mod nats;

use std::path::PathBuf;
use std::sync::Arc;

use colony_db::{PgLedgerStore, PostgresConfig, PostgresPool};
use colony_ledger::{Ledger, LedgerStore, MemoryStore};
use colony_observer::AppState;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ColonyConfig, LoggingConfig, StorageBackend};
use crate::error::ServerError;
use crate::nats::NatsRelay;

/// Application entry point for the ledger server.
///
/// # Errors
///
/// Returns an error if configuration, storage, or the listener fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(&config.logging);

    info!(
        backend = ?config.storage.backend,
        consistency = ?config.ledger.consistency,
        host = %config.server.host,
        port = config.server.port,
        "colony-server starting"
    );

    match config.storage.backend {
        StorageBackend::Memory => {
            let store = MemoryStore::with_shards(config.storage.shards);
            info!(shards = store.shard_count(), "In-memory store ready");
            run(store, &config).await?;
        }
        StorageBackend::Postgres => {
            let pg_config = PostgresConfig::new(&config.storage.postgres_url)
                .with_max_connections(config.storage.max_connections);
            let pool = PostgresPool::connect(&pg_config)
                .await
                .map_err(ServerError::from)?;
            pool.run_migrations().await.map_err(ServerError::from)?;
            info!("PostgreSQL store ready");
            let result = run(PgLedgerStore::new(&pool), &config).await;
            pool.close().await;
            result?;
        }
    }

    info!("colony-server stopped");
    Ok(())
}

/// Serve the ledger over `store` until shutdown.
async fn run<S: LedgerStore>(store: S, config: &ColonyConfig) -> Result<(), ServerError> {
    let ledger = Arc::new(Ledger::with_config(store, &config.ledger));

    let relay = match &config.notifications.nats_url {
        Some(url) => {
            info!(nats_url = %url, "Connecting to NATS");
            let relay = NatsRelay::connect(url, &config.notifications.subject_prefix).await?;
            Some(relay.spawn(Arc::clone(&ledger)))
        }
        None => None,
    };

    let state = Arc::new(AppState::new(Arc::clone(&ledger)));
    let handle = colony_observer::spawn_observer(&config.server, state, shutdown_signal()).await?;

    let served = handle.task.await;

    // The relay holds the ledger, so its feed never closes on its own.
    if let Some(relay) = relay {
        relay.abort();
    }

    served.map_err(|e| ServerError::Task {
        message: format!("API task failed: {e}"),
    })
}

/// Load configuration from `COLONY_CONFIG` or `colony-config.yaml`.
///
/// A missing file is not an error: defaults are used, and environment
/// overrides still apply.
fn load_config() -> Result<ColonyConfig, ServerError> {
    let path = std::env::var("COLONY_CONFIG")
        .map_or_else(|_| PathBuf::from("colony-config.yaml"), PathBuf::from);
    if path.exists() {
        Ok(ColonyConfig::from_file(&path)?)
    } else {
        let mut config = ColonyConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
