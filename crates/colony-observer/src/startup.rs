//! Background startup helper used by the server binary.
//!
//! [`spawn_observer`] binds eagerly, so a taken port or bad address is
//! reported to the caller instead of only being logged from the
//! background task.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use colony_ledger::LedgerStore;
use tokio::task::JoinHandle;

use crate::server::{ServerConfig, ServerError, bind, serve};
use crate::state::AppState;

/// Errors that can occur when spawning the server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// A server running on a background task.
#[derive(Debug)]
pub struct ObserverHandle {
    /// Address actually bound (useful with port 0).
    pub addr: SocketAddr,
    /// The serving task. Resolves after graceful shutdown.
    pub task: JoinHandle<()>,
}

/// Bind `config` and serve the ledger API on a background Tokio task until
/// `shutdown` resolves.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if the address cannot be bound.
pub async fn spawn_observer<S, F>(
    config: &ServerConfig,
    state: Arc<AppState<S>>,
    shutdown: F,
) -> Result<ObserverHandle, StartupError>
where
    S: LedgerStore,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;

    let task = tokio::spawn(async move {
        if let Err(e) = serve(listener, state, shutdown).await {
            tracing::error!(error = %e, "Ledger API exited with error");
        }
    });

    tracing::info!(%addr, "Ledger API spawned on background task");
    Ok(ObserverHandle { addr, task })
}
