//! Shared application state for the HTTP layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use colony_ledger::{Ledger, LedgerStore};

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor. The
/// ledger owns the notification feed, so `WebSocket` clients subscribe
/// through it directly.
pub struct AppState<S> {
    /// The ledger every handler operates on.
    pub ledger: Arc<Ledger<S>>,
    /// When the server started, shown on the status page.
    pub started_at: DateTime<Utc>,
}

impl<S: LedgerStore> AppState<S> {
    /// Create application state over a shared ledger.
    pub fn new(ledger: Arc<Ledger<S>>) -> Self {
        Self {
            ledger,
            started_at: Utc::now(),
        }
    }
}
