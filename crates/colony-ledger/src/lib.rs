//! Append-only, idempotent event ledger for Colony simulation runs.
//!
//! The ledger records discrete events produced by an external multi-agent
//! simulation and manages the lifecycle of named simulation runs. It is a
//! faithful, order-preserving recorder: it does not compute outcomes and
//! does not judge the plausibility of what it is told.
//!
//! # Architecture
//!
//! The ledger is composed of five components over one shared store:
//!
//! - [`visitation`] -- Visitation dedup index and food collection log.
//! - [`registry`] -- Run registry: exactly-once initialization and
//!   exactly-once, submitter-authorized completion.
//! - [`event_log`] -- Per-run, per-kind append-only drug delivery and tumor
//!   kill sequences.
//! - [`experience`] -- Experience registry: archived outcomes of runs.
//! - [`query`] -- Read-only façade used by dashboards.
//!
//! Storage is abstracted behind [`LedgerStore`]. Every mutation is one
//! atomic store call that also appends the mutation's notification
//! (outbox) and publishes it on the [`Ledger`]'s [`NotificationFeed`]
//! before any later sequence number is published.
//!
//! # Run lifecycle
//!
//! ```text
//! Uninitialized --initialize_simulation--> Active --complete_simulation--> Completed
//! ```
//!
//! # Usage
//!
//! ```
//! use colony_ledger::{Ledger, MemoryStore};
//! use colony_types::{CallerId, RunKey, RunSummary};
//!
//! # tokio::runtime::Builder::new_current_thread().build().map(|rt| rt.block_on(async {
//! let ledger = Ledger::new(MemoryStore::new());
//! let Some(owner) = CallerId::new("U1") else { return };
//! let run = RunKey::from_label("run-A");
//!
//! ledger.initialize_simulation(&owner, run).await.ok();
//! let summary = RunSummary { total_steps: 500, cells_killed: 12, drug_deliveries: 3 };
//! ledger.complete_simulation(&owner, run, summary).await.ok();
//!
//! let record = ledger.simulation_run(run).await.ok();
//! assert_eq!(record.map(|r| r.completed), Some(true));
//! # })).ok();
//! ```

pub mod arena;
pub mod event_log;
pub mod experience;
pub mod feed;
pub mod ledger;
pub mod memory;
pub mod query;
pub mod registry;
pub mod store;
pub mod visitation;

// Re-export primary types at crate root.
pub use arena::EventArena;
pub use event_log::{DrugDelivery, TumorKill};
pub use experience::Experience;
pub use feed::{FeedError, NotificationFeed, Subscription};
pub use ledger::{ConsistencyMode, Ledger, LedgerConfig};
pub use memory::MemoryStore;
pub use store::{LedgerStore, MAX_PAGE_SIZE, Page, PendingNotification, RunTransition, StoreError};

use colony_types::{CallerId, RunKey, RunStatus};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Broad class of a [`LedgerError`], used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation is invalid for the current state of the run.
    Precondition,
    /// The caller is not allowed to perform the operation.
    Authorization,
    /// The storage backend failed. Retry with backoff.
    Unavailable,
}

/// Errors returned by ledger operations.
///
/// Precondition and authorization failures are deterministic given the
/// current state and leave the ledger unchanged. Only
/// [`LedgerError::Unavailable`] is worth retrying blindly.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// `initialize_simulation` on a run key that already has a record.
    #[error("run {run_key} already exists")]
    RunAlreadyExists {
        /// The offending run key.
        run_key: RunKey,
    },

    /// `complete_simulation` on a run key with no record, or (strict mode)
    /// an experience for a run that was never initialized.
    #[error("run {run_key} has not been initialized")]
    RunNotInitialized {
        /// The offending run key.
        run_key: RunKey,
    },

    /// `complete_simulation` on a run that is already completed.
    #[error("run {run_key} is already completed")]
    RunAlreadyCompleted {
        /// The offending run key.
        run_key: RunKey,
    },

    /// The caller is not the submitter of the run.
    #[error("caller {caller} is not the submitter of run {run_key}")]
    Unauthorized {
        /// The run being completed.
        run_key: RunKey,
        /// The rejected caller.
        caller: CallerId,
    },

    /// Strict consistency mode: the run is not accepting events.
    #[error("run {run_key} is {status}, events require an active run")]
    RunNotActive {
        /// The offending run key.
        run_key: RunKey,
        /// The run's current status.
        status: RunStatus,
    },

    /// The storage backend failed.
    #[error("ledger storage unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl LedgerError {
    /// The class of this error.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::RunAlreadyExists { .. }
            | Self::RunNotInitialized { .. }
            | Self::RunAlreadyCompleted { .. }
            | Self::RunNotActive { .. } => ErrorClass::Precondition,
            Self::Unauthorized { .. } => ErrorClass::Authorization,
            Self::Unavailable(_) => ErrorClass::Unavailable,
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RunAlreadyExists { .. } => "RUN_ALREADY_EXISTS",
            Self::RunNotInitialized { .. } => "RUN_NOT_INITIALIZED",
            Self::RunAlreadyCompleted { .. } => "RUN_ALREADY_COMPLETED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::RunNotActive { .. } => "RUN_NOT_ACTIVE",
            Self::Unavailable(_) => "UNAVAILABLE",
        }
    }

    /// Whether retrying the same request can succeed without a state change.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Unavailable)
    }
}
