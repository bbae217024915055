//! Repository abstraction over the ledger's durable state.
//!
//! A [`LedgerStore`] owns every record the ledger keeps. Each mutating
//! method is one atomic unit: the record change and the notification that
//! announces it are committed together or not at all. Mutations on the
//! same run key (or the same visited-cell key) are mutually exclusive;
//! mutations on different keys may proceed in parallel.
//!
//! Mutating methods also take the ledger's [`NotificationFeed`]. The store
//! publishes each committed notification before the next sequence number
//! can be committed, so live subscribers receive notifications in strictly
//! increasing sequence order.
//!
//! State-machine rules stay in the ledger. The store runs the ledger's
//! transition or gate closure while it holds the run key, so the check and
//! the write cannot be interleaved with another writer.

use std::future::Future;

use chrono::{DateTime, Utc};
use colony_types::{
    DrugDeliveryEvent, ExperienceRecord, FoodCollectionEvent, GridCell, Notification, NotificationRecord,
    RunKey, SimulationRun, TumorKillEvent,
};

use crate::LedgerError;
use crate::feed::NotificationFeed;

/// Largest page any listing returns.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Errors raised by a storage backend.
///
/// These are infrastructure failures, not ledger rule violations. The
/// ledger surfaces them as [`LedgerError::Unavailable`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not complete the operation (I/O, connection loss).
    #[error("storage backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record: {message}")]
    Corrupt {
        /// What was wrong with the record.
        message: String,
    },

    /// An internal invariant of the store was violated.
    #[error("internal store error: {0}")]
    Internal(&'static str),
}

/// A window into an insertion-ordered listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Number of entries to skip.
    pub offset: u64,
    /// Maximum number of entries to return, at most [`MAX_PAGE_SIZE`].
    pub limit: u32,
}

impl Page {
    /// Build a page, clamping `limit` to [`MAX_PAGE_SIZE`].
    pub const fn new(offset: u64, limit: u32) -> Self {
        let limit = if limit > MAX_PAGE_SIZE { MAX_PAGE_SIZE } else { limit };
        Self { offset, limit }
    }

    /// The first `limit` entries.
    pub const fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }

    /// Offset as a `usize`, saturating on narrow targets.
    pub fn offset_usize(self) -> usize {
        usize::try_from(self.offset).unwrap_or(usize::MAX)
    }

    /// Limit as a `usize`.
    pub fn limit_usize(self) -> usize {
        usize::try_from(self.limit).unwrap_or(usize::MAX)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(100)
    }
}

/// A notification waiting for the store to assign its sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingNotification {
    /// Commit time of the mutation.
    pub recorded_at: DateTime<Utc>,
    /// What changed.
    pub notification: Notification,
}

impl PendingNotification {
    /// Stamp a notification with the given commit time.
    pub const fn new(notification: Notification, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            notification,
        }
    }

    /// Finalize with the sequence number assigned by the store.
    pub fn into_record(self, sequence: u64) -> NotificationRecord {
        NotificationRecord {
            sequence,
            recorded_at: self.recorded_at,
            notification: self.notification,
        }
    }
}

/// Result of a successful run transition: the record to write and the
/// notification announcing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTransition {
    /// The run record after the transition.
    pub run: SimulationRun,
    /// Notification committed with the new record.
    pub pending: PendingNotification,
}

/// Durable state behind a [`Ledger`](crate::Ledger).
///
/// Implementations: [`MemoryStore`](crate::MemoryStore) (sharded, in
/// process) and the `PostgreSQL` store in `colony-db`.
pub trait LedgerStore: Send + Sync + 'static {
    // -- Visitation dedup index ---------------------------------------------

    /// Insert `cell` into the visited set if absent.
    ///
    /// Returns the committed notification when the cell was newly inserted,
    /// or `None` (and writes nothing) when it was already present.
    fn insert_visited(
        &self,
        cell: GridCell,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send;

    /// Whether `cell` has ever been visited.
    fn is_visited(&self, cell: GridCell) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Append a food collection. Never deduplicated.
    fn append_food(
        &self,
        event: FoodCollectionEvent,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, StoreError>> + Send;

    /// Food collections in insertion order.
    fn food_collections(
        &self,
        page: Page,
    ) -> impl Future<Output = Result<Vec<FoodCollectionEvent>, StoreError>> + Send;

    // -- Run registry ---------------------------------------------------------

    /// Insert `run` if its key has no record yet.
    ///
    /// Returns `None` (and writes nothing) when a record already exists.
    fn create_run(
        &self,
        run: SimulationRun,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send;

    /// Apply `transition` to the current record of `run_key` while holding
    /// the key.
    ///
    /// The closure receives the stored record, or the zero-valued sentinel
    /// when none exists. On `Ok` the returned record and notification are
    /// committed atomically; on `Err` nothing is written and the error is
    /// returned unchanged.
    fn transition_run<F>(
        &self,
        run_key: RunKey,
        transition: F,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<(SimulationRun, NotificationRecord), LedgerError>> + Send
    where
        F: FnOnce(SimulationRun) -> Result<RunTransition, LedgerError> + Send;

    /// The stored record for `run_key`, if any.
    fn get_run(
        &self,
        run_key: RunKey,
    ) -> impl Future<Output = Result<Option<SimulationRun>, StoreError>> + Send;

    // -- Event log ------------------------------------------------------------

    /// Append a drug delivery to its run's sequence.
    ///
    /// `gate` is evaluated against the run's current record (or sentinel)
    /// while the run key is held; an `Err` aborts the append.
    fn append_delivery<G>(
        &self,
        event: DrugDeliveryEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send;

    /// Append a tumor kill to its run's sequence. Gated like
    /// [`append_delivery`](LedgerStore::append_delivery).
    fn append_kill<G>(
        &self,
        event: TumorKillEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send;

    /// Number of deliveries recorded for `run_key`.
    fn delivery_count(&self, run_key: RunKey)
    -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Number of kills recorded for `run_key`.
    fn kill_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Deliveries for `run_key` in submission order.
    fn deliveries(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<DrugDeliveryEvent>, StoreError>> + Send;

    /// Kills for `run_key` in submission order.
    fn kills(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<TumorKillEvent>, StoreError>> + Send;

    // -- Experience registry --------------------------------------------------

    /// Append an experience to its run's registry entries. Gated like
    /// [`append_delivery`](LedgerStore::append_delivery).
    fn append_experience<G>(
        &self,
        experience: ExperienceRecord,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send;

    /// Number of experiences registered for `run_key`.
    fn experience_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Experiences for `run_key` in submission order.
    fn experiences(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<ExperienceRecord>, StoreError>> + Send;

    // -- Notification outbox --------------------------------------------------

    /// Notifications with a sequence number greater than `cursor`, oldest
    /// first, at most `limit` of them.
    fn notifications_since(
        &self,
        cursor: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<NotificationRecord>, StoreError>> + Send;

    /// The highest sequence number assigned so far (0 when empty).
    fn latest_sequence(&self) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(Page::new(5, 50_000).limit, MAX_PAGE_SIZE);
        assert_eq!(Page::new(5, 10).limit, 10);
        assert_eq!(Page::default().offset, 0);
    }
}
