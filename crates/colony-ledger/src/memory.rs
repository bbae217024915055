//! Sharded in-memory implementation of [`LedgerStore`].
//!
//! Run records and their event arenas are split across a fixed number of
//! shards chosen from the run key, each behind its own mutex. Holding a
//! shard lock makes every mutation on a run key exclusive while runs in
//! other shards proceed in parallel. The visited-cell set is sharded the
//! same way by cell key.
//!
//! The notification log is appended while the shard lock is still held,
//! and the record is published on the feed before the log lock is
//! released, so the feed carries sequence numbers in ascending order.
//! Lock order is always shard, then log.

use std::collections::{HashMap, HashSet};
use std::future::{Future, ready};
use std::sync::{Mutex, MutexGuard, PoisonError};

use colony_types::{
    CellKey, DrugDeliveryEvent, ExperienceRecord, FoodCollectionEvent, GridCell, NotificationRecord, RunKey,
    SimulationRun, TumorKillEvent,
};

use crate::arena::EventArena;
use crate::feed::NotificationFeed;
use crate::store::{LedgerStore, Page, PendingNotification, RunTransition, StoreError};
use crate::LedgerError;

/// Default number of run shards.
pub const DEFAULT_SHARDS: usize = 16;

/// Per-shard run state.
#[derive(Debug, Default)]
struct RunShard {
    runs: HashMap<RunKey, SimulationRun>,
    deliveries: EventArena<DrugDeliveryEvent>,
    kills: EventArena<TumorKillEvent>,
    experiences: EventArena<ExperienceRecord>,
}

/// Append-only notification log. Sequence numbers are `index + 1`.
#[derive(Debug, Default)]
struct NotificationLog {
    records: Vec<NotificationRecord>,
}

impl NotificationLog {
    /// Assign the next sequence number and publish while still held.
    fn append(&mut self, pending: PendingNotification, feed: &NotificationFeed) -> NotificationRecord {
        let sequence = self.latest().saturating_add(1);
        let record = pending.into_record(sequence);
        self.records.push(record.clone());
        feed.publish(&record);
        record
    }

    fn latest(&self) -> u64 {
        u64::try_from(self.records.len()).unwrap_or(u64::MAX)
    }

    fn since(&self, cursor: u64, limit: usize) -> Vec<NotificationRecord> {
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        self.records
            .get(start..)
            .map(|tail| tail.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

/// In-process ledger store.
///
/// Suitable for tests, single-node deployments and simulations that do not
/// need history across restarts.
#[derive(Debug)]
pub struct MemoryStore {
    runs: Vec<Mutex<RunShard>>,
    visited: Vec<Mutex<HashSet<CellKey>>>,
    food: Mutex<Vec<FoodCollectionEvent>>,
    log: Mutex<NotificationLog>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every mutation completes its writes before releasing the lock, so a
/// poisoned guard still protects consistent data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create a store with [`DEFAULT_SHARDS`] shards.
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create a store with `shards` shards (at least one).
    pub fn with_shards(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            runs: (0..shards).map(|_| Mutex::default()).collect(),
            visited: (0..shards).map(|_| Mutex::default()).collect(),
            food: Mutex::default(),
            log: Mutex::default(),
        }
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.runs.len()
    }

    fn run_shard(&self, run_key: &RunKey) -> Result<&Mutex<RunShard>, StoreError> {
        self.runs
            .get(run_key.shard_index(self.runs.len()))
            .ok_or(StoreError::Internal("run shard index out of range"))
    }

    fn visited_shard(&self, key: &CellKey) -> Result<&Mutex<HashSet<CellKey>>, StoreError> {
        self.visited
            .get(key.shard_index(self.visited.len()))
            .ok_or(StoreError::Internal("visited shard index out of range"))
    }

    // -- Synchronous bodies ---------------------------------------------------

    fn insert_visited_now(
        &self,
        cell: GridCell,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let key = cell.key();
        let mut shard = lock(self.visited_shard(&key)?);
        if !shard.insert(key) {
            return Ok(None);
        }
        Ok(Some(lock(&self.log).append(pending, feed)))
    }

    fn is_visited_now(&self, cell: GridCell) -> Result<bool, StoreError> {
        let key = cell.key();
        Ok(lock(self.visited_shard(&key)?).contains(&key))
    }

    fn append_food_now(
        &self,
        event: FoodCollectionEvent,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> NotificationRecord {
        let mut food = lock(&self.food);
        food.push(event);
        lock(&self.log).append(pending, feed)
    }

    fn food_page(&self, page: Page) -> Vec<FoodCollectionEvent> {
        lock(&self.food)
            .iter()
            .skip(page.offset_usize())
            .take(page.limit_usize())
            .cloned()
            .collect()
    }

    fn create_run_now(
        &self,
        run: SimulationRun,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<Option<NotificationRecord>, StoreError> {
        let mut shard = lock(self.run_shard(&run.run_key)?);
        if shard.runs.contains_key(&run.run_key) {
            return Ok(None);
        }
        shard.runs.insert(run.run_key, run);
        Ok(Some(lock(&self.log).append(pending, feed)))
    }

    fn transition_run_now<F>(
        &self,
        run_key: RunKey,
        transition: F,
        feed: &NotificationFeed,
    ) -> Result<(SimulationRun, NotificationRecord), LedgerError>
    where
        F: FnOnce(SimulationRun) -> Result<RunTransition, LedgerError>,
    {
        let mut shard = lock(self.run_shard(&run_key)?);
        let current = shard
            .runs
            .get(&run_key)
            .cloned()
            .unwrap_or_else(|| SimulationRun::uninitialized(run_key));

        let RunTransition { run, pending } = transition(current)?;
        shard.runs.insert(run_key, run.clone());
        let record = lock(&self.log).append(pending, feed);
        Ok((run, record))
    }

    fn append_gated<G, T, A>(
        &self,
        run_key: RunKey,
        event: T,
        pending: PendingNotification,
        gate: G,
        arena: A,
        feed: &NotificationFeed,
    ) -> Result<NotificationRecord, LedgerError>
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError>,
        A: FnOnce(&mut RunShard) -> &mut EventArena<T>,
    {
        let mut shard = lock(self.run_shard(&run_key)?);
        {
            let sentinel;
            let run = match shard.runs.get(&run_key) {
                Some(run) => run,
                None => {
                    sentinel = SimulationRun::uninitialized(run_key);
                    &sentinel
                }
            };
            gate(run)?;
        }
        arena(&mut *shard).append(run_key, event);
        Ok(lock(&self.log).append(pending, feed))
    }

    fn with_shard<R>(&self, run_key: &RunKey, read: impl FnOnce(&RunShard) -> R) -> Result<R, StoreError> {
        let shard = lock(self.run_shard(run_key)?);
        Ok(read(&shard))
    }
}

impl LedgerStore for MemoryStore {
    fn insert_visited(
        &self,
        cell: GridCell,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send {
        ready(self.insert_visited_now(cell, pending, feed))
    }

    fn is_visited(&self, cell: GridCell) -> impl Future<Output = Result<bool, StoreError>> + Send {
        ready(self.is_visited_now(cell))
    }

    fn append_food(
        &self,
        event: FoodCollectionEvent,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, StoreError>> + Send {
        ready(Ok(self.append_food_now(event, pending, feed)))
    }

    fn food_collections(
        &self,
        page: Page,
    ) -> impl Future<Output = Result<Vec<FoodCollectionEvent>, StoreError>> + Send {
        ready(Ok(self.food_page(page)))
    }

    fn create_run(
        &self,
        run: SimulationRun,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send {
        ready(self.create_run_now(run, pending, feed))
    }

    fn transition_run<F>(
        &self,
        run_key: RunKey,
        transition: F,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<(SimulationRun, NotificationRecord), LedgerError>> + Send
    where
        F: FnOnce(SimulationRun) -> Result<RunTransition, LedgerError> + Send,
    {
        ready(self.transition_run_now(run_key, transition, feed))
    }

    fn get_run(
        &self,
        run_key: RunKey,
    ) -> impl Future<Output = Result<Option<SimulationRun>, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| shard.runs.get(&run_key).cloned()))
    }

    fn append_delivery<G>(
        &self,
        event: DrugDeliveryEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send,
    {
        let run_key = event.run_key;
        ready(self.append_gated(run_key, event, pending, gate, |shard| &mut shard.deliveries, feed))
    }

    fn append_kill<G>(
        &self,
        event: TumorKillEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send,
    {
        let run_key = event.run_key;
        ready(self.append_gated(run_key, event, pending, gate, |shard| &mut shard.kills, feed))
    }

    fn delivery_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| shard.deliveries.count(&run_key)))
    }

    fn kill_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| shard.kills.count(&run_key)))
    }

    fn deliveries(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<DrugDeliveryEvent>, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| {
            shard
                .deliveries
                .window(&run_key, page.offset_usize(), page.limit_usize())
                .into_iter()
                .cloned()
                .collect()
        }))
    }

    fn kills(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<TumorKillEvent>, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| {
            shard
                .kills
                .window(&run_key, page.offset_usize(), page.limit_usize())
                .into_iter()
                .cloned()
                .collect()
        }))
    }

    fn append_experience<G>(
        &self,
        experience: ExperienceRecord,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, LedgerError>> + Send
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError> + Send,
    {
        let run_key = experience.run_key;
        ready(self.append_gated(run_key, experience, pending, gate, |shard| &mut shard.experiences, feed))
    }

    fn experience_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| shard.experiences.count(&run_key)))
    }

    fn experiences(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<ExperienceRecord>, StoreError>> + Send {
        ready(self.with_shard(&run_key, |shard| {
            shard
                .experiences
                .window(&run_key, page.offset_usize(), page.limit_usize())
                .into_iter()
                .cloned()
                .collect()
        }))
    }

    fn notifications_since(
        &self,
        cursor: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<NotificationRecord>, StoreError>> + Send {
        let limit = usize::try_from(limit.min(crate::MAX_PAGE_SIZE)).unwrap_or(0);
        ready(Ok(lock(&self.log).since(cursor, limit)))
    }

    fn latest_sequence(&self) -> impl Future<Output = Result<u64, StoreError>> + Send {
        ready(Ok(lock(&self.log).latest()))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use chrono::Utc;
    use colony_types::{CallerId, Notification, Position3, PayloadAmount};

    use super::*;

    fn caller(name: &str) -> CallerId {
        CallerId::new(name).expect("caller")
    }

    fn visit(x: u32, y: u32) -> PendingNotification {
        PendingNotification::new(
            Notification::CellVisited { x, y, caller: caller("ant") },
            Utc::now(),
        )
    }

    fn delivery(run_key: RunKey) -> (DrugDeliveryEvent, PendingNotification) {
        let event = DrugDeliveryEvent {
            run_key,
            position: Position3::new(10, 10, 0),
            timestamp: 100,
            agent: caller("bot"),
            payload: PayloadAmount::from_raw(50),
            recorded_at: Utc::now(),
        };
        let pending = PendingNotification::new(
            Notification::DrugDelivered {
                run_key,
                x: 10,
                y: 10,
                z: 0,
                timestamp: 100,
                caller: caller("bot"),
                payload_amount: PayloadAmount::from_raw(50),
            },
            event.recorded_at,
        );
        (event, pending)
    }

    #[tokio::test]
    async fn visited_insert_is_write_once() {
        let store = MemoryStore::with_shards(4);
        let feed = NotificationFeed::default();
        let cell = GridCell::new(3, 4);
        let first = store.insert_visited(cell, visit(3, 4), &feed).await.expect("insert");
        let second = store.insert_visited(cell, visit(3, 4), &feed).await.expect("insert");
        assert_eq!(first.map(|r| r.sequence), Some(1));
        assert!(second.is_none());
        assert!(store.is_visited(cell).await.expect("read"));
        assert_eq!(store.latest_sequence().await.expect("seq"), 1);
    }

    #[tokio::test]
    async fn create_run_refuses_existing_key() {
        let store = MemoryStore::new();
        let feed = NotificationFeed::default();
        let key = RunKey::from_label("run-A");
        let run = SimulationRun::started(key, caller("U1"), Utc::now());
        let pending = PendingNotification::new(
            Notification::SimulationInitialized { run_key: key, caller: caller("U1") },
            Utc::now(),
        );
        assert!(store.create_run(run.clone(), pending.clone(), &feed).await.expect("create").is_some());
        assert!(store.create_run(run, pending, &feed).await.expect("create").is_none());
        assert_eq!(store.latest_sequence().await.expect("seq"), 1);
    }

    #[tokio::test]
    async fn failed_gate_writes_nothing() {
        let store = MemoryStore::new();
        let feed = NotificationFeed::default();
        let key = RunKey::from_label("gated");
        let (event, pending) = delivery(key);
        let result = store
            .append_delivery(
                event,
                pending,
                |run| Err(LedgerError::RunNotActive { run_key: run.run_key, status: run.status() }),
                &feed,
            )
            .await;
        assert!(matches!(result, Err(LedgerError::RunNotActive { .. })));
        assert_eq!(store.delivery_count(key).await.expect("count"), 0);
        assert_eq!(store.latest_sequence().await.expect("seq"), 0);
    }

    #[tokio::test]
    async fn failed_transition_leaves_record_untouched() {
        let store = MemoryStore::new();
        let feed = NotificationFeed::default();
        let key = RunKey::from_label("untouched");
        let result = store
            .transition_run(key, |run| Err(LedgerError::RunNotInitialized { run_key: run.run_key }), &feed)
            .await;
        assert!(matches!(result, Err(LedgerError::RunNotInitialized { .. })));
        assert!(store.get_run(key).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn notifications_since_respects_cursor_and_limit() {
        let store = MemoryStore::new();
        let feed = NotificationFeed::default();
        for x in 0..5 {
            store.insert_visited(GridCell::new(x, 0), visit(x, 0), &feed).await.expect("insert");
        }
        let tail = store.notifications_since(2, 2).await.expect("since");
        let sequences: Vec<u64> = tail.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 4]);
        assert!(store.notifications_since(5, 10).await.expect("since").is_empty());
        assert!(store.notifications_since(99, 10).await.expect("since").is_empty());
    }

    #[tokio::test]
    async fn deliveries_page_in_submission_order() {
        let store = MemoryStore::with_shards(1);
        let feed = NotificationFeed::default();
        let a = RunKey::from_label("a");
        let b = RunKey::from_label("b");
        for i in 0..4_u32 {
            let (mut event, pending) = delivery(a);
            event.timestamp = i;
            store.append_delivery(event, pending, |_| Ok(()), &feed).await.expect("append");
            let (other, pending) = delivery(b);
            store.append_delivery(other, pending, |_| Ok(()), &feed).await.expect("append");
        }
        let page = store.deliveries(a, Page::new(1, 2)).await.expect("page");
        let stamps: Vec<u32> = page.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![1, 2]);
        assert_eq!(store.delivery_count(a).await.expect("count"), 4);
        assert_eq!(store.delivery_count(b).await.expect("count"), 4);
    }

    #[test]
    fn concurrent_writers_publish_in_sequence_order() {
        let store = std::sync::Arc::new(MemoryStore::with_shards(8));
        let feed = NotificationFeed::new(4096);
        let mut sub = feed.subscribe();

        let writers: Vec<_> = (0..8_u32)
            .map(|w| {
                let store = std::sync::Arc::clone(&store);
                let feed = feed.clone();
                std::thread::spawn(move || {
                    for x in 0..100_u32 {
                        store
                            .insert_visited_now(GridCell::new(x, w), visit(x, w), &feed)
                            .expect("insert");
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().expect("writer thread");
        }

        for expected in 1..=800_u64 {
            let record = futures::executor::block_on(sub.recv()).expect("published");
            assert_eq!(record.sequence, expected);
        }
    }
}
