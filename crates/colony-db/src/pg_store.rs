//! [`LedgerStore`] backed by `PostgreSQL`.
//!
//! Every mutation runs in a single transaction that also inserts its
//! outbox row into `notifications`. Writers touching a run first take a
//! transaction-scoped advisory lock on the run key, which serializes the
//! run's state machine and event sequences per key while leaving other
//! keys independent. Outbox inserts take one more advisory lock shared by
//! all writers, so notification sequence order equals commit order and a
//! reader following [`notifications_since`](LedgerStore::notifications_since)
//! never skips a row that commits late.
//!
//! Both locks are released at commit, which is before the committed record
//! reaches the feed. An in-process gate spans outbox insert, commit and
//! publish, so this process publishes in sequence order.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use colony_ledger::{
    LedgerError, LedgerStore, NotificationFeed, Page, PendingNotification, RunTransition, StoreError,
};
use colony_types::{
    CallerId, CellId, CollectibleId, ContentHash, DrugDeliveryEvent, ExperienceRecord, FoodCollectionEvent,
    GridCell, IdError, Notification, NotificationRecord, PayloadAmount, Position3, RunKey, SimulationRun,
    TumorKillEvent,
};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// Two-key advisory lock guarding outbox inserts. The two-key space does
/// not overlap the single-key space used for run keys.
const OUTBOX_LOCK: (i32, i32) = (0x436F_6C6F, 1);

// =============================================================================
// Row types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct RunRow {
    run_key: Vec<u8>,
    start_time: DateTime<Utc>,
    total_steps: i64,
    cells_killed: i32,
    drug_deliveries: i32,
    submitter: String,
    completed: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    run_key: Vec<u8>,
    x: i64,
    y: i64,
    z: i64,
    sim_timestamp: i64,
    agent: String,
    payload_amount: i32,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct KillRow {
    run_key: Vec<u8>,
    cell_id: Vec<u8>,
    x: i64,
    y: i64,
    z: i64,
    sim_timestamp: i64,
    agent: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct FoodRow {
    collectible_id: Vec<u8>,
    x: i64,
    y: i64,
    agent: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ExperienceRow {
    run_key: Vec<u8>,
    ipfs_cid: String,
    data_hash: Vec<u8>,
    score: i64,
    strategy_type: String,
    model_used: String,
    nanobot_count: i64,
    tumor_radius: i64,
    dataset_hash: Vec<u8>,
    submitter: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct NotificationRow {
    sequence: i64,
    payload: Json<Notification>,
    recorded_at: DateTime<Utc>,
}

fn word<T>(table: &'static str, bytes: &[u8]) -> Result<T, DbError>
where
    T: for<'a> TryFrom<&'a [u8], Error = IdError>,
{
    T::try_from(bytes).map_err(|e| DbError::corrupt(table, e.to_string()))
}

fn narrow<W, N>(table: &'static str, column: &str, value: W) -> Result<N, DbError>
where
    W: Copy + Display,
    N: TryFrom<W>,
{
    N::try_from(value).map_err(|_err| DbError::corrupt(table, format!("{column} out of range: {value}")))
}

fn caller(table: &'static str, identity: &str) -> Result<CallerId, DbError> {
    CallerId::new(identity).ok_or_else(|| DbError::corrupt(table, "blank caller identity"))
}

fn position(table: &'static str, x: i64, y: i64, z: i64) -> Result<Position3, DbError> {
    Ok(Position3::new(
        narrow(table, "x", x)?,
        narrow(table, "y", y)?,
        narrow(table, "z", z)?,
    ))
}

impl TryFrom<RunRow> for SimulationRun {
    type Error = DbError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "simulation_runs";
        Ok(Self {
            run_key: word(TABLE, &row.run_key)?,
            start_time: Some(row.start_time),
            total_steps: narrow(TABLE, "total_steps", row.total_steps)?,
            cells_killed: narrow(TABLE, "cells_killed", row.cells_killed)?,
            drug_deliveries: narrow(TABLE, "drug_deliveries", row.drug_deliveries)?,
            submitter: Some(caller(TABLE, &row.submitter)?),
            completed: row.completed,
        })
    }
}

impl TryFrom<DeliveryRow> for DrugDeliveryEvent {
    type Error = DbError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "drug_deliveries";
        Ok(Self {
            run_key: word(TABLE, &row.run_key)?,
            position: position(TABLE, row.x, row.y, row.z)?,
            timestamp: narrow(TABLE, "sim_timestamp", row.sim_timestamp)?,
            agent: caller(TABLE, &row.agent)?,
            payload: PayloadAmount::from_raw(narrow(TABLE, "payload_amount", row.payload_amount)?),
            recorded_at: row.recorded_at,
        })
    }
}

impl TryFrom<KillRow> for TumorKillEvent {
    type Error = DbError;

    fn try_from(row: KillRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "tumor_kills";
        Ok(Self {
            run_key: word(TABLE, &row.run_key)?,
            cell_id: word::<CellId>(TABLE, &row.cell_id)?,
            position: position(TABLE, row.x, row.y, row.z)?,
            timestamp: narrow(TABLE, "sim_timestamp", row.sim_timestamp)?,
            agent: caller(TABLE, &row.agent)?,
            recorded_at: row.recorded_at,
        })
    }
}

impl TryFrom<FoodRow> for FoodCollectionEvent {
    type Error = DbError;

    fn try_from(row: FoodRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "food_collections";
        Ok(Self {
            collectible_id: word::<CollectibleId>(TABLE, &row.collectible_id)?,
            cell: GridCell::new(narrow(TABLE, "x", row.x)?, narrow(TABLE, "y", row.y)?),
            agent: caller(TABLE, &row.agent)?,
            recorded_at: row.recorded_at,
        })
    }
}

impl TryFrom<ExperienceRow> for ExperienceRecord {
    type Error = DbError;

    fn try_from(row: ExperienceRow) -> Result<Self, Self::Error> {
        const TABLE: &str = "experiences";
        Ok(Self {
            run_key: word(TABLE, &row.run_key)?,
            ipfs_cid: row.ipfs_cid,
            data_hash: word::<ContentHash>(TABLE, &row.data_hash)?,
            score: narrow(TABLE, "score", row.score)?,
            strategy_type: row.strategy_type,
            model_used: row.model_used,
            nanobot_count: narrow(TABLE, "nanobot_count", row.nanobot_count)?,
            tumor_radius: narrow(TABLE, "tumor_radius", row.tumor_radius)?,
            dataset_hash: word::<ContentHash>(TABLE, &row.dataset_hash)?,
            submitter: caller(TABLE, &row.submitter)?,
            recorded_at: row.recorded_at,
        })
    }
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = DbError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(Self {
            sequence: narrow("notifications", "sequence", row.sequence)?,
            recorded_at: row.recorded_at,
            notification: row.payload.0,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, DbError>
where
    T: TryFrom<R, Error = DbError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn page_bounds(page: Page) -> (i64, i64) {
    (i64::from(page.limit), i64::try_from(page.offset).unwrap_or(i64::MAX))
}

// =============================================================================
// Transaction steps
// =============================================================================

async fn lock_run(conn: &mut PgConnection, run_key: RunKey) -> Result<(), DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(run_key.lock_id())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn fetch_run(
    conn: &mut PgConnection,
    run_key: RunKey,
    for_update: bool,
) -> Result<Option<SimulationRun>, DbError> {
    let sql = if for_update {
        r"SELECT run_key, start_time, total_steps, cells_killed, drug_deliveries, submitter, completed
          FROM simulation_runs WHERE run_key = $1 FOR UPDATE"
    } else {
        r"SELECT run_key, start_time, total_steps, cells_killed, drug_deliveries, submitter, completed
          FROM simulation_runs WHERE run_key = $1"
    };
    let row = sqlx::query_as::<_, RunRow>(sql)
        .bind(run_key.as_bytes().as_slice())
        .fetch_optional(&mut *conn)
        .await?;
    row.map(SimulationRun::try_from).transpose()
}

/// Insert `pending` into the outbox and return it with its sequence number.
async fn append_notification(
    conn: &mut PgConnection,
    pending: PendingNotification,
) -> Result<NotificationRecord, DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
        .bind(OUTBOX_LOCK.0)
        .bind(OUTBOX_LOCK.1)
        .execute(&mut *conn)
        .await?;

    let run_key = pending.notification.run_key().map(|key| key.as_bytes().to_vec());
    let sequence: i64 = sqlx::query_scalar(
        r"INSERT INTO notifications (kind, run_key, payload, recorded_at)
          VALUES ($1, $2, $3, $4)
          RETURNING sequence",
    )
    .bind(pending.notification.kind().as_str())
    .bind(run_key)
    .bind(Json(&pending.notification))
    .bind(pending.recorded_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(pending.into_record(narrow("notifications", "sequence", sequence)?))
}

/// Evaluate `gate` against the run's current record while holding its key.
async fn admit<G>(conn: &mut PgConnection, run_key: RunKey, gate: G) -> Result<Result<(), LedgerError>, DbError>
where
    G: FnOnce(&SimulationRun) -> Result<(), LedgerError>,
{
    lock_run(conn, run_key).await?;
    let run = fetch_run(conn, run_key, false)
        .await?
        .unwrap_or_else(|| SimulationRun::uninitialized(run_key));
    Ok(gate(&run))
}

// =============================================================================
// Store
// =============================================================================

/// Durable ledger state in `PostgreSQL`.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    publish_gate: Arc<Mutex<()>>,
}

impl PgLedgerStore {
    /// Create a store over an open pool. Run
    /// [`PostgresPool::run_migrations`] first.
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool().clone(),
            publish_gate: Arc::default(),
        }
    }

    /// Append the outbox row, commit `tx` and publish the record, all
    /// under the publish gate.
    async fn commit_notified(
        &self,
        mut tx: Transaction<'static, Postgres>,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<NotificationRecord, DbError> {
        let _gate = self.publish_gate.lock().await;
        let record = append_notification(&mut tx, pending).await?;
        tx.commit().await?;
        feed.publish(&record);
        Ok(record)
    }

    async fn insert_visited_tx(
        &self,
        cell: GridCell,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<Option<NotificationRecord>, DbError> {
        let mut tx = self.pool.begin().await?;
        let key = cell.key();
        let inserted: Option<Vec<u8>> = sqlx::query_scalar(
            r"INSERT INTO visited_cells (cell_key, x, y, visited_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (cell_key) DO NOTHING
              RETURNING cell_key",
        )
        .bind(key.as_bytes().as_slice())
        .bind(i64::from(cell.x))
        .bind(i64::from(cell.y))
        .bind(pending.recorded_at)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }
        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(Some(record))
    }

    async fn is_visited_query(&self, cell: GridCell) -> Result<bool, DbError> {
        let visited: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM visited_cells WHERE cell_key = $1)")
            .bind(cell.key().as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await?;
        Ok(visited)
    }

    async fn append_food_tx(
        &self,
        event: FoodCollectionEvent,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<NotificationRecord, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"INSERT INTO food_collections (collectible_id, x, y, agent, recorded_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.collectible_id.as_bytes().as_slice())
        .bind(i64::from(event.cell.x))
        .bind(i64::from(event.cell.y))
        .bind(event.agent.as_str())
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await?;
        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(record)
    }

    async fn food_query(&self, page: Page) -> Result<Vec<FoodCollectionEvent>, DbError> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query_as::<_, FoodRow>(
            r"SELECT collectible_id, x, y, agent, recorded_at
              FROM food_collections
              ORDER BY id
              LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn create_run_tx(
        &self,
        run: SimulationRun,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> Result<Option<NotificationRecord>, DbError> {
        let mut tx = self.pool.begin().await?;
        lock_run(&mut tx, run.run_key).await?;
        let (start_time, submitter) = persisted_identity(&run)?;
        let inserted: Option<Vec<u8>> = sqlx::query_scalar(
            r"INSERT INTO simulation_runs
                (run_key, start_time, total_steps, cells_killed, drug_deliveries, submitter, completed)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (run_key) DO NOTHING
              RETURNING run_key",
        )
        .bind(run.run_key.as_bytes().as_slice())
        .bind(start_time)
        .bind(i64::from(run.total_steps))
        .bind(i32::from(run.cells_killed))
        .bind(i32::from(run.drug_deliveries))
        .bind(submitter)
        .bind(run.completed)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }
        let record = self.commit_notified(tx, pending, feed).await?;
        tracing::debug!(run_key = %run.run_key, "Inserted simulation run");
        Ok(Some(record))
    }

    async fn transition_run_tx<F>(
        &self,
        run_key: RunKey,
        transition: F,
        feed: &NotificationFeed,
    ) -> Result<Result<(SimulationRun, NotificationRecord), LedgerError>, DbError>
    where
        F: FnOnce(SimulationRun) -> Result<RunTransition, LedgerError>,
    {
        let mut tx = self.pool.begin().await?;
        lock_run(&mut tx, run_key).await?;
        let current = fetch_run(&mut tx, run_key, true)
            .await?
            .unwrap_or_else(|| SimulationRun::uninitialized(run_key));

        let RunTransition { run, pending } = match transition(current) {
            Ok(next) => next,
            Err(rejected) => {
                tx.rollback().await?;
                return Ok(Err(rejected));
            }
        };

        let (start_time, submitter) = persisted_identity(&run)?;
        sqlx::query(
            r"INSERT INTO simulation_runs
                (run_key, start_time, total_steps, cells_killed, drug_deliveries, submitter, completed)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              ON CONFLICT (run_key) DO UPDATE SET
                start_time = EXCLUDED.start_time,
                total_steps = EXCLUDED.total_steps,
                cells_killed = EXCLUDED.cells_killed,
                drug_deliveries = EXCLUDED.drug_deliveries,
                submitter = EXCLUDED.submitter,
                completed = EXCLUDED.completed",
        )
        .bind(run_key.as_bytes().as_slice())
        .bind(start_time)
        .bind(i64::from(run.total_steps))
        .bind(i32::from(run.cells_killed))
        .bind(i32::from(run.drug_deliveries))
        .bind(submitter)
        .bind(run.completed)
        .execute(&mut *tx)
        .await?;

        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(Ok((run, record)))
    }

    async fn get_run_query(&self, run_key: RunKey) -> Result<Option<SimulationRun>, DbError> {
        let mut conn = self.pool.acquire().await?;
        fetch_run(&mut conn, run_key, false).await
    }

    async fn append_delivery_tx<G>(
        &self,
        event: DrugDeliveryEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> Result<Result<NotificationRecord, LedgerError>, DbError>
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError>,
    {
        let mut tx = self.pool.begin().await?;
        if let Err(rejected) = admit(&mut tx, event.run_key, gate).await? {
            tx.rollback().await?;
            return Ok(Err(rejected));
        }
        sqlx::query(
            r"INSERT INTO drug_deliveries
                (run_key, x, y, z, sim_timestamp, agent, payload_amount, recorded_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.run_key.as_bytes().as_slice())
        .bind(i64::from(event.position.x))
        .bind(i64::from(event.position.y))
        .bind(i64::from(event.position.z))
        .bind(i64::from(event.timestamp))
        .bind(event.agent.as_str())
        .bind(i32::from(event.payload.raw()))
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await?;
        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(Ok(record))
    }

    async fn append_kill_tx<G>(
        &self,
        event: TumorKillEvent,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> Result<Result<NotificationRecord, LedgerError>, DbError>
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError>,
    {
        let mut tx = self.pool.begin().await?;
        if let Err(rejected) = admit(&mut tx, event.run_key, gate).await? {
            tx.rollback().await?;
            return Ok(Err(rejected));
        }
        sqlx::query(
            r"INSERT INTO tumor_kills
                (run_key, cell_id, x, y, z, sim_timestamp, agent, recorded_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.run_key.as_bytes().as_slice())
        .bind(event.cell_id.as_bytes().as_slice())
        .bind(i64::from(event.position.x))
        .bind(i64::from(event.position.y))
        .bind(i64::from(event.position.z))
        .bind(i64::from(event.timestamp))
        .bind(event.agent.as_str())
        .bind(event.recorded_at)
        .execute(&mut *tx)
        .await?;
        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(Ok(record))
    }

    async fn append_experience_tx<G>(
        &self,
        experience: ExperienceRecord,
        pending: PendingNotification,
        gate: G,
        feed: &NotificationFeed,
    ) -> Result<Result<NotificationRecord, LedgerError>, DbError>
    where
        G: FnOnce(&SimulationRun) -> Result<(), LedgerError>,
    {
        let mut tx = self.pool.begin().await?;
        if let Err(rejected) = admit(&mut tx, experience.run_key, gate).await? {
            tx.rollback().await?;
            return Ok(Err(rejected));
        }
        sqlx::query(
            r"INSERT INTO experiences
                (run_key, ipfs_cid, data_hash, score, strategy_type, model_used,
                 nanobot_count, tumor_radius, dataset_hash, submitter, recorded_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(experience.run_key.as_bytes().as_slice())
        .bind(experience.ipfs_cid.as_str())
        .bind(experience.data_hash.as_bytes().as_slice())
        .bind(i64::from(experience.score))
        .bind(experience.strategy_type.as_str())
        .bind(experience.model_used.as_str())
        .bind(i64::from(experience.nanobot_count))
        .bind(i64::from(experience.tumor_radius))
        .bind(experience.dataset_hash.as_bytes().as_slice())
        .bind(experience.submitter.as_str())
        .bind(experience.recorded_at)
        .execute(&mut *tx)
        .await?;
        let record = self.commit_notified(tx, pending, feed).await?;
        Ok(Ok(record))
    }

    async fn experiences_query(&self, run_key: RunKey, page: Page) -> Result<Vec<ExperienceRecord>, DbError> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query_as::<_, ExperienceRow>(
            r"SELECT run_key, ipfs_cid, data_hash, score, strategy_type, model_used,
                     nanobot_count, tumor_radius, dataset_hash, submitter, recorded_at
              FROM experiences
              WHERE run_key = $1
              ORDER BY id
              LIMIT $2 OFFSET $3",
        )
        .bind(run_key.as_bytes().as_slice())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn count_query(&self, sql: &'static str, run_key: RunKey) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar(sql)
            .bind(run_key.as_bytes().as_slice())
            .fetch_one(&self.pool)
            .await?;
        narrow("count", "count", count)
    }

    async fn deliveries_query(&self, run_key: RunKey, page: Page) -> Result<Vec<DrugDeliveryEvent>, DbError> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query_as::<_, DeliveryRow>(
            r"SELECT run_key, x, y, z, sim_timestamp, agent, payload_amount, recorded_at
              FROM drug_deliveries
              WHERE run_key = $1
              ORDER BY id
              LIMIT $2 OFFSET $3",
        )
        .bind(run_key.as_bytes().as_slice())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn kills_query(&self, run_key: RunKey, page: Page) -> Result<Vec<TumorKillEvent>, DbError> {
        let (limit, offset) = page_bounds(page);
        let rows = sqlx::query_as::<_, KillRow>(
            r"SELECT run_key, cell_id, x, y, z, sim_timestamp, agent, recorded_at
              FROM tumor_kills
              WHERE run_key = $1
              ORDER BY id
              LIMIT $2 OFFSET $3",
        )
        .bind(run_key.as_bytes().as_slice())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn notifications_query(&self, cursor: u64, limit: u32) -> Result<Vec<NotificationRecord>, DbError> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r"SELECT sequence, payload, recorded_at
              FROM notifications
              WHERE sequence > $1
              ORDER BY sequence
              LIMIT $2",
        )
        .bind(i64::try_from(cursor).unwrap_or(i64::MAX))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn latest_sequence_query(&self) -> Result<u64, DbError> {
        let latest: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) FROM notifications")
            .fetch_one(&self.pool)
            .await?;
        narrow("notifications", "sequence", latest)
    }
}

/// Start time and submitter of a run about to be written. Only initialized
/// runs have a row.
fn persisted_identity(run: &SimulationRun) -> Result<(DateTime<Utc>, &str), DbError> {
    match (run.start_time, run.submitter.as_ref()) {
        (Some(start_time), Some(submitter)) => Ok((start_time, submitter.as_str())),
        _ => Err(DbError::corrupt(
            "simulation_runs",
            format!("refusing to persist uninitialized run {}", run.run_key),
        )),
    }
}

impl LedgerStore for PgLedgerStore {
    fn insert_visited(
        &self,
        cell: GridCell,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send {
        async move { Ok(self.insert_visited_tx(cell, pending, feed).await?) }
    }

    fn is_visited(&self, cell: GridCell) -> impl Future<Output = Result<bool, StoreError>> + Send {
        async move { Ok(self.is_visited_query(cell).await?) }
    }

    fn append_food(
        &self,
        event: FoodCollectionEvent,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<NotificationRecord, StoreError>> + Send {
        async move { Ok(self.append_food_tx(event, pending, feed).await?) }
    }

    fn food_collections(
        &self,
        page: Page,
    ) -> impl Future<Output = Result<Vec<FoodCollectionEvent>, StoreError>> + Send {
        async move { Ok(self.food_query(page).await?) }
    }

    fn create_run(
        &self,
        run: SimulationRun,
        pending: PendingNotification,
        feed: &NotificationFeed,
    ) -> impl Future<Output = Result<Option<NotificationRecord>, StoreError>> + Send {
        async move { Ok(self.create_run_tx(run, pending, feed).await?) }
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
        async move {
            self.transition_run_tx(run_key, transition, feed)
                .await
                .map_err(StoreError::from)?
        }
    }

    fn get_run(
        &self,
        run_key: RunKey,
    ) -> impl Future<Output = Result<Option<SimulationRun>, StoreError>> + Send {
        async move { Ok(self.get_run_query(run_key).await?) }
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
        async move {
            self.append_delivery_tx(event, pending, gate, feed)
                .await
                .map_err(StoreError::from)?
        }
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
        async move {
            self.append_kill_tx(event, pending, gate, feed)
                .await
                .map_err(StoreError::from)?
        }
    }

    fn delivery_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        async move {
            Ok(self
                .count_query("SELECT COUNT(*) FROM drug_deliveries WHERE run_key = $1", run_key)
                .await?)
        }
    }

    fn kill_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        async move {
            Ok(self
                .count_query("SELECT COUNT(*) FROM tumor_kills WHERE run_key = $1", run_key)
                .await?)
        }
    }

    fn deliveries(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<DrugDeliveryEvent>, StoreError>> + Send {
        async move { Ok(self.deliveries_query(run_key, page).await?) }
    }

    fn kills(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<TumorKillEvent>, StoreError>> + Send {
        async move { Ok(self.kills_query(run_key, page).await?) }
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
        async move {
            self.append_experience_tx(experience, pending, gate, feed)
                .await
                .map_err(StoreError::from)?
        }
    }

    fn experience_count(&self, run_key: RunKey) -> impl Future<Output = Result<u64, StoreError>> + Send {
        async move {
            Ok(self
                .count_query("SELECT COUNT(*) FROM experiences WHERE run_key = $1", run_key)
                .await?)
        }
    }

    fn experiences(
        &self,
        run_key: RunKey,
        page: Page,
    ) -> impl Future<Output = Result<Vec<ExperienceRecord>, StoreError>> + Send {
        async move { Ok(self.experiences_query(run_key, page).await?) }
    }

    fn notifications_since(
        &self,
        cursor: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<NotificationRecord>, StoreError>> + Send {
        async move { Ok(self.notifications_query(cursor, limit).await?) }
    }

    fn latest_sequence(&self) -> impl Future<Output = Result<u64, StoreError>> + Send {
        async move { Ok(self.latest_sequence_query().await?) }
    }
}
