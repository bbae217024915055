//! REST endpoint handlers.
//!
//! Every handler is generic over the ledger's storage backend. Write
//! handlers require the [`Caller`] extractor; read handlers are open.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/health` | Liveness and latest sequence number |
//! | `POST` | `/api/grid/visits` | Mark a grid cell visited |
//! | `GET` | `/api/grid/visits/{x}/{y}` | Whether a cell was visited |
//! | `POST` | `/api/grid/food` | Record a food collection |
//! | `GET` | `/api/grid/food` | List food collections |
//! | `POST` | `/api/runs` | Initialize a run |
//! | `GET` | `/api/runs/{run_key}` | Run record (sentinel when unknown) |
//! | `POST` | `/api/runs/{run_key}/complete` | Complete a run |
//! | `POST` | `/api/runs/{run_key}/deliveries` | Record a drug delivery |
//! | `GET` | `/api/runs/{run_key}/deliveries` | List drug deliveries |
//! | `GET` | `/api/runs/{run_key}/deliveries/count` | Count drug deliveries |
//! | `POST` | `/api/runs/{run_key}/kills` | Record a tumor kill |
//! | `GET` | `/api/runs/{run_key}/kills` | List tumor kills |
//! | `GET` | `/api/runs/{run_key}/kills/count` | Count tumor kills |
//! | `POST` | `/api/runs/{run_key}/experiences` | Register a run's experience |
//! | `GET` | `/api/runs/{run_key}/experiences` | List a run's experiences |
//! | `GET` | `/api/notifications` | Notifications after a cursor |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use colony_ledger::{DrugDelivery, Experience, LedgerStore, Page, TumorKill};
use colony_types::scaling::{centi_u16, centi_u32, coordinate_u32, saturate_u16, saturate_u32};
use colony_types::{CellId, CollectibleId, ContentHash, PayloadAmount, Position3, RunKey, RunSummary};
use rust_decimal::Decimal;

use crate::caller::Caller;
use crate::error::ObserverError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

/// Default page size for listings.
const DEFAULT_LIMIT: u32 = 100;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of `POST /api/grid/visits`.
#[derive(Debug, serde::Deserialize)]
pub struct VisitRequest {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

/// Body of `POST /api/grid/food`.
#[derive(Debug, serde::Deserialize)]
pub struct FoodRequest {
    /// Collectible picked up, as `0x`-prefixed hex.
    pub id: CollectibleId,
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

/// Body of `POST /api/runs`. Exactly one field must be set.
#[derive(Debug, serde::Deserialize)]
pub struct InitializeRequest {
    /// Explicit run key, as `0x`-prefixed hex.
    pub run_key: Option<RunKey>,
    /// Human label hashed into a run key.
    pub label: Option<String>,
    /// Simulation configuration hashed into a run key.
    pub config: Option<serde_json::Value>,
}

impl InitializeRequest {
    fn resolve(self) -> Result<RunKey, ObserverError> {
        match (self.run_key, self.label, self.config) {
            (Some(key), None, None) => Ok(key),
            (None, Some(label), None) => Ok(RunKey::from_label(&label)),
            (None, None, Some(config)) => Ok(RunKey::from_config(&config)),
            _ => Err(ObserverError::InvalidInput(
                "exactly one of run_key, label or config is required".to_owned(),
            )),
        }
    }
}

/// Body of `POST /api/runs/{run_key}/complete`.
///
/// Counters wider than the ledger's fields saturate at the field maximum.
#[derive(Debug, serde::Deserialize)]
pub struct CompleteRequest {
    /// Total steps executed.
    pub total_steps: u64,
    /// Tumor cells killed.
    pub cells_killed: u64,
    /// Drug deliveries performed.
    pub drug_deliveries: u64,
}

impl From<CompleteRequest> for RunSummary {
    fn from(req: CompleteRequest) -> Self {
        Self {
            total_steps: saturate_u32(req.total_steps),
            cells_killed: saturate_u16(req.cells_killed),
            drug_deliveries: saturate_u16(req.drug_deliveries),
        }
    }
}

/// A position as sent by the simulation: decimal micrometres, truncated
/// toward zero on the way in.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct PositionRequest {
    /// X coordinate.
    pub x: Decimal,
    /// Y coordinate.
    pub y: Decimal,
    /// Z coordinate.
    pub z: Decimal,
}

impl From<PositionRequest> for Position3 {
    fn from(p: PositionRequest) -> Self {
        Self::new(coordinate_u32(p.x), coordinate_u32(p.y), coordinate_u32(p.z))
    }
}

/// Simulation time: either already scaled to hundredths of a minute
/// (`timestamp`) or in minutes (`minutes`), never both.
fn sim_time(timestamp: Option<u32>, minutes: Option<Decimal>) -> Result<u32, ObserverError> {
    match (timestamp, minutes) {
        (Some(raw), None) => Ok(raw),
        (None, Some(minutes)) => Ok(centi_u32(minutes)),
        _ => Err(ObserverError::InvalidInput(
            "exactly one of timestamp or minutes is required".to_owned(),
        )),
    }
}

/// Body of `POST /api/runs/{run_key}/deliveries`.
#[derive(Debug, serde::Deserialize)]
pub struct DeliveryRequest {
    /// Where the payload was released.
    pub position: PositionRequest,
    /// Scaled simulation time.
    pub timestamp: Option<u32>,
    /// Simulation time in minutes.
    pub minutes: Option<Decimal>,
    /// Raw fixed-point payload (hundredths).
    pub payload_amount: Option<u16>,
    /// Payload in units.
    pub payload: Option<Decimal>,
}

impl TryFrom<DeliveryRequest> for DrugDelivery {
    type Error = ObserverError;

    fn try_from(req: DeliveryRequest) -> Result<Self, Self::Error> {
        let payload = match (req.payload_amount, req.payload) {
            (Some(raw), None) => PayloadAmount::from_raw(raw),
            (None, Some(units)) => PayloadAmount::from_raw(centi_u16(units)),
            _ => {
                return Err(ObserverError::InvalidInput(
                    "exactly one of payload_amount or payload is required".to_owned(),
                ));
            }
        };
        Ok(Self {
            position: req.position.into(),
            timestamp: sim_time(req.timestamp, req.minutes)?,
            payload,
        })
    }
}

/// Body of `POST /api/runs/{run_key}/kills`.
#[derive(Debug, serde::Deserialize)]
pub struct KillRequest {
    /// The killed cell, as `0x`-prefixed hex.
    pub cell_id: CellId,
    /// Where the cell was.
    pub position: PositionRequest,
    /// Scaled simulation time.
    pub timestamp: Option<u32>,
    /// Simulation time in minutes.
    pub minutes: Option<Decimal>,
}

impl TryFrom<KillRequest> for TumorKill {
    type Error = ObserverError;

    fn try_from(req: KillRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            cell_id: req.cell_id,
            position: req.position.into(),
            timestamp: sim_time(req.timestamp, req.minutes)?,
        })
    }
}

/// Body of `POST /api/runs/{run_key}/experiences`.
#[derive(Debug, serde::Deserialize)]
pub struct ExperienceRequest {
    /// Content identifier of the archived simulation data.
    pub ipfs_cid: String,
    /// Digest of the results, as `0x`-prefixed hex.
    pub data_hash: ContentHash,
    /// Performance score.
    pub score: u32,
    /// Strategy family.
    pub strategy_type: String,
    /// Model that drove the agents.
    pub model_used: String,
    /// Nanobots deployed.
    pub nanobot_count: u32,
    /// Tumor size parameter.
    pub tumor_radius: u32,
    /// Digest of the tumor geometry, as `0x`-prefixed hex.
    pub dataset_hash: ContentHash,
}

impl TryFrom<ExperienceRequest> for Experience {
    type Error = ObserverError;

    fn try_from(req: ExperienceRequest) -> Result<Self, Self::Error> {
        let ipfs_cid = req.ipfs_cid.trim();
        if ipfs_cid.is_empty() {
            return Err(ObserverError::InvalidInput("ipfs_cid must not be blank".to_owned()));
        }
        Ok(Self {
            ipfs_cid: ipfs_cid.to_owned(),
            data_hash: req.data_hash,
            score: req.score,
            strategy_type: req.strategy_type,
            model_used: req.model_used,
            nanobot_count: req.nanobot_count,
            tumor_radius: req.tumor_radius,
            dataset_hash: req.dataset_hash,
        })
    }
}

/// Query parameters for listings.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PageQuery {
    /// Number of entries to skip (default 0).
    pub offset: Option<u64>,
    /// Maximum number of entries to return (default 100, max 1000).
    pub limit: Option<u32>,
}

impl From<PageQuery> for Page {
    fn from(q: PageQuery) -> Self {
        Self::new(q.offset.unwrap_or(0), q.limit.unwrap_or(DEFAULT_LIMIT))
    }
}

/// Query parameters for `GET /api/notifications`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct NotificationsQuery {
    /// Return notifications with a sequence number above this (default 0).
    pub since: Option<u64>,
    /// Maximum number of notifications (default 100, max 1000).
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// GET / and GET /health
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing server status and API links.
pub async fn index<S: LedgerStore>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let latest = state
        .ledger
        .latest_sequence()
        .await
        .map_or_else(|_| String::from("unavailable"), |seq| seq.to_string());
    let consistency = format!("{:?}", state.ledger.consistency());
    let subscribers = state.ledger.feed().subscriber_count();
    let started = state.started_at.to_rfc3339();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Colony Ledger</title>
    <style>
        body {{ background: #0d1117; color: #c9d1d9; font-family: monospace; padding: 2rem; max-width: 800px; margin: 0 auto; }}
        h1 {{ color: #58a6ff; }}
        .metric {{ display: inline-block; border: 1px solid #30363d; border-radius: 6px; padding: 1rem; margin: 0.5rem 0.5rem 0 0; }}
        .label {{ color: #8b949e; font-size: 0.85rem; }}
        .value {{ color: #58a6ff; font-size: 1.4rem; }}
        a {{ color: #58a6ff; }}
    </style>
</head>
<body>
    <h1>Colony Ledger</h1>
    <div>
        <div class="metric"><div class="label">Latest sequence</div><div class="value">{latest}</div></div>
        <div class="metric"><div class="label">Consistency</div><div class="value">{consistency}</div></div>
        <div class="metric"><div class="label">Live subscribers</div><div class="value">{subscribers}</div></div>
    </div>
    <p>Started {started}</p>
    <ul>
        <li><a href="/health">/health</a></li>
        <li><a href="/api/notifications">/api/notifications</a></li>
        <li><a href="/api/grid/food">/api/grid/food</a></li>
        <li>/ws/notifications</li>
    </ul>
</body>
</html>"#
    ))
}

/// Liveness check that also proves the store is reachable.
pub async fn health<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<impl IntoResponse, ObserverError> {
    let latest = state.ledger.latest_sequence().await?;
    Ok(Json(serde_json::json!({
        "status": "ok",
        "latest_sequence": latest,
    })))
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Mark a grid cell visited. Returns 201 on first visit and 200 when the
/// cell was already visited.
pub async fn mark_visited<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<VisitRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let record = state.ledger.mark_visited(&caller, req.x, req.y).await?;
    let status = if record.is_some() { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(serde_json::json!({
            "x": req.x,
            "y": req.y,
            "first_visit": record.is_some(),
            "notification": record,
        })),
    ))
}

/// Whether a grid cell has been visited.
pub async fn has_visited<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath((x, y)): ApiPath<(u32, u32)>,
) -> Result<impl IntoResponse, ObserverError> {
    let visited = state.ledger.has_visited(x, y).await?;
    Ok(Json(serde_json::json!({ "x": x, "y": y, "visited": visited })))
}

/// Record a food collection.
pub async fn record_food<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<FoodRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let record = state.ledger.record_food(&caller, req.id, req.x, req.y).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List food collections in insertion order.
pub async fn list_food<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let food = state.ledger.food_collections(query.into()).await?;
    Ok(Json(serde_json::json!({
        "count": food.len(),
        "food": food,
    })))
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Initialize a run with the caller as submitter.
pub async fn initialize_run<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<InitializeRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let run_key = req.resolve()?;
    let run = state.ledger.initialize_simulation(&caller, run_key).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// Return a run record with its derived status. Unknown keys return the
/// zero-valued sentinel with status `uninitialized`, not 404.
pub async fn get_run<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
) -> Result<impl IntoResponse, ObserverError> {
    let run = state.ledger.simulation_run(run_key).await?;
    Ok(Json(serde_json::json!({
        "status": run.status(),
        "run": run,
    })))
}

/// Complete a run with the submitter's summary counters.
pub async fn complete_run<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<CompleteRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let run = state.ledger.complete_simulation(&caller, run_key, req.into()).await?;
    Ok(Json(run))
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Record a drug delivery against a run.
pub async fn record_delivery<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<DeliveryRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let record = state
        .ledger
        .record_drug_delivery(&caller, run_key, req.try_into()?)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List a run's drug deliveries in acceptance order.
pub async fn list_deliveries<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let total = state.ledger.delivery_count(run_key).await?;
    let deliveries = state.ledger.deliveries(run_key, query.into()).await?;
    Ok(Json(serde_json::json!({
        "run_key": run_key,
        "total": total,
        "deliveries": deliveries,
    })))
}

/// Count a run's drug deliveries.
pub async fn delivery_count<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
) -> Result<impl IntoResponse, ObserverError> {
    let count = state.ledger.delivery_count(run_key).await?;
    Ok(Json(serde_json::json!({ "run_key": run_key, "count": count })))
}

/// Record a tumor kill against a run.
pub async fn record_kill<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<KillRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let record = state
        .ledger
        .record_tumor_kill(&caller, run_key, req.try_into()?)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List a run's tumor kills in acceptance order.
pub async fn list_kills<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let total = state.ledger.kill_count(run_key).await?;
    let kills = state.ledger.kills(run_key, query.into()).await?;
    Ok(Json(serde_json::json!({
        "run_key": run_key,
        "total": total,
        "kills": kills,
    })))
}

/// Count a run's tumor kills.
pub async fn kill_count<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
) -> Result<impl IntoResponse, ObserverError> {
    let count = state.ledger.kill_count(run_key).await?;
    Ok(Json(serde_json::json!({ "run_key": run_key, "count": count })))
}

// ---------------------------------------------------------------------------
// Experiences
// ---------------------------------------------------------------------------

/// Register an experience for a run.
pub async fn submit_experience<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    Caller(caller): Caller,
    ApiJson(req): ApiJson<ExperienceRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let record = state
        .ledger
        .submit_experience(&caller, run_key, req.try_into()?)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// List a run's experiences in submission order.
pub async fn list_experiences<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiPath(run_key): ApiPath<RunKey>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let total = state.ledger.experience_count(run_key).await?;
    let experiences = state.ledger.experiences(run_key, query.into()).await?;
    Ok(Json(serde_json::json!({
        "run_key": run_key,
        "total": total,
        "experiences": experiences,
    })))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Committed notifications after the `since` cursor, oldest first.
pub async fn list_notifications<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    ApiQuery(query): ApiQuery<NotificationsQuery>,
) -> Result<impl IntoResponse, ObserverError> {
    let since = query.since.unwrap_or(0);
    let notifications = state
        .ledger
        .notifications_since(since, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;
    let latest = state.ledger.latest_sequence().await?;
    Ok(Json(serde_json::json!({
        "since": since,
        "latest": latest,
        "notifications": notifications,
    })))
}
