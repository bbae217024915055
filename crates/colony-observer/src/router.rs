//! Axum router construction.
//!
//! Assembles all routes (REST + `WebSocket`) into a single [`Router`] with
//! CORS and request tracing enabled.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use colony_ledger::LedgerStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router over a ledger backed by `S`.
///
/// See [`handlers`] for the endpoint table. CORS allows any origin so
/// dashboards can be served from elsewhere.
pub fn build_router<S: LedgerStore>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index::<S>))
        .route("/health", get(handlers::health::<S>))
        // Live stream
        .route("/ws/notifications", get(ws::ws_notifications::<S>))
        // Foraging grid
        .route("/api/grid/visits", post(handlers::mark_visited::<S>))
        .route("/api/grid/visits/{x}/{y}", get(handlers::has_visited::<S>))
        .route(
            "/api/grid/food",
            get(handlers::list_food::<S>).post(handlers::record_food::<S>),
        )
        // Runs
        .route("/api/runs", post(handlers::initialize_run::<S>))
        .route("/api/runs/{run_key}", get(handlers::get_run::<S>))
        .route("/api/runs/{run_key}/complete", post(handlers::complete_run::<S>))
        .route(
            "/api/runs/{run_key}/deliveries",
            get(handlers::list_deliveries::<S>).post(handlers::record_delivery::<S>),
        )
        .route("/api/runs/{run_key}/deliveries/count", get(handlers::delivery_count::<S>))
        .route(
            "/api/runs/{run_key}/kills",
            get(handlers::list_kills::<S>).post(handlers::record_kill::<S>),
        )
        .route("/api/runs/{run_key}/kills/count", get(handlers::kill_count::<S>))
        .route(
            "/api/runs/{run_key}/experiences",
            get(handlers::list_experiences::<S>).post(handlers::submit_experience::<S>),
        )
        // Polling
        .route("/api/notifications", get(handlers::list_notifications::<S>))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
