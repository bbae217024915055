//! HTTP + `WebSocket` transport for the Colony event ledger.
//!
//! This crate exposes a [`Ledger`](colony_ledger::Ledger) over Axum:
//!
//! - **Write endpoints** attributed to the `x-caller-id` header
//! - **Read endpoints** for runs, counts, paged event listings and the
//!   visited grid
//! - **Notification polling** (`GET /api/notifications?since=`) over the
//!   store's durable log
//! - **Live stream** (`/ws/notifications`) over the ledger's broadcast feed
//!
//! Extraction failures (bad path segments, query strings or bodies) go
//! through [`extract`] and reach clients in the same JSON error shape as
//! ledger errors.
//!
//! Every handler is generic over the [`LedgerStore`](colony_ledger::LedgerStore),
//! so the same router serves the in-memory and `PostgreSQL` backends.

pub mod caller;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use caller::{CALLER_HEADER, Caller};
pub use error::ObserverError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError};
pub use startup::{ObserverHandle, StartupError, spawn_observer};
pub use state::AppState;
