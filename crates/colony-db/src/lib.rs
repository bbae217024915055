//! `PostgreSQL` storage backend for the Colony event ledger.
//!
//! [`PgLedgerStore`] implements [`colony_ledger::LedgerStore`] so that a
//! [`colony_ledger::Ledger`] can run against durable storage instead of
//! the in-process [`colony_ledger::MemoryStore`].
//!
//! # Schema
//!
//! ```text
//! visited_cells      write-once set keyed by cell hash
//! food_collections   append-only, insertion ordered
//! simulation_runs    one row per initialized run key
//! drug_deliveries    append-only, ordered by id within run_key
//! tumor_kills        append-only, ordered by id within run_key
//! notifications      outbox, ordered by sequence
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool and configuration
//! - [`pg_store`] -- The [`LedgerStore`](colony_ledger::LedgerStore) implementation
//! - [`error`] -- Shared error types

pub mod error;
pub mod pg_store;
pub mod postgres;

// Re-export primary types for convenience.
pub use error::DbError;
pub use pg_store::PgLedgerStore;
pub use postgres::{DEFAULT_MAX_CONNECTIONS, PostgresConfig, PostgresPool};
