//! Error types for the `PostgreSQL` backend.
//!
//! Every failure is reported to the ledger as a [`StoreError`], which the
//! ledger surfaces as [`LedgerError::Unavailable`](colony_ledger::LedgerError).

use colony_ledger::StoreError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be converted back into a domain value.
    #[error("Corrupt row in {table}: {message}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Build a [`DbError::Corrupt`] for `table`.
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            message: message.into(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Corrupt { .. } => Self::Corrupt {
                message: err.to_string(),
            },
            other => Self::Backend {
                message: other.to_string(),
            },
        }
    }
}
