//! Error types for the HTTP layer.
//!
//! [`ObserverError`] unifies ledger failures and request validation
//! failures into one enum that converts into an Axum response with a JSON
//! body of the form `{"error": ..., "code": ..., "status": ...}`.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use colony_ledger::{ErrorClass, LedgerError};

/// Errors that can occur in the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A write request arrived without an `x-caller-id` header.
    #[error("missing or blank x-caller-id header")]
    MissingCaller,

    /// A path segment, query parameter or body field was malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Path, query or body extraction failed before the handler ran.
    #[error("invalid request: {message}")]
    Rejected {
        /// Status chosen by the extractor (400, 415 or 422).
        status: StatusCode,
        /// The extractor's explanation.
        message: String,
    },

    /// A response could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ObserverError {
    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Ledger(err) => match err {
                LedgerError::RunAlreadyExists { .. }
                | LedgerError::RunAlreadyCompleted { .. }
                | LedgerError::RunNotActive { .. } => StatusCode::CONFLICT,
                LedgerError::RunNotInitialized { .. } => StatusCode::NOT_FOUND,
                LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::MissingCaller | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Rejected { status, .. } => *status,
            Self::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Ledger(err) => err.code(),
            Self::MissingCaller => "MISSING_CALLER",
            Self::InvalidInput(_) | Self::Rejected { .. } => "INVALID_INPUT",
            Self::Serialization(_) => "INTERNAL",
        }
    }
}

macro_rules! from_rejection {
    ($($rejection:ty),+) => {
        $(
            impl From<$rejection> for ObserverError {
                fn from(rejection: $rejection) -> Self {
                    Self::Rejected {
                        status: rejection.status(),
                        message: rejection.body_text(),
                    }
                }
            }
        )+
    };
}

from_rejection!(PathRejection, QueryRejection, JsonRejection);

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Ledger(err) if err.class() == ErrorClass::Unavailable => {
                tracing::error!(error = %err, "Ledger storage failure");
            }
            Self::Serialization(err) => tracing::error!(error = %err, "Response serialization failed"),
            _ => {}
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
