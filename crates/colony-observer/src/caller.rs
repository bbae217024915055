//! Caller identity extraction.
//!
//! Every mutating endpoint is attributed to the identity in the
//! `x-caller-id` header. The ledger trusts this identity as given:
//! authenticating it is the job of whatever sits in front of the server.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use colony_types::CallerId;

use crate::error::ObserverError;

/// Header carrying the caller identity.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Extractor for the identity attached to a write request.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ObserverError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(CALLER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(CallerId::new)
            .map(Self)
            .ok_or(ObserverError::MissingCaller)
    }
}
