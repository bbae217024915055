//! Extractors that reject with the API's JSON error body.
//!
//! Axum's own [`Path`], [`Query`] and [`Json`] reject with a plain-text
//! body. These wrappers run the same extraction and convert the rejection
//! into an [`ObserverError`], so every failure a client sees has the
//! `{"error", "code", "status"}` shape.

use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;

use crate::error::ObserverError;

/// Path parameters deserialized into `T`.
#[derive(Debug, Clone, Copy)]
pub struct ApiPath<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ObserverError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Query string deserialized into `T`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ObserverError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// JSON request body deserialized into `T`.
#[derive(Debug, Clone, Copy)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ObserverError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use axum::body::Body;
    use axum::http::StatusCode;

    use super::*;

    #[tokio::test]
    async fn bad_body_keeps_axum_status() {
        let request = Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let err = ApiJson::<serde_json::Value>::from_request(request, &())
            .await
            .expect_err("malformed body");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[tokio::test]
    async fn missing_content_type_is_unsupported_media() {
        let request = Request::post("/").body(Body::from("{}")).expect("request");
        let err = ApiJson::<serde_json::Value>::from_request(request, &())
            .await
            .expect_err("no content type");
        assert_eq!(err.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn query_values_are_typed() {
        type Params = std::collections::HashMap<String, u64>;

        let request = Request::get("/?offset=ten").body(Body::empty()).expect("request");
        let (mut parts, _) = request.into_parts();
        let err = ApiQuery::<Params>::from_request_parts(&mut parts, &())
            .await
            .expect_err("non-numeric offset");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let request = Request::get("/?x=1").body(Body::empty()).expect("request");
        let (mut parts, _) = request.into_parts();
        let ApiQuery(query) = ApiQuery::<Params>::from_request_parts(&mut parts, &())
            .await
            .expect("numeric query");
        assert_eq!(query.get("x"), Some(&1));
    }
}
