use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::errors::ApiError;

pub const USER_HEADER: &str = "x-user-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// Identity of the calling user, taken from `X-User-Id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller(pub String);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or_else(|| {
                ApiError::Unauthorized("missing X-User-Id header".to_string())
            })
    }
}

/// Optional `X-API-Key` credential for prediction endpoints.
#[derive(Debug, Clone, Default)]
pub struct ApiKey(pub Option<String>);

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(ApiKey(
            parts
                .headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        ))
    }
}
