use mlp_runtime::RuntimeError;
use mlp_storage::StorageError;
use thiserror::Error;

use crate::services::artifact::SynthesisError;

/// Why an authorization check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Missing or wrong credential.
    Credential,
    /// Caller does not own the resource.
    Ownership,
    /// Resource cannot serve requests in its current state.
    Inactive,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authorization error: {message}")]
    Authorization { reason: AuthFailure, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// A runtime failure already recorded as the resource's new status.
    #[error("{kind} {id} is now {status}: {source}")]
    Transition {
        kind: &'static str,
        id: String,
        status: String,
        source: RuntimeError,
    },

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),
}

impl LifecycleError {
    pub fn forbidden(message: impl Into<String>) -> Self {
        LifecycleError::Authorization {
            reason: AuthFailure::Ownership,
            message: message.into(),
        }
    }

    pub fn bad_credential(message: impl Into<String>) -> Self {
        LifecycleError::Authorization {
            reason: AuthFailure::Credential,
            message: message.into(),
        }
    }

    pub fn inactive(message: impl Into<String>) -> Self {
        LifecycleError::Authorization {
            reason: AuthFailure::Inactive,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            LifecycleError::Runtime(e) => e.is_timeout(),
            LifecycleError::Transition { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

impl From<StorageError> for LifecycleError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(msg) | StorageError::AlreadyExists(msg) => {
                LifecycleError::Conflict(msg)
            }
            StorageError::NotFound(msg) => LifecycleError::NotFound(msg),
            other => LifecycleError::Storage(other),
        }
    }
}

impl From<validator::ValidationErrors> for LifecycleError {
    fn from(e: validator::ValidationErrors) -> Self {
        LifecycleError::Validation(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Gateway timeout: {0}")]
    GatewayTimeout(String),

    #[error("{message}")]
    Transition {
        message: String,
        resource_id: String,
        status: String,
        timeout: bool,
    },

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        let message = e.to_string();
        match e {
            LifecycleError::Validation(_) | LifecycleError::Synthesis(_) => {
                ApiError::BadRequest(message)
            }
            LifecycleError::Authorization { reason, .. } => match reason {
                AuthFailure::Credential => ApiError::Unauthorized(message),
                AuthFailure::Ownership | AuthFailure::Inactive => {
                    ApiError::Forbidden(message)
                }
            },
            LifecycleError::NotFound(_) => ApiError::NotFound(message),
            LifecycleError::Conflict(_) => ApiError::Conflict(message),
            LifecycleError::Runtime(e) if e.is_timeout() => {
                ApiError::GatewayTimeout(message)
            }
            LifecycleError::Runtime(e) if e.is_not_found() => {
                ApiError::NotFound(message)
            }
            LifecycleError::Runtime(_) => ApiError::BadGateway(message),
            LifecycleError::Transition {
                id, status, source, ..
            } => ApiError::Transition {
                message,
                resource_id: id,
                status,
                timeout: source.is_timeout(),
            },
            LifecycleError::Storage(_) => ApiError::InternalServerError(message),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        use axum::{Json, http::StatusCode};
        use serde_json::json;

        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!({ "error": msg })),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            ApiError::GatewayTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, json!({ "error": msg }))
            }
            ApiError::Transition {
                message,
                resource_id,
                status,
                timeout,
            } => (
                if timeout {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                },
                json!({
                    "error": message,
                    "resource_id": resource_id,
                    "status": status,
                }),
            ),
            ApiError::InternalServerError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };

        (status, Json(body)).into_response()
    }
}
