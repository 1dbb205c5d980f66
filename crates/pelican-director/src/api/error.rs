//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use pelican_core::PelicanError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No healthy endpoint: {0}")]
    NoHealthyEndpoint(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// API error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::NoHealthyEndpoint(msg) => {
                (StatusCode::BAD_GATEWAY, "NO_HEALTHY_ENDPOINT", msg.clone())
            }
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_FAILURE", msg.clone()),
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "the server encountered an internal error".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<PelicanError> for ApiError {
    fn from(err: PelicanError) -> Self {
        match err {
            PelicanError::TokenExpired(msg)
            | PelicanError::InvalidSignature(msg)
            | PelicanError::Unauthorized(msg) => ApiError::Unauthorized(msg),
            PelicanError::InvalidAudience { expected } => {
                ApiError::Unauthorized(format!("token audience does not include {}", expected))
            }
            PelicanError::InsufficientScope(msg) | PelicanError::NotApproved(msg) => {
                ApiError::Forbidden(msg)
            }
            PelicanError::Protocol(msg) => ApiError::BadRequest(msg),
            PelicanError::NotFound(msg) => ApiError::NotFound(msg),
            PelicanError::Transient(msg) => ApiError::Upstream(msg),
            PelicanError::Config(msg) | PelicanError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
