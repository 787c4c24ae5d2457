//! Error types for the Inkflow API.
//!
//! Every user-visible failure carries a stable `code` field; lockouts also
//! return the remaining wait so clients can present a countdown.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("{0}")]
    Conflict(String),

    #[error("access code verification locked")]
    Locked {
        until: DateTime<Utc>,
        retry_after_seconds: i64,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION",
            ApiError::NotFound(..) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Locked { .. } => "LOCKED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Upstream(_) => "UPSTREAM_FAILURE",
            ApiError::Database(_) | ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, body) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": code, "error": msg }),
            ),
            ApiError::NotFound(kind, id) => (
                StatusCode::NOT_FOUND,
                json!({ "code": code, "error": format!("{kind} not found: {id}") }),
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "code": code, "error": msg })),
            ApiError::Locked {
                until,
                retry_after_seconds,
            } => (
                StatusCode::LOCKED,
                json!({
                    "code": code,
                    "error": "too many failed attempts, verification is locked",
                    "lockout_until": until.to_rfc3339(),
                    "retry_after_seconds": retry_after_seconds,
                }),
            ),
            ApiError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                json!({ "code": code, "error": msg }),
            ),
            ApiError::Upstream(msg) => (
                StatusCode::BAD_GATEWAY,
                json!({ "code": code, "error": msg }),
            ),
            ApiError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "code": code, "error": "database error" }),
                )
            }
            ApiError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "code": code, "error": "internal error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
