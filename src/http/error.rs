//! Error types surfaced by HTTP handlers.
//!
//! Every handler failure becomes an [`ApiError`], which renders the JSON body
//! and status code clients see.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::SettingsError;
use crate::security::FieldError;
use crate::system::StatsError;

/// Failure to reach the upstream service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Unreachable(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Not found: {path}")]
    NotFound { path: String },

    #[error("Too many requests, please try again later")]
    RateLimited,

    #[error("Upstream connection failed: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Invalid settings")]
    InvalidSettings(Vec<FieldError>),

    #[error("Settings storage failed: {0}")]
    Settings(#[from] SettingsError),

    #[error("Failed to fetch system stats: {0}")]
    Stats(#[from] StatsError),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::InvalidSettings(_) => StatusCode::BAD_REQUEST,
            ApiError::Settings(_) | ApiError::Stats(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::NotFound { path } => json!({ "error": "Not found", "path": path }),
            ApiError::RateLimited => {
                json!({ "error": "Too many requests, please try again later" })
            }
            ApiError::Upstream(e) => {
                json!({ "error": "Upstream connection failed", "details": e.to_string() })
            }
            ApiError::InvalidSettings(errors) => json!({ "success": false, "errors": errors }),
            ApiError::Settings(e) => json!({
                "success": false,
                "error": "Failed to access configuration",
                "details": e.to_string(),
            }),
            ApiError::Stats(e) => json!({
                "success": false,
                "error": "Failed to fetch system stats",
                "details": e.to_string(),
                "stats": null,
            }),
            ApiError::ShuttingDown => json!({ "error": "Server is shutting down" }),
            ApiError::Internal => json!({ "error": "Internal server error" }),
        };
        (status, Json(body)).into_response()
    }
}
