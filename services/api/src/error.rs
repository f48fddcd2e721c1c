//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service and how each
//! variant is rendered as an HTTP response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engagement_core::domain::SettingsError;
use engagement_core::ports::PortError;
use engagement_core::scheduler::SchedulerError;
use serde_json::json;
use tracing::error;

use crate::config::ConfigError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// An error reported by the reminder scheduler.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A settings update that failed validation.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed request body or parameter.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Scheduler(err) => match err {
                SchedulerError::Busy(_) => (StatusCode::CONFLICT, "BUSY", err.to_string()),
                SchedulerError::AlreadyDispatched(_) => {
                    (StatusCode::CONFLICT, "ALREADY_DISPATCHED", err.to_string())
                }
                SchedulerError::ClientNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                SchedulerError::TriggerNotOpen(_) => {
                    (StatusCode::NOT_FOUND, "TRIGGER_NOT_OPEN", err.to_string())
                }
                SchedulerError::EmptyMessage => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
                }
                SchedulerError::Port(port) => classify_port_error(port),
            },
            ApiError::Port(port) => classify_port_error(port),
            ApiError::Settings(err) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", err.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            other => {
                error!(error = %other, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

fn classify_port_error(err: &PortError) -> (StatusCode, &'static str, String) {
    match err {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        PortError::Unavailable(msg) => {
            (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg.clone())
        }
        PortError::Unexpected(msg) => {
            error!(error = %msg, "Port error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
