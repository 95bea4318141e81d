use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-wide error type
#[derive(Error, Debug)]
pub enum GadgetError {
    #[error("Configuration not supported: {0}")]
    NotSupported(String),

    #[error("ConfigFS error [{path}]: {reason}")]
    ConfigFs { path: String, reason: String },

    #[error("Timed out waiting for descriptors to be applied")]
    ApplyTimeout,

    #[error("Gadget not available: {0}")]
    NotAvailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GadgetError {
    pub(crate) fn configfs(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        GadgetError::ConfigFs {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Error response body (unified success format)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

impl IntoResponse for GadgetError {
    fn into_response(self) -> Response {
        // Always 200 OK - success/failure is indicated by the success field
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        tracing::error!(
            error_type = std::any::type_name_of_val(&self),
            error_message = %body.message,
            "Request failed"
        );

        (StatusCode::OK, Json(body)).into_response()
    }
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, GadgetError>;
