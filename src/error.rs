//! Error handling for the inspection station

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::orchestrator::FailureKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// DeviceSource used before connect()
    #[error("Camera not connected")]
    NotConnected,

    /// Source directory holds no images (expected, non-fatal)
    #[error("No image captured")]
    NoImageAvailable,

    /// Threshold outside [0,1] or not numeric
    #[error("{0}")]
    InvalidThreshold(String),

    /// Scorer not loaded or faulted
    #[error("Scoring unavailable: {0}")]
    ScoringUnavailable(String),

    /// Annotation stage failed
    #[error("Annotation error: {0}")]
    Annotation(String),

    /// Storage failure (logged and swallowed by the pipeline)
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Gateway could not reach the Orchestrator host
    #[error("Transport error: {0}")]
    Transport(String),

    /// Orchestrator host answered with a structured failure
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// Not found
    #[error("{0}")]
    NotFound(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decode/encode error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl Error {
    /// Map to the capture-cycle failure kind, if this error aborts a cycle
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Error::NotConnected => Some(FailureKind::NotConnected),
            Error::NoImageAvailable => Some(FailureKind::NoImageAvailable),
            Error::ScoringUnavailable(_) => Some(FailureKind::ScoringUnavailable),
            Error::Annotation(_) | Error::Image(_) => Some(FailureKind::AnnotationError),
            _ => None,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Error::NotConnected => (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONNECTED"),
            Error::NoImageAvailable => (StatusCode::NOT_FOUND, "NO_IMAGE_AVAILABLE"),
            Error::InvalidThreshold(_) => (StatusCode::BAD_REQUEST, "INVALID_THRESHOLD"),
            Error::ScoringUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SCORING_UNAVAILABLE")
            }
            Error::Annotation(_) | Error::Image(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ANNOTATION_ERROR")
            }
            Error::Persistence(_) | Error::Sqlx(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR")
            }
            Error::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            Error::Upstream { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "UPSTREAM_ERROR",
            ),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Error::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR")
            }
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "success": false,
            "error": message,
            "error_code": error_code,
        }));

        (status, body).into_response()
    }
}
