//! Error handling for camwarden
//!
//! Every failure the daemon can observe maps to one of these kinds so that
//! callers (the reconciler, the admin surface) can branch on them without
//! string matching.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Record or remote object absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device is held open by another process
    #[error("Device busy: {0}")]
    Busy(String),

    /// Remote API refused or dropped the connection
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Remote API answered with something we cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Settings store failed its schema/integrity check; fatal at startup
    #[error("Store corruption: {0}")]
    Corruption(String),

    /// Caller supplied an invalid request (e.g. override outside capabilities)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Timeouts and other failures worth retrying with backoff
    #[error("Transient error: {0}")]
    Transient(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Classify a reqwest failure into the retry-relevant kinds.
    pub fn from_http(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Transient(err.to_string())
        } else if err.is_connect() {
            Error::Unreachable(err.to_string())
        } else if err.is_decode() {
            Error::Protocol(err.to_string())
        } else {
            Error::Transient(err.to_string())
        }
    }

    /// Short machine-readable kind tag, used in sync error reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Busy(_) => "busy",
            Error::Unreachable(_) => "unreachable",
            Error::Protocol(_) => "protocol",
            Error::Corruption(_) => "corruption",
            Error::BadRequest(_) => "bad_request",
            Error::Transient(_) => "transient",
            Error::Database(_) => "database",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Error::Busy(msg) => (StatusCode::CONFLICT, "BUSY", msg.clone()),
            Error::Unreachable(msg) => (StatusCode::BAD_GATEWAY, "UNREACHABLE", msg.clone()),
            Error::Protocol(msg) => (StatusCode::BAD_GATEWAY, "PROTOCOL_ERROR", msg.clone()),
            Error::Transient(msg) => (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT", msg.clone()),
            Error::Corruption(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_CORRUPTION",
                msg.clone(),
            ),
            Error::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
