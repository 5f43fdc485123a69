//! Error handling for camrelay-sync

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
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Config error (fatal at startup)
    #[error("Config error: {0}")]
    Config(String),

    /// Fleet status service error
    #[error("Fleet error: {0}")]
    Fleet(String),

    /// Relay server answered, but not with "success"
    #[error("Relay protocol error during {stage}: {message}")]
    Protocol { stage: &'static str, message: String },

    /// Relay subprocess error
    #[error("Process error for slot {slot_id}: {message}")]
    Process { slot_id: u32, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn protocol(stage: &'static str, message: impl Into<String>) -> Self {
        Error::Protocol {
            stage,
            message: message.into(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Config(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                msg.clone(),
            ),
            Error::Fleet(msg) => (StatusCode::BAD_GATEWAY, "FLEET_ERROR", msg.clone()),
            Error::Protocol { .. } => (
                StatusCode::BAD_GATEWAY,
                "RELAY_PROTOCOL_ERROR",
                self.to_string(),
            ),
            Error::Process { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "PROCESS_ERROR",
                self.to_string(),
            ),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
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
