//! Relay error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of a relay request.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::LimitExceeded(_) => StatusCode::INSUFFICIENT_STORAGE,
        }
    }

    /// Message safe to show a client; server-side details stay in the log
    fn public_message(&self) -> String {
        match self {
            Self::BadRequest(msg) | Self::LimitExceeded(msg) => msg.clone(),
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = serde_json::json!({ "error": self.public_message() });
        (status, axum::Json(body)).into_response()
    }
}
