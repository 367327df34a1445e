use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use log::error;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PeerError>;

/// Failures a peer can report, split by who is expected to act on them.
#[derive(Error, Debug)]
pub enum PeerError {
    /// Missing or malformed input. Nothing was applied.
    #[error("validation error: {0}")]
    Validation(String),

    /// Audio duration could not be computed.
    #[error("decode error: {0}")]
    Decode(String),

    /// Network failure or a non-success answer from the remote peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A document or blob could not be read or persisted.
    #[error("storage error: {0}")]
    Storage(String),
}

impl PeerError {
    pub fn validation(message: impl Into<String>) -> Self {
        PeerError::Validation(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        PeerError::Storage(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PeerError::Validation(_) => StatusCode::BAD_REQUEST,
            PeerError::Decode(_) | PeerError::Transport(_) | PeerError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<std::io::Error> for PeerError {
    fn from(e: std::io::Error) -> Self {
        PeerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for PeerError {
    fn from(e: serde_json::Error) -> Self {
        PeerError::Storage(format!("malformed document: {}", e))
    }
}

impl From<reqwest::Error> for PeerError {
    fn from(e: reqwest::Error) -> Self {
        PeerError::Transport(e.to_string())
    }
}

impl From<lofty::error::LoftyError> for PeerError {
    fn from(e: lofty::error::LoftyError) -> Self {
        PeerError::Decode(e.to_string())
    }
}

impl IntoResponse for PeerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let message = match self {
            PeerError::Validation(msg)
            | PeerError::Decode(msg)
            | PeerError::Transport(msg)
            | PeerError::Storage(msg) => msg,
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
