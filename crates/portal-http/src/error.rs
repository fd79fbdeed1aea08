//! API error types
//!
//! Only [`ApiError::SessionEnded`] means the session is over; every other
//! variant is returned to the calling domain code as-is.

use reqwest::{Response, StatusCode};
use thiserror::Error;

use portal_session::TerminationReason;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Permission denied: {body}")]
    PermissionDenied { body: String },

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Session ended: {0}")]
    SessionEnded(TerminationReason),

    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Request error: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session storage error: {0}")]
    Session(#[from] portal_session::SessionError),
}

impl ApiError {
    /// Turn a non-success response into an error, keeping the body for the caller
    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::FORBIDDEN {
            ApiError::PermissionDenied { body }
        } else {
            ApiError::Http { status, body }
        }
    }

    /// HTTP status carried by the error, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::PermissionDenied { .. } => Some(StatusCode::FORBIDDEN),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_ended(&self) -> bool {
        matches!(self, ApiError::SessionEnded(_))
    }
}
