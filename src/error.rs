// Bridge Error Types
// Failures surfaced by the client flows, the session accessor and the route adapter

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Auth backend communication timeout")]
    Timeout,

    // Backend answered, but not with what the contract promises
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Auth backend `{action}` request failed with status {status}: {payload}")]
    Backend {
        action: String,
        status: u16,
        payload: String,
    },

    // Caller errors
    #[error("A provider id is required to sign in")]
    MissingProvider,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    // Configuration errors
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    // Engine errors
    #[error("Auth engine error: {0}")]
    Engine(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Timeout
        } else {
            BridgeError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Protocol(format!("response body is not valid JSON: {}", err))
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        BridgeError::InvalidUrl(err.to_string())
    }
}

impl BridgeError {
    pub fn backend(action: impl Into<String>, status: u16, payload: impl Into<String>) -> Self {
        BridgeError::Backend {
            action: action.into(),
            status,
            payload: payload.into(),
        }
    }

    /// HTTP status used when the error is turned into a response by the route adapter.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::MissingProvider | BridgeError::InvalidUrl(_) => 400,

            BridgeError::Network(_)
            | BridgeError::Protocol(_)
            | BridgeError::Backend { .. }
            | BridgeError::Engine(_) => 502,

            BridgeError::Timeout => 504,

            BridgeError::Navigation(_) | BridgeError::InvalidConfig { .. } => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Timeout | BridgeError::Network(_))
    }

    fn code(&self) -> &'static str {
        match self {
            BridgeError::Network(_) => "network_error",
            BridgeError::Timeout => "timeout",
            BridgeError::Protocol(_) => "protocol_error",
            BridgeError::Backend { .. } => "backend_error",
            BridgeError::MissingProvider => "missing_provider",
            BridgeError::InvalidUrl(_) => "invalid_url",
            BridgeError::Navigation(_) => "navigation_failed",
            BridgeError::InvalidConfig { .. } => "invalid_config",
            BridgeError::Engine(_) => "engine_error",
        }
    }
}

/// JSON error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
