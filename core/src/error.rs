use reqwest::{Method, StatusCode};
use thiserror::Error;

/// Result type for Superset API calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Startup configuration problems. All of them are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid SUPERSET_BASE_URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("REQUEST_TIMEOUT must be a positive number of seconds")]
    InvalidTimeout,
}

/// Failures surfaced by [`crate::client::SupersetClient::request`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Superset API returned {status} for {method} {path}: {body}")]
    Status {
        status: StatusCode,
        method: Method,
        path: String,
        body: String,
    },

    #[error("Failed to decode Superset response for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Superset login response did not include an access_token")]
    MissingAccessToken,

    #[error("Invalid API path '{path}': {reason}")]
    InvalidUrl { path: String, reason: String },

    #[error("Superset client is closed")]
    Closed,
}

impl ClientError {
    /// HTTP status of a remote rejection, if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Transport(err) => err.status(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}
