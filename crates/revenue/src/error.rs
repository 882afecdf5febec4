//! Revenue error types

use thiserror::Error;

/// Errors raised by the revenue data plumbing
#[derive(Debug, Error)]
pub enum RevenueError {
    #[error("Unauthorized webhook")]
    Unauthorized,

    #[error("No event data")]
    NoEventData,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx answer from a Google API; `message` is the API's own error text
    #[error("{message}")]
    Upstream { status: u16, message: String },

    #[error("Unexpected response from {service}: {detail}")]
    UnexpectedResponse {
        service: &'static str,
        detail: String,
    },

    #[error("Failed to obtain access token: {0}")]
    Credentials(String),

    /// At least one side of the dual write failed. The other side may have landed.
    #[error("Dual write failed (analytics: {analytics:?}, documents: {documents:?})")]
    DualWrite {
        analytics: Option<String>,
        documents: Option<String>,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RevenueError {
    /// Whether the caller supplied something wrong (as opposed to a dependency failing)
    pub fn is_client_error(&self) -> bool {
        matches!(self, RevenueError::Unauthorized | RevenueError::NoEventData)
    }
}

pub type RevenueResult<T> = Result<T, RevenueError>;
