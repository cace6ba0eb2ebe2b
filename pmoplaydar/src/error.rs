//! Error types for the Playdar client

/// Result type alias for Playdar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when using the Playdar client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The daemon answered with a non-success status
    #[error("API error: {0}")]
    ApiError(String),

    /// The daemon answered with something that is not a usable payload
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A call did not complete within its deadline
    #[error("Request timeout")]
    Timeout,

    /// The resolver task has stopped and no longer accepts commands
    #[error("Playdar client is closed")]
    ClientClosed,

    /// Configuration error (from pmoconfig/anyhow)
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an API error
    pub fn api_error(msg: impl Into<String>) -> Self {
        Self::ApiError(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
