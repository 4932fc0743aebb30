//! Error types for searchagent

use thiserror::Error;

/// Result type alias using searchagent's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for searchagent
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// LLM completion API error
    #[error("LLM API error: {0}")]
    Llm(String),

    /// LLM completion API returned a server-side failure (5xx)
    #[error("LLM upstream error ({status}): {message}")]
    LlmUpstream { status: u16, message: String },

    /// Web search API error
    #[error("Search API error: {0}")]
    Search(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unauthorized access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::LlmUpstream { .. } | Error::RateLimit(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Check if error is a client error (user's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Conflict(_) | Error::Unauthorized(_)
        )
    }
}
