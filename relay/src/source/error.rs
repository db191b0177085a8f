//! Event source error types.

/// Errors returned by an event source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    /// Failed to deserialize the response page.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Source answered with a non-success status.
    #[error("API error [{status}]: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Rate limited (429) and out of retries.
    #[error("rate limited")]
    RateLimited {
        /// Retry after seconds, if the source said so.
        retry_after: Option<u64>,
    },

    /// A single record failed validation.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Request timeout.
    #[error("request timeout")]
    Timeout,
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}
