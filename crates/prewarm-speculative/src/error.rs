//! Error types for speculative prefetching

use thiserror::Error;

/// Result type for speculative operations
pub type Result<T> = std::result::Result<T, SpeculativeError>;

/// Errors that can occur during speculative prefetching
#[derive(Error, Debug)]
pub enum SpeculativeError {
    /// Destination could not be resolved
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Server answered with a non-success status
    #[error("HTTP error: {status}")]
    Http { status: u16 },

    /// Network connection failed
    #[error("Network error: {0}")]
    Network(String),

    /// Request exceeded the configured prefetch timeout
    #[error("Prefetch timed out after {0}ms")]
    Timeout(u64),

    /// Manager is missing a required collaborator
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Manager was destroyed
    #[error("Prefetch manager destroyed")]
    Destroyed,
}

impl From<reqwest::Error> for SpeculativeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            SpeculativeError::Http {
                status: status.as_u16(),
            }
        } else {
            SpeculativeError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for SpeculativeError {
    fn from(e: url::ParseError) -> Self {
        SpeculativeError::InvalidUrl(e.to_string())
    }
}
