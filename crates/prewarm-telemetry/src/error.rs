//! Error types for prefetch telemetry

use thiserror::Error;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors that can occur while recording or delivering telemetry
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// Persisted state failed validation
    #[error("Invalid persisted state: {0}")]
    InvalidState(String),

    /// Payload could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(#[from] prewarm_core::CoreError),

    /// Delivery endpoint rejected the payload
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Endpoint URL is malformed
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<reqwest::Error> for TelemetryError {
    fn from(e: reqwest::Error) -> Self {
        TelemetryError::Delivery(e.to_string())
    }
}

impl From<url::ParseError> for TelemetryError {
    fn from(e: url::ParseError) -> Self {
        TelemetryError::InvalidEndpoint(e.to_string())
    }
}
