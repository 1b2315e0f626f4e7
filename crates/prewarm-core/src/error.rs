//! Error types for core storage and clock operations

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the shared seams
#[derive(Error, Debug)]
pub enum CoreError {
    /// Store rejected a read or write
    #[error("Storage error: {0}")]
    Storage(String),

    /// Store is disabled in this environment
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
