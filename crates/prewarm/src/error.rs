//! Error types for the prewarm runtime

use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, PrewarmError>;

/// Errors raised while configuring or starting the runtime
#[derive(Error, Debug)]
pub enum PrewarmError {
    /// Configuration value is missing or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage setup failed
    #[error("Storage error: {0}")]
    Storage(#[from] prewarm_core::CoreError),

    /// Prefetch manager failed to start
    #[error("Speculative error: {0}")]
    Speculative(#[from] prewarm_speculative::SpeculativeError),

    /// Telemetry setup failed
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] prewarm_telemetry::TelemetryError),
}
