//! Tracing initialisation

use crate::{PrewarmError, Result};
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` is used as the filter
/// directive (e.g. `info` or `prewarm_speculative=debug`).
pub fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| PrewarmError::Config(format!("invalid log filter '{}': {}", level, e)))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| PrewarmError::Config(format!("tracing already initialised: {}", e)))
}
