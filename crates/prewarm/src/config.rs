//! Layered configuration: defaults, then a TOML file, then `PREWARM_*`
//! environment overrides.

use crate::{PrewarmError, Result};
use prewarm_speculative::{FetchConfig, ManagerConfig, PrefetchStrategy};
use prewarm_telemetry::{FlushConfig, HttpTransportConfig, TelemetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// Origin hrefs are resolved against
pub const ENV_ORIGIN: &str = "PREWARM_ORIGIN";
/// Concurrency ceiling
pub const ENV_MAX_CONCURRENT: &str = "PREWARM_MAX_CONCURRENT";
/// `hint` or `fetch`
pub const ENV_STRATEGY: &str = "PREWARM_STRATEGY";
/// Directory of the durable store
pub const ENV_STORAGE_DIR: &str = "PREWARM_STORAGE_DIR";
/// Log filter directive
pub const ENV_LOG: &str = "PREWARM_LOG";
/// Telemetry collector endpoint
pub const ENV_TELEMETRY_ENDPOINT: &str = "PREWARM_TELEMETRY_ENDPOINT";

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the durable store; in-memory when unset
    #[serde(default)]
    pub durable_dir: Option<PathBuf>,
}

/// Complete runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrewarmConfig {
    /// Prefetch manager
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Fetch strategy HTTP client
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Telemetry controller
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Flush loop
    #[serde(default)]
    pub flush: FlushConfig,

    /// Telemetry delivery
    #[serde(default)]
    pub transport: HttpTransportConfig,

    /// Stores
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log filter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            manager: ManagerConfig::default(),
            fetch: FetchConfig::default(),
            telemetry: TelemetryConfig::default(),
            flush: FlushConfig::default(),
            transport: HttpTransportConfig::default(),
            storage: StorageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl PrewarmConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&contents)
    }

    /// Defaults or `path`, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in [`load`](Self::load))
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            let origin = Url::parse(&origin)
                .map_err(|e| PrewarmError::Config(format!("{}: {}", ENV_ORIGIN, e)))?;
            self.manager.origin = Some(origin);
        }

        if let Some(max) = lookup(ENV_MAX_CONCURRENT) {
            let max: usize = max.trim().parse().map_err(|_| {
                PrewarmError::Config(format!("{} must be a positive integer", ENV_MAX_CONCURRENT))
            })?;
            if max == 0 {
                return Err(PrewarmError::Config(format!(
                    "{} must be a positive integer",
                    ENV_MAX_CONCURRENT
                )));
            }
            self.manager.max_concurrent = max;
        }

        if let Some(strategy) = lookup(ENV_STRATEGY) {
            self.manager.strategy = PrefetchStrategy::parse(&strategy).ok_or_else(|| {
                PrewarmError::Config(format!("{} must be 'hint' or 'fetch'", ENV_STRATEGY))
            })?;
        }

        if let Some(dir) = lookup(ENV_STORAGE_DIR) {
            self.storage.durable_dir = Some(PathBuf::from(dir));
        }

        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level;
        }

        if let Some(endpoint) = lookup(ENV_TELEMETRY_ENDPOINT) {
            let endpoint = Url::parse(&endpoint)
                .map_err(|e| PrewarmError::Config(format!("{}: {}", ENV_TELEMETRY_ENDPOINT, e)))?;
            self.transport.endpoint = Some(endpoint);
        }

        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
