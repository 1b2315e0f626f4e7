//! Execution strategies for a dispatched prefetch task

use crate::{DocumentHead, Result, SpeculativeError};
use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// How a task warms its destination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchStrategy {
    /// Insert a passive prefetch hint into the document head
    Hint,
    /// Issue a same-origin request and discard the body
    #[default]
    Fetch,
}

impl PrefetchStrategy {
    /// Parse the config/env string form
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hint" => Some(Self::Hint),
            "fetch" => Some(Self::Fetch),
            _ => None,
        }
    }
}

/// Performs the actual warm-up for one URL
#[async_trait]
pub trait PrefetchExecutor: Send + Sync {
    /// Strategy this executor implements
    fn strategy(&self) -> PrefetchStrategy;

    /// Warm `url`; any error means the destination was not warmed
    async fn execute(&self, url: &Url) -> Result<()>;
}

/// Writes passive prefetch hints into the document head
pub struct HintExecutor {
    head: Arc<dyn DocumentHead>,
}

impl HintExecutor {
    /// Create an executor writing into `head`
    pub fn new(head: Arc<dyn DocumentHead>) -> Self {
        Self { head }
    }
}

#[async_trait]
impl PrefetchExecutor for HintExecutor {
    fn strategy(&self) -> PrefetchStrategy {
        PrefetchStrategy::Hint
    }

    async fn execute(&self, url: &Url) -> Result<()> {
        if self.head.has_prefetch_hint(url) {
            debug!("Prefetch hint already present for {}", url.path());
            return Ok(());
        }

        self.head.append_prefetch_hint(url);
        Ok(())
    }
}

/// Configuration for [`FetchExecutor`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// User agent string
    pub user_agent: String,
    /// Connect timeout (ms); the request itself is not bounded here
    pub connect_timeout_ms: u64,
    /// Send and keep cookies, matching the page's credentials mode
    pub same_credentials: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("prewarm/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_ms: 10_000,
            same_credentials: true,
        }
    }
}

/// Issues a speculative GET and discards the body
pub struct FetchExecutor {
    client: Client,
}

impl FetchExecutor {
    /// Create an executor with its own HTTP client
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .cookie_store(config.same_credentials)
            .build()?;

        Ok(Self { client })
    }

    /// Wrap an existing client (shared cookie jar, proxies, ...)
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PrefetchExecutor for FetchExecutor {
    fn strategy(&self) -> PrefetchStrategy {
        PrefetchStrategy::Fetch
    }

    async fn execute(&self, url: &Url) -> Result<()> {
        let response = self
            .client
            .get(url.clone())
            .header("Sec-Purpose", "prefetch")
            .header(header::ACCEPT, "text/html")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeculativeError::Http {
                status: status.as_u16(),
            });
        }

        // Body is drained so the connection can be reused, then dropped.
        let body = response.bytes().await?;
        debug!("Prefetched {} ({} bytes)", url.path(), body.len());

        Ok(())
    }
}
