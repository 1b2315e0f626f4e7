//! Delivery transports

use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Event name telemetry payloads are delivered under
pub const TELEMETRY_EVENT: &str = "prefetch_telemetry";

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    /// Receiver confirmed the payload
    pub delivered: bool,
    /// Why delivery did not happen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeliveryOutcome {
    /// Confirmed delivery
    pub fn delivered() -> Self {
        Self {
            delivered: true,
            reason: None,
        }
    }

    /// Not delivered
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            delivered: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outbound analytics channel.
///
/// Best effort: implementations report failure through the outcome and
/// never error.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Deliver `payload` under `event`
    async fn send(&self, event: &str, payload: &serde_json::Value) -> DeliveryOutcome;
}

/// Configuration for [`HttpTransport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpTransportConfig {
    /// Collector endpoint
    pub endpoint: Option<Url>,
    /// Request timeout (ms)
    pub timeout_ms: u64,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    event: &'a str,
    payload: &'a serde_json::Value,
}

/// Posts `{ "event", "payload" }` JSON to a collector endpoint
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Create a transport posting to `endpoint`
    pub fn new(endpoint: Url, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("prewarm-telemetry/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }

    /// Collector endpoint
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn send(&self, event: &str, payload: &serde_json::Value) -> DeliveryOutcome {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&Envelope { event, payload })
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {
                debug!("Delivered {} to {}", event, self.endpoint);
                DeliveryOutcome::delivered()
            }
            Ok(response) => DeliveryOutcome::failed(format!("HTTP {}", response.status().as_u16())),
            Err(e) => DeliveryOutcome::failed(e.to_string()),
        }
    }
}
