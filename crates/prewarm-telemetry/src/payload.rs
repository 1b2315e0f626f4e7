//! Outbound analytics payload

use crate::{Result, RouteAggregate};
use serde::{Deserialize, Serialize};

/// Payload schema version
pub const PAYLOAD_VERSION: u32 = 1;

/// Immutable snapshot of every non-empty route aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsPayload {
    /// Schema version
    pub version: u32,
    /// Snapshot time (unix ms)
    pub recorded_at: u64,
    /// Aggregates carried
    pub routes: Vec<RouteAggregate>,
}

impl AnalyticsPayload {
    /// Build a payload from aggregates; `None` when nothing holds samples
    pub fn from_aggregates(routes: Vec<RouteAggregate>, recorded_at: u64) -> Option<Self> {
        let routes: Vec<_> = routes.into_iter().filter(|r| r.has_samples()).collect();
        if routes.is_empty() {
            return None;
        }

        Some(Self {
            version: PAYLOAD_VERSION,
            recorded_at,
            routes,
        })
    }

    /// Samples carried across all routes
    pub fn total_visits(&self) -> u64 {
        self.routes.iter().map(|r| r.total_visits()).sum()
    }

    /// JSON form handed to a transport
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
