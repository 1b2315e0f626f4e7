//! Durable route aggregate storage

use crate::{RouteAggregate, TtfbBucket};
use prewarm_core::{load_json, save_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Durable store key holding the aggregates
pub const AGGREGATE_KEY: &str = "prewarm:telemetry:v1";

/// Persisted document format version
pub const STORE_VERSION: u32 = 1;

/// Default route cap
pub const DEFAULT_MAX_ROUTES: usize = 48;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedAggregates {
    version: u32,
    routes: Vec<RouteAggregate>,
}

/// Bounded, decaying aggregate map mirrored into a durable store
pub struct AggregateStore {
    store: Option<Arc<dyn KeyValueStore>>,
    routes: HashMap<String, RouteAggregate>,
    max_routes: usize,
    max_age_ms: u64,
}

impl AggregateStore {
    /// Open over an optional durable store, loading and validating any
    /// persisted aggregates
    pub fn open(
        store: Option<Arc<dyn KeyValueStore>>,
        max_routes: usize,
        max_age_ms: u64,
        now_ms: u64,
    ) -> Self {
        let mut this = Self {
            store,
            routes: HashMap::new(),
            max_routes: max_routes.max(1),
            max_age_ms,
        };

        this.routes = this.load();
        let expired = this.prune_expired(now_ms);
        let evicted = this.evict_overflow(None);
        if expired + evicted > 0 {
            this.persist();
        }

        if !this.routes.is_empty() {
            info!("Restored telemetry aggregates for {} routes", this.routes.len());
        }

        this
    }

    /// Whether aggregates survive beyond this process
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    fn load(&self) -> HashMap<String, RouteAggregate> {
        let Some(store) = &self.store else {
            return HashMap::new();
        };
        let Some(raw) = load_json::<serde_json::Value>(store.as_ref(), AGGREGATE_KEY) else {
            return HashMap::new();
        };

        let entries = match raw.get("routes").and_then(|r| r.as_array()) {
            Some(entries) => entries.clone(),
            None => {
                warn!("Discarding malformed '{}': no routes array", AGGREGATE_KEY);
                if let Err(e) = store.remove(AGGREGATE_KEY) {
                    warn!("Failed to wipe '{}': {}", AGGREGATE_KEY, e);
                }
                return HashMap::new();
            }
        };

        let total = entries.len();
        let mut routes = HashMap::new();
        for entry in entries {
            match serde_json::from_value::<RouteAggregate>(entry) {
                Ok(agg) if agg.is_valid() && agg.has_samples() => {
                    routes.insert(agg.route.clone(), agg);
                }
                _ => {}
            }
        }

        if routes.len() < total {
            warn!(
                "Dropped {} invalid persisted aggregates",
                total - routes.len()
            );
        }

        routes
    }

    fn persist(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let written = if self.routes.is_empty() {
            store.remove(AGGREGATE_KEY)
        } else {
            let doc = PersistedAggregates {
                version: STORE_VERSION,
                routes: self.snapshot(),
            };
            save_json(store.as_ref(), AGGREGATE_KEY, &doc)
        };

        if let Err(e) = written {
            warn!("Failed to persist telemetry aggregates: {}", e);
        }
    }

    /// Record one sample for an anonymized route
    pub fn record(&mut self, route: &str, prefetched: bool, bucket: TtfbBucket, now_ms: u64) {
        self.routes
            .entry(route.to_string())
            .or_insert_with(|| RouteAggregate::new(route, now_ms))
            .record(prefetched, bucket, now_ms);

        self.evict_overflow(Some(route));
        self.persist();
    }

    /// Drop aggregates not updated within the maximum age
    pub fn prune_expired(&mut self, now_ms: u64) -> usize {
        let before = self.routes.len();
        let max_age_ms = self.max_age_ms;
        self.routes
            .retain(|_, agg| now_ms.saturating_sub(agg.last_updated_at) <= max_age_ms);

        let pruned = before - self.routes.len();
        if pruned > 0 {
            debug!("Pruned {} stale route aggregates", pruned);
        }
        pruned
    }

    /// Prune and persist if anything expired
    pub fn decay(&mut self, now_ms: u64) {
        if self.prune_expired(now_ms) > 0 {
            self.persist();
        }
    }

    /// Evict least recently updated routes past the cap, never `keep`
    fn evict_overflow(&mut self, keep: Option<&str>) -> usize {
        let mut evicted = 0;
        while self.routes.len() > self.max_routes {
            let oldest = self
                .routes
                .values()
                .filter(|agg| Some(agg.route.as_str()) != keep)
                .min_by(|a, b| {
                    a.last_updated_at
                        .cmp(&b.last_updated_at)
                        .then_with(|| a.route.cmp(&b.route))
                })
                .map(|agg| agg.route.clone());

            match oldest {
                Some(route) => {
                    debug!("Evicting least recently updated route {}", route);
                    self.routes.remove(&route);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    /// Check if any aggregate holds samples
    pub fn has_samples(&self) -> bool {
        self.routes.values().any(|agg| agg.has_samples())
    }

    /// Non-empty aggregates ordered by route
    pub fn snapshot(&self) -> Vec<RouteAggregate> {
        let mut routes: Vec<_> = self
            .routes
            .values()
            .filter(|agg| agg.has_samples())
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.route.cmp(&b.route));
        routes
    }

    /// Number of routes held
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.routes.clear();
        self.persist();
    }

    /// Remove the samples a delivered payload carried.
    ///
    /// Samples recorded after the payload was built survive.
    pub fn subtract(&mut self, delivered: &[RouteAggregate]) {
        for sent in delivered {
            if let Some(agg) = self.routes.get_mut(&sent.route) {
                agg.subtract(sent);
            }
        }
        self.routes.retain(|_, agg| agg.has_samples());
        self.persist();
    }
}
