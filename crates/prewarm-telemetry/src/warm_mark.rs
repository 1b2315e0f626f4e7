//! Session-scoped warm marks
//!
//! A warm mark says "this route was just speculatively fetched". Marks live
//! in the per-session store so a navigation in the same tab can consume
//! them; without a session store they live in memory only.

use prewarm_core::{load_json, save_json, KeyValueStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Session store key holding the mark map
pub const WARM_MARK_KEY: &str = "prewarm:warm-marks:v1";

/// Default warm mark lifetime: 15 minutes
pub const DEFAULT_WARM_MARK_TTL_MS: u64 = 15 * 60 * 1000;

/// Route to mark timestamp, at most one live mark per route
pub struct WarmMarkLedger {
    store: Option<Arc<dyn KeyValueStore>>,
    memory: HashMap<String, u64>,
    ttl_ms: u64,
}

impl WarmMarkLedger {
    /// Create a ledger over an optional session store
    pub fn new(store: Option<Arc<dyn KeyValueStore>>, ttl_ms: u64) -> Self {
        Self {
            store,
            memory: HashMap::new(),
            ttl_ms,
        }
    }

    /// Whether marks survive beyond this process
    pub fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    /// Record a mark for `route`, replacing any previous one
    pub fn mark(&mut self, route: &str, now_ms: u64) {
        let ttl_ms = self.ttl_ms;
        self.update(|marks| {
            marks.retain(|_, at| is_live(*at, now_ms, ttl_ms));
            marks.insert(route.to_string(), now_ms);
        });
    }

    /// Read and delete the mark for `route`.
    ///
    /// Returns true only when a mark existed and was still within its TTL.
    pub fn consume(&mut self, route: &str, now_ms: u64) -> bool {
        let ttl_ms = self.ttl_ms;
        self.update(|marks| {
            marks
                .remove(route)
                .is_some_and(|at| is_live(at, now_ms, ttl_ms))
        })
    }

    /// Number of live marks
    pub fn live_count(&self, now_ms: u64) -> usize {
        self.load()
            .values()
            .filter(|at| is_live(**at, now_ms, self.ttl_ms))
            .count()
    }

    fn load(&self) -> HashMap<String, u64> {
        match &self.store {
            Some(store) => load_json(store.as_ref(), WARM_MARK_KEY).unwrap_or_default(),
            None => self.memory.clone(),
        }
    }

    fn update<R>(&mut self, f: impl FnOnce(&mut HashMap<String, u64>) -> R) -> R {
        let Some(store) = self.store.clone() else {
            return f(&mut self.memory);
        };

        let mut marks: HashMap<String, u64> =
            load_json(store.as_ref(), WARM_MARK_KEY).unwrap_or_default();
        let result = f(&mut marks);

        let written = if marks.is_empty() {
            store.remove(WARM_MARK_KEY)
        } else {
            save_json(store.as_ref(), WARM_MARK_KEY, &marks)
        };
        if let Err(e) = written {
            warn!("Failed to persist warm marks: {}", e);
        }

        result
    }
}

fn is_live(marked_at: u64, now_ms: u64, ttl_ms: u64) -> bool {
    now_ms.saturating_sub(marked_at) <= ttl_ms
}
