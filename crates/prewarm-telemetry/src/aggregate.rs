//! Per-route aggregates

use crate::route::is_anonymized_route;
use crate::{MetricBucket, TtfbBucket};
use serde::{Deserialize, Serialize};

/// Accumulated TTFB statistics for one anonymized route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAggregate {
    /// Anonymized route
    pub route: String,
    /// Navigations that followed a warm-up
    pub prefetched: MetricBucket,
    /// Cold navigations
    pub non_prefetched: MetricBucket,
    /// First sample time (unix ms)
    pub first_recorded_at: u64,
    /// Latest sample time (unix ms)
    pub last_updated_at: u64,
}

impl RouteAggregate {
    /// Create an empty aggregate
    pub fn new(route: impl Into<String>, now_ms: u64) -> Self {
        Self {
            route: route.into(),
            prefetched: MetricBucket::default(),
            non_prefetched: MetricBucket::default(),
            first_recorded_at: now_ms,
            last_updated_at: now_ms,
        }
    }

    /// Record one sample
    pub fn record(&mut self, prefetched: bool, bucket: TtfbBucket, now_ms: u64) {
        if prefetched {
            self.prefetched.record(bucket);
        } else {
            self.non_prefetched.record(bucket);
        }
        self.last_updated_at = self.last_updated_at.max(now_ms);
    }

    /// Visits across both classifications
    pub fn total_visits(&self) -> u64 {
        self.prefetched.visits + self.non_prefetched.visits
    }

    /// Check if any sample is held
    pub fn has_samples(&self) -> bool {
        self.total_visits() > 0
    }

    /// Structural validation applied to persisted entries
    pub fn is_valid(&self) -> bool {
        is_anonymized_route(&self.route)
            && self.prefetched.is_consistent()
            && self.non_prefetched.is_consistent()
            && self.first_recorded_at <= self.last_updated_at
    }

    /// Remove samples a delivered snapshot already carried
    pub fn subtract(&mut self, delivered: &RouteAggregate) {
        self.prefetched = self.prefetched.saturating_sub(&delivered.prefetched);
        self.non_prefetched = self.non_prefetched.saturating_sub(&delivered.non_prefetched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_splits_by_classification() {
        let mut agg = RouteAggregate::new("/docs/intro", 1_000);
        agg.record(true, TtfbBucket::Under100, 2_000);
        agg.record(false, TtfbBucket::Under800, 3_000);
        agg.record(false, TtfbBucket::Under800, 2_500);

        assert_eq!(agg.prefetched.visits, 1);
        assert_eq!(agg.non_prefetched.visits, 2);
        assert_eq!(agg.total_visits(), 3);
        assert_eq!(agg.first_recorded_at, 1_000);
        assert_eq!(agg.last_updated_at, 3_000);
        assert!(agg.is_valid());
    }

    #[test]
    fn test_wire_shape() {
        let mut agg = RouteAggregate::new("/pricing", 10);
        agg.record(true, TtfbBucket::Under200, 20);

        let json = serde_json::to_value(&agg).unwrap();
        assert_eq!(json["route"], "/pricing");
        assert_eq!(json["prefetched"]["visits"], 1);
        assert_eq!(json["prefetched"]["buckets"]["100-200ms"], 1);
        assert_eq!(json["nonPrefetched"]["visits"], 0);
        assert_eq!(json["firstRecordedAt"], 10);
        assert_eq!(json["lastUpdatedAt"], 20);
    }

    #[test]
    fn test_invalid_entries() {
        let raw_route = RouteAggregate::new("/users/12345", 0);
        assert!(!raw_route.is_valid());

        let mut inconsistent = RouteAggregate::new("/docs", 0);
        inconsistent.prefetched.visits = 3;
        assert!(!inconsistent.is_valid());

        let mut backwards = RouteAggregate::new("/docs", 10);
        backwards.last_updated_at = 5;
        assert!(!backwards.is_valid());
    }

    #[test]
    fn test_subtract_keeps_newer_samples() {
        let mut agg = RouteAggregate::new("/docs", 0);
        agg.record(true, TtfbBucket::Under100, 1);
        let delivered = agg.clone();
        agg.record(false, TtfbBucket::Under400, 2);

        agg.subtract(&delivered);
        assert_eq!(agg.prefetched.visits, 0);
        assert_eq!(agg.non_prefetched.visits, 1);
        assert!(agg.has_samples());
    }
}
