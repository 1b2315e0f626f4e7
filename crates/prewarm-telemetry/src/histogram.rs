//! Fixed TTFB histogram

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the six fixed time-to-first-byte ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TtfbBucket {
    /// [0, 100) ms
    Under100,
    /// [100, 200) ms
    Under200,
    /// [200, 400) ms
    Under400,
    /// [400, 800) ms
    Under800,
    /// [800, 1600) ms
    Under1600,
    /// 1600 ms and above
    Over1600,
}

impl TtfbBucket {
    /// All buckets in ascending order
    pub const ALL: [TtfbBucket; 6] = [
        TtfbBucket::Under100,
        TtfbBucket::Under200,
        TtfbBucket::Under400,
        TtfbBucket::Under800,
        TtfbBucket::Under1600,
        TtfbBucket::Over1600,
    ];

    /// Bucket for a TTFB in milliseconds; lower bounds are inclusive
    pub fn for_ttfb(ttfb_ms: f64) -> Self {
        match ttfb_ms {
            t if t < 100.0 => TtfbBucket::Under100,
            t if t < 200.0 => TtfbBucket::Under200,
            t if t < 400.0 => TtfbBucket::Under400,
            t if t < 800.0 => TtfbBucket::Under800,
            t if t < 1600.0 => TtfbBucket::Under1600,
            _ => TtfbBucket::Over1600,
        }
    }

    /// Wire label
    pub fn label(&self) -> &'static str {
        match self {
            TtfbBucket::Under100 => "0-100ms",
            TtfbBucket::Under200 => "100-200ms",
            TtfbBucket::Under400 => "200-400ms",
            TtfbBucket::Under800 => "400-800ms",
            TtfbBucket::Under1600 => "800-1600ms",
            TtfbBucket::Over1600 => "1600ms+",
        }
    }
}

impl fmt::Display for TtfbBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Six labelled counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    #[serde(rename = "0-100ms", default)]
    pub under_100: u64,
    #[serde(rename = "100-200ms", default)]
    pub under_200: u64,
    #[serde(rename = "200-400ms", default)]
    pub under_400: u64,
    #[serde(rename = "400-800ms", default)]
    pub under_800: u64,
    #[serde(rename = "800-1600ms", default)]
    pub under_1600: u64,
    #[serde(rename = "1600ms+", default)]
    pub over_1600: u64,
}

impl BucketCounts {
    /// Counter for a bucket
    pub fn get(&self, bucket: TtfbBucket) -> u64 {
        match bucket {
            TtfbBucket::Under100 => self.under_100,
            TtfbBucket::Under200 => self.under_200,
            TtfbBucket::Under400 => self.under_400,
            TtfbBucket::Under800 => self.under_800,
            TtfbBucket::Under1600 => self.under_1600,
            TtfbBucket::Over1600 => self.over_1600,
        }
    }

    fn slot(&mut self, bucket: TtfbBucket) -> &mut u64 {
        match bucket {
            TtfbBucket::Under100 => &mut self.under_100,
            TtfbBucket::Under200 => &mut self.under_200,
            TtfbBucket::Under400 => &mut self.under_400,
            TtfbBucket::Under800 => &mut self.under_800,
            TtfbBucket::Under1600 => &mut self.under_1600,
            TtfbBucket::Over1600 => &mut self.over_1600,
        }
    }

    /// Add one sample
    pub fn increment(&mut self, bucket: TtfbBucket) {
        *self.slot(bucket) += 1;
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        TtfbBucket::ALL.iter().map(|b| self.get(*b)).sum()
    }

    /// Counter-wise saturating subtraction
    pub fn saturating_sub(&self, other: &BucketCounts) -> BucketCounts {
        let mut out = *self;
        for bucket in TtfbBucket::ALL {
            *out.slot(bucket) = self.get(bucket).saturating_sub(other.get(bucket));
        }
        out
    }

    /// Bucket holding the median sample
    pub fn median(&self) -> Option<TtfbBucket> {
        let total = self.total();
        if total == 0 {
            return None;
        }

        let midpoint = total.div_ceil(2);
        let mut seen = 0;
        for bucket in TtfbBucket::ALL {
            seen += self.get(bucket);
            if seen >= midpoint {
                return Some(bucket);
            }
        }
        None
    }
}

/// Visit count plus histogram for one classification of one route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricBucket {
    /// Samples recorded
    pub visits: u64,
    /// Per-range counters
    pub buckets: BucketCounts,
}

impl MetricBucket {
    /// Record one sample
    pub fn record(&mut self, bucket: TtfbBucket) {
        self.visits += 1;
        self.buckets.increment(bucket);
    }

    /// Check if no samples were recorded
    pub fn is_empty(&self) -> bool {
        self.visits == 0
    }

    /// Visits equal the sum of the counters
    pub fn is_consistent(&self) -> bool {
        self.visits == self.buckets.total()
    }

    /// Remove samples already delivered elsewhere
    pub fn saturating_sub(&self, delivered: &MetricBucket) -> MetricBucket {
        let buckets = self.buckets.saturating_sub(&delivered.buckets);
        MetricBucket {
            visits: buckets.total(),
            buckets,
        }
    }
}
