//! Prefetch telemetry controller

use crate::route::{route_for_name, route_for_url};
use crate::store::{AggregateStore, DEFAULT_MAX_ROUTES};
use crate::warm_mark::{WarmMarkLedger, DEFAULT_WARM_MARK_TTL_MS};
use crate::{AnalyticsPayload, DeliveryTransport, RouteAggregate, TtfbBucket, TELEMETRY_EVENT};
use async_trait::async_trait;
use prewarm_core::{Clock, KeyValueStore, PrefetchRecorder, SystemClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for the telemetry controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Warm mark lifetime (ms)
    pub warm_mark_ttl_ms: u64,
    /// Maximum routes kept in the aggregate store
    pub max_routes: usize,
    /// Aggregates idle longer than this are dropped (seconds)
    pub max_aggregate_age_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            warm_mark_ttl_ms: DEFAULT_WARM_MARK_TTL_MS,
            max_routes: DEFAULT_MAX_ROUTES,
            max_aggregate_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Navigation type of a timing entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationType {
    Navigate,
    Reload,
    BackForward,
    Prerender,
}

impl NavigationType {
    /// Parse the platform's string form
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "navigate" => Some(Self::Navigate),
            "reload" => Some(Self::Reload),
            "back_forward" => Some(Self::BackForward),
            "prerender" => Some(Self::Prerender),
            _ => None,
        }
    }

    /// Fresh navigations are the only ones compared
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Navigate | Self::Reload)
    }
}

/// One navigation-timing sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTiming {
    /// Navigated URL
    pub name: String,
    /// Navigation start (ms)
    pub start_time: f64,
    /// First response byte (ms)
    pub response_start: f64,
    /// Navigation type; absent counts as a fresh navigation
    #[serde(default, rename = "type")]
    pub navigation_type: Option<NavigationType>,
}

impl NavigationTiming {
    /// Sample for a fresh navigation
    pub fn navigate(name: impl Into<String>, start_time: f64, response_start: f64) -> Self {
        Self {
            name: name.into(),
            start_time,
            response_start,
            navigation_type: Some(NavigationType::Navigate),
        }
    }

    /// Override the navigation type
    pub fn with_type(mut self, navigation_type: NavigationType) -> Self {
        self.navigation_type = Some(navigation_type);
        self
    }

    /// Time to first byte, if finite and positive
    pub fn ttfb(&self) -> Option<f64> {
        let ttfb = self.response_start - self.start_time;
        (ttfb.is_finite() && ttfb > 0.0).then_some(ttfb)
    }
}

/// Caller-supplied classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordContext {
    /// Explicit prefetched flag; warm marks are consulted when unset
    pub prefetched: Option<bool>,
}

/// Result of recording a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Sample counted
    Recorded {
        route: String,
        prefetched: bool,
        bucket: TtfbBucket,
    },
    /// History traversal or prerender; nothing counted
    IgnoredNavigationType,
    /// TTFB non-finite or not positive
    InvalidTiming,
    /// Entry name did not resolve to an http(s) route
    UnresolvedRoute,
}

/// Result of a submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// No samples pending
    NothingPending,
    /// Delivered; carried samples removed
    Delivered { routes: usize, visits: u64 },
    /// Not delivered; aggregates retained
    NotDelivered { reason: Option<String> },
}

/// Prefetched vs cold comparison for one route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSummary {
    pub route: String,
    pub prefetched_visits: u64,
    pub cold_visits: u64,
    pub prefetched_median: Option<TtfbBucket>,
    pub cold_median: Option<TtfbBucket>,
}

/// Telemetry summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySummary {
    pub prefetched_visits: u64,
    pub cold_visits: u64,
    pub routes: Vec<RouteSummary>,
}

impl TelemetrySummary {
    /// Share of visits that followed a warm-up
    pub fn prefetch_ratio(&self) -> f64 {
        let total = self.prefetched_visits + self.cold_visits;
        if total == 0 {
            0.0
        } else {
            self.prefetched_visits as f64 / total as f64
        }
    }
}

struct ControllerState {
    warm_marks: WarmMarkLedger,
    aggregates: AggregateStore,
}

/// Records per-route TTFB split by prefetched vs cold and ships
/// anonymized aggregates
pub struct TelemetryController {
    clock: Arc<dyn Clock>,
    base: Option<Url>,
    state: Mutex<ControllerState>,
}

impl TelemetryController {
    /// Create a controller.
    ///
    /// `durable` backs route aggregates and `session` backs warm marks;
    /// either may be `None` when its probe failed, in which case that state
    /// is kept in memory only.
    pub fn new(
        config: TelemetryConfig,
        durable: Option<Arc<dyn KeyValueStore>>,
        session: Option<Arc<dyn KeyValueStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ms();
        let aggregates = AggregateStore::open(
            durable,
            config.max_routes,
            config.max_aggregate_age_secs.saturating_mul(1000),
            now,
        );
        let warm_marks = WarmMarkLedger::new(session, config.warm_mark_ttl_ms);

        info!(
            "Telemetry controller ready (durable: {}, session: {})",
            if aggregates.is_persistent() { "yes" } else { "memory" },
            if warm_marks.is_persistent() { "yes" } else { "memory" },
        );

        Self {
            clock,
            base: None,
            state: Mutex::new(ControllerState {
                warm_marks,
                aggregates,
            }),
        }
    }

    /// In-memory controller on the system clock
    pub fn in_memory(config: TelemetryConfig) -> Self {
        Self::new(config, None, None, Arc::new(SystemClock))
    }

    /// Resolve relative entry names against `base`
    pub fn with_base_url(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    /// Record that `url` was just warmed
    pub async fn mark_prefetched(&self, url: &Url) {
        let route = route_for_url(url);
        let now = self.clock.now_ms();

        self.state.lock().await.warm_marks.mark(&route, now);
        debug!("Warm mark set for {}", route);
    }

    /// Count one navigation-timing sample
    pub async fn record_navigation_timing(
        &self,
        timing: &NavigationTiming,
        context: RecordContext,
    ) -> RecordOutcome {
        if timing.navigation_type.is_some_and(|t| !t.is_forward()) {
            return RecordOutcome::IgnoredNavigationType;
        }

        let Some(ttfb) = timing.ttfb() else {
            return RecordOutcome::InvalidTiming;
        };

        let Some(route) = route_for_name(&timing.name, self.base.as_ref()) else {
            return RecordOutcome::UnresolvedRoute;
        };

        let now = self.clock.now_ms();
        let bucket = TtfbBucket::for_ttfb(ttfb);

        let mut state = self.state.lock().await;
        let prefetched = match context.prefetched {
            Some(prefetched) => prefetched,
            None => state.warm_marks.consume(&route, now),
        };
        state.aggregates.record(&route, prefetched, bucket, now);

        debug!(
            "TTFB {:.0}ms on {} ({}) -> {}",
            ttfb,
            route,
            if prefetched { "prefetched" } else { "cold" },
            bucket
        );

        RecordOutcome::Recorded {
            route,
            prefetched,
            bucket,
        }
    }

    /// Whether any aggregate holds samples
    pub async fn has_pending_samples(&self) -> bool {
        self.state.lock().await.aggregates.has_samples()
    }

    /// Snapshot of all non-empty aggregates, `None` when nothing is pending
    pub async fn build_analytics_payload(&self) -> Option<AnalyticsPayload> {
        let now = self.clock.now_ms();
        let mut state = self.state.lock().await;
        state.aggregates.decay(now);
        AnalyticsPayload::from_aggregates(state.aggregates.snapshot(), now)
    }

    /// Build a payload and hand it to `transport`.
    ///
    /// Only a confirmed delivery removes the carried samples; anything else
    /// leaves the aggregates for the next attempt.
    pub async fn submit_pending(&self, transport: &dyn DeliveryTransport) -> SubmitOutcome {
        let Some(payload) = self.build_analytics_payload().await else {
            return SubmitOutcome::NothingPending;
        };

        let body = match payload.to_json() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to encode telemetry payload: {}", e);
                return SubmitOutcome::NotDelivered {
                    reason: Some(e.to_string()),
                };
            }
        };

        let outcome = transport.send(TELEMETRY_EVENT, &body).await;
        if !outcome.delivered {
            warn!(
                "Telemetry not delivered, keeping {} routes: {}",
                payload.routes.len(),
                outcome.reason.as_deref().unwrap_or("no reason given")
            );
            return SubmitOutcome::NotDelivered {
                reason: outcome.reason,
            };
        }

        self.state.lock().await.aggregates.subtract(&payload.routes);
        info!(
            "Delivered telemetry for {} routes ({} visits)",
            payload.routes.len(),
            payload.total_visits()
        );

        SubmitOutcome::Delivered {
            routes: payload.routes.len(),
            visits: payload.total_visits(),
        }
    }

    /// Drop every aggregate
    pub async fn clear_aggregates(&self) {
        self.state.lock().await.aggregates.clear();
    }

    /// Current non-empty aggregates
    pub async fn get_aggregates(&self) -> Vec<RouteAggregate> {
        self.state.lock().await.aggregates.snapshot()
    }

    /// Prefetched vs cold comparison across routes
    pub async fn summary(&self) -> TelemetrySummary {
        let routes: Vec<RouteSummary> = self
            .get_aggregates()
            .await
            .into_iter()
            .map(|agg| RouteSummary {
                prefetched_visits: agg.prefetched.visits,
                cold_visits: agg.non_prefetched.visits,
                prefetched_median: agg.prefetched.buckets.median(),
                cold_median: agg.non_prefetched.buckets.median(),
                route: agg.route,
            })
            .collect();

        TelemetrySummary {
            prefetched_visits: routes.iter().map(|r| r.prefetched_visits).sum(),
            cold_visits: routes.iter().map(|r| r.cold_visits).sum(),
            routes,
        }
    }
}

#[async_trait]
impl PrefetchRecorder for TelemetryController {
    async fn mark_prefetched(&self, url: &Url) {
        TelemetryController::mark_prefetched(self, url).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use prewarm_core::{ManualClock, MemoryStore};
    use std::time::Duration;

    const ORIGIN: &str = "https://example.com";

    fn controller() -> (TelemetryController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let controller = TelemetryController::new(
            TelemetryConfig::default(),
            Some(Arc::new(MemoryStore::new())),
            Some(Arc::new(MemoryStore::new())),
            clock.clone(),
        );
        (controller, clock)
    }

    fn url(path: &str) -> Url {
        Url::parse(ORIGIN).unwrap().join(path).unwrap()
    }

    fn timing(path: &str, ttfb: f64) -> NavigationTiming {
        NavigationTiming::navigate(url(path).to_string(), 10.0, 10.0 + ttfb)
    }

    #[tokio::test]
    async fn test_prefetched_navigation_within_ttl() {
        let (controller, clock) = controller();

        controller.mark_prefetched(&url("/docs/intro")).await;
        clock.advance(Duration::from_secs(60));

        let outcome = controller
            .record_navigation_timing(&timing("/docs/intro", 42.0), RecordContext::default())
            .await;

        assert_eq!(
            outcome,
            RecordOutcome::Recorded {
                route: "/docs/intro".into(),
                prefetched: true,
                bucket: TtfbBucket::Under100,
            }
        );

        let aggregates = controller.get_aggregates().await;
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].prefetched.visits, 1);
        assert_eq!(aggregates[0].prefetched.buckets.total(), 1);
        assert_eq!(aggregates[0].non_prefetched.visits, 0);
    }

    #[tokio::test]
    async fn test_aged_warm_mark_is_cold() {
        let (controller, clock) = controller();

        controller.mark_prefetched(&url("/docs/intro")).await;
        clock.advance(Duration::from_secs(15 * 60 + 1));

        let outcome = controller
            .record_navigation_timing(&timing("/docs/intro", 42.0), RecordContext::default())
            .await;

        assert!(matches!(outcome, RecordOutcome::Recorded { prefetched: false, .. }));
    }

    #[tokio::test]
    async fn test_warm_mark_consumed_once() {
        let (controller, _) = controller();
        controller.mark_prefetched(&url("/pricing")).await;

        let first = controller
            .record_navigation_timing(&timing("/pricing", 120.0), RecordContext::default())
            .await;
        let second = controller
            .record_navigation_timing(&timing("/pricing", 120.0), RecordContext::default())
            .await;

        assert!(matches!(first, RecordOutcome::Recorded { prefetched: true, .. }));
        assert!(matches!(second, RecordOutcome::Recorded { prefetched: false, .. }));
    }

    #[tokio::test]
    async fn test_explicit_context_wins() {
        let (controller, _) = controller();
        controller.mark_prefetched(&url("/pricing")).await;

        let outcome = controller
            .record_navigation_timing(
                &timing("/pricing", 120.0),
                RecordContext {
                    prefetched: Some(false),
                },
            )
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { prefetched: false, .. }));

        let outcome = controller
            .record_navigation_timing(
                &timing("/other", 120.0),
                RecordContext {
                    prefetched: Some(true),
                },
            )
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { prefetched: true, .. }));
    }

    #[tokio::test]
    async fn test_history_traversal_ignored() {
        let (controller, _) = controller();
        controller.mark_prefetched(&url("/docs")).await;

        for kind in [NavigationType::BackForward, NavigationType::Prerender] {
            let outcome = controller
                .record_navigation_timing(
                    &timing("/docs", 50.0).with_type(kind),
                    RecordContext::default(),
                )
                .await;
            assert_eq!(outcome, RecordOutcome::IgnoredNavigationType);
        }

        assert!(!controller.has_pending_samples().await);

        let outcome = controller
            .record_navigation_timing(&timing("/docs", 50.0), RecordContext::default())
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { prefetched: true, .. }));
    }

    #[tokio::test]
    async fn test_invalid_timing_discarded() {
        let (controller, _) = controller();

        for (start, response) in [(10.0, 10.0), (10.0, 5.0), (0.0, f64::NAN), (0.0, f64::INFINITY)] {
            let sample = NavigationTiming::navigate(url("/docs").to_string(), start, response);
            let outcome = controller
                .record_navigation_timing(&sample, RecordContext::default())
                .await;
            assert_eq!(outcome, RecordOutcome::InvalidTiming);
        }

        assert!(!controller.has_pending_samples().await);
    }

    #[tokio::test]
    async fn test_routes_are_anonymized() {
        let (controller, _) = controller();
        controller
            .record_navigation_timing(
                &timing("/customers/9876543210/orders/abcdef0123456789", 300.0),
                RecordContext::default(),
            )
            .await;

        let payload = controller.build_analytics_payload().await.unwrap();
        assert_eq!(payload.routes[0].route, "/customers/:int/orders/:hash");
    }

    #[tokio::test]
    async fn test_submit_delivered_clears_pending() {
        let (controller, _) = controller();
        controller
            .record_navigation_timing(&timing("/docs", 300.0), RecordContext::default())
            .await;

        let transport = RecordingTransport::delivering();
        let outcome = controller.submit_pending(&transport).await;

        assert_eq!(outcome, SubmitOutcome::Delivered { routes: 1, visits: 1 });
        assert!(!controller.has_pending_samples().await);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.last_event().as_deref(), Some(TELEMETRY_EVENT));

        let again = controller.submit_pending(&transport).await;
        assert_eq!(again, SubmitOutcome::NothingPending);
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_undelivered_keeps_pending() {
        let (controller, _) = controller();
        controller
            .record_navigation_timing(&timing("/docs", 300.0), RecordContext::default())
            .await;
        let before = controller.get_aggregates().await;

        let transport = RecordingTransport::rejecting("collector down");
        let outcome = controller.submit_pending(&transport).await;

        assert_eq!(
            outcome,
            SubmitOutcome::NotDelivered {
                reason: Some("collector down".into())
            }
        );
        assert!(controller.has_pending_samples().await);
        assert_eq!(controller.get_aggregates().await, before);
    }

    #[tokio::test]
    async fn test_payload_skips_decayed_routes() {
        let (controller, clock) = controller();
        controller
            .record_navigation_timing(&timing("/old", 300.0), RecordContext::default())
            .await;
        clock.advance(Duration::from_secs(8 * 24 * 60 * 60));

        assert!(controller.build_analytics_payload().await.is_none());
    }

    #[tokio::test]
    async fn test_summary() {
        let (controller, _) = controller();
        controller.mark_prefetched(&url("/docs")).await;
        controller
            .record_navigation_timing(&timing("/docs", 50.0), RecordContext::default())
            .await;
        controller
            .record_navigation_timing(&timing("/docs", 500.0), RecordContext::default())
            .await;

        let summary = controller.summary().await;
        assert_eq!(summary.prefetched_visits, 1);
        assert_eq!(summary.cold_visits, 1);
        assert!((summary.prefetch_ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(summary.routes[0].prefetched_median, Some(TtfbBucket::Under100));
        assert_eq!(summary.routes[0].cold_median, Some(TtfbBucket::Under800));

        controller.clear_aggregates().await;
        assert!(controller.get_aggregates().await.is_empty());
    }

    #[tokio::test]
    async fn test_recorder_trait_sets_warm_mark() {
        let (controller, _) = controller();
        let recorder: &dyn PrefetchRecorder = &controller;
        recorder.mark_prefetched(&url("/about")).await;

        let outcome = controller
            .record_navigation_timing(&timing("/about", 80.0), RecordContext::default())
            .await;
        assert!(matches!(outcome, RecordOutcome::Recorded { prefetched: true, .. }));
    }
}
