//! End-to-end tests for the prewarm runtime.
//!
//! These tests drive a full runtime against in-memory host bindings:
//! - anchors registered on start and on refresh
//! - warm-ups credited to the next navigation on the same route
//! - consent-gated delivery through the flush orchestrator
//! - storage degradation and persistence across restarts
//!
//! Run with: cargo test -p prewarm --test end_to_end

use prewarm::core::{ManualClock, NoopStore};
use prewarm::prelude::*;
use prewarm::speculative::testing::{RecordingHead, RecordingHost, ScriptedExecutor};
use prewarm::speculative::{Anchor, AnchorId, ContainerId, PrefetchStrategy, TriggerEvent};
use prewarm::telemetry::testing::RecordingTransport;
use prewarm::telemetry::{
    ConsentService, MemoryConsent, NavigationTiming, RecordContext, RecordOutcome, SubmitOutcome,
    TtfbBucket, TELEMETRY_CONSENT_SERVICE,
};
use prewarm::{PrewarmError, RuntimeBuilder};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use url::Url;

const START_MS: u64 = 1_700_000_000_000;

struct Harness {
    host: Arc<RecordingHost>,
    executor: Arc<ScriptedExecutor>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new(transport: RecordingTransport) -> Self {
        Self {
            host: Arc::new(RecordingHost::new()),
            executor: Arc::new(ScriptedExecutor::new()),
            transport: Arc::new(transport),
            clock: Arc::new(ManualClock::new(START_MS)),
        }
    }

    fn builder(&self, config: PrewarmConfig, consent: MemoryConsent) -> RuntimeBuilder {
        PrewarmRuntime::builder(config, document_url())
            .host(self.host.clone())
            .executor(self.executor.clone())
            .transport(self.transport.clone())
            .consent(Arc::new(consent))
            .clock(self.clock.clone())
    }

    /// Start with default config and let the bootstrap flush run
    async fn start(&self, consent: MemoryConsent) -> PrewarmRuntime {
        let bootstrap = consent.is_granted(TELEMETRY_CONSENT_SERVICE);
        let runtime = self
            .builder(PrewarmConfig::default(), consent)
            .start()
            .await
            .unwrap();

        if bootstrap {
            let orchestrator = runtime.orchestrator().unwrap().clone();
            spin_until(move || orchestrator.flush_attempts() >= 1).await;
        }
        runtime
    }
}

fn document_url() -> Url {
    Url::parse("https://example.com/").unwrap()
}

fn granted() -> MemoryConsent {
    MemoryConsent::granted(&[TELEMETRY_CONSENT_SERVICE])
}

fn intro_link() -> Anchor {
    Anchor::new(AnchorId(1), "/docs/intro").with_marker()
}

fn navigation(path: &str, ttfb: f64) -> NavigationTiming {
    NavigationTiming::navigate(format!("https://example.com{}", path), 10.0, 10.0 + ttfb)
}

async fn record(runtime: &PrewarmRuntime, path: &str, ttfb: f64) -> RecordOutcome {
    runtime
        .telemetry()
        .record_navigation_timing(&navigation(path, ttfb), RecordContext { prefetched: None })
        .await
}

async fn spin_until<F>(mut done: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..256 {
        if done() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_warmed_route_credited_to_next_navigation() {
    let h = Harness::new(RecordingTransport::delivering());
    h.host.set_container(ContainerId::DOCUMENT, vec![intro_link()]);

    let runtime = h.start(granted()).await;
    assert!(runtime.manager().is_registered(AnchorId(1)).await);

    runtime
        .manager()
        .handle_trigger(TriggerEvent::Visible(AnchorId(1)))
        .await;
    runtime.manager().wait_until_settled().await;
    assert_eq!(h.executor.call_count(), 1);

    match record(&runtime, "/docs/intro", 80.0).await {
        RecordOutcome::Recorded {
            route,
            prefetched,
            bucket,
        } => {
            assert_eq!(route, "/docs/intro");
            assert!(prefetched);
            assert_eq!(bucket, TtfbBucket::Under100);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let aggregates = runtime.telemetry().get_aggregates().await;
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].prefetched.visits, 1);
    assert_eq!(aggregates[0].prefetched.buckets.total(), 1);
    assert_eq!(aggregates[0].non_prefetched.visits, 0);

    // The mark is consumed by the first navigation
    match record(&runtime, "/docs/intro", 80.0).await {
        RecordOutcome::Recorded { prefetched, .. } => assert!(!prefetched),
        other => panic!("unexpected outcome: {:?}", other),
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_aged_warm_mark_counts_as_cold() {
    let h = Harness::new(RecordingTransport::delivering());
    h.host.set_container(ContainerId::DOCUMENT, vec![intro_link()]);
    let runtime = h.start(granted()).await;

    runtime
        .manager()
        .handle_trigger(TriggerEvent::Focus(AnchorId(1)))
        .await;
    runtime.manager().wait_until_settled().await;

    h.clock.advance(Duration::from_secs(16 * 60));

    match record(&runtime, "/docs/intro", 250.0).await {
        RecordOutcome::Recorded {
            prefetched, bucket, ..
        } => {
            assert!(!prefetched);
            assert_eq!(bucket, TtfbBucket::Under400);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_failed_warm_up_leaves_route_cold() {
    let h = Harness::new(RecordingTransport::delivering());
    h.executor.fail_on("https://example.com/docs/intro");
    h.host.set_container(ContainerId::DOCUMENT, vec![intro_link()]);
    let runtime = h.start(granted()).await;

    runtime
        .manager()
        .handle_trigger(TriggerEvent::Visible(AnchorId(1)))
        .await;
    runtime.manager().wait_until_settled().await;

    let stats = runtime.manager().stats().await;
    assert_eq!(stats.failed, 1);

    match record(&runtime, "/docs/intro", 80.0).await {
        RecordOutcome::Recorded { prefetched, .. } => assert!(!prefetched),
        other => panic!("unexpected outcome: {:?}", other),
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_flush_delivers_and_clears_pending() {
    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h.start(granted()).await;
    let orchestrator = runtime.orchestrator().unwrap().clone();

    record(&runtime, "/pricing", 120.0).await;
    record(&runtime, "/users/123456/settings", 900.0).await;
    assert!(runtime.telemetry().has_pending_samples().await);

    let outcome = orchestrator.flush_now().await;
    assert_eq!(
        outcome,
        Some(SubmitOutcome::Delivered {
            routes: 2,
            visits: 2
        })
    );
    assert!(!runtime.telemetry().has_pending_samples().await);

    assert_eq!(h.transport.last_event().as_deref(), Some("prefetch_telemetry"));
    let payload = h.transport.payloads().pop().unwrap();
    assert_eq!(payload["version"], 1);
    let routes: Vec<_> = payload["routes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["route"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(routes, vec!["/pricing", "/users/:int/settings"]);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_rejected_flush_keeps_pending() {
    let h = Harness::new(RecordingTransport::rejecting("HTTP 503"));
    let runtime = h.start(granted()).await;

    record(&runtime, "/pricing", 120.0).await;
    let before = runtime.telemetry().get_aggregates().await;

    let outcome = runtime.orchestrator().unwrap().flush_now().await;
    assert!(matches!(outcome, Some(SubmitOutcome::NotDelivered { .. })));
    assert_eq!(runtime.telemetry().get_aggregates().await, before);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_denied_consent_never_sends() {
    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h.start(MemoryConsent::new()).await;

    record(&runtime, "/pricing", 120.0).await;
    runtime.set_page_visibility(PageVisibility::Hidden);
    tokio::task::yield_now().await;

    assert!(runtime.orchestrator().unwrap().flush_now().await.is_none());
    assert_eq!(h.transport.sent_count(), 0);
    assert!(runtime.telemetry().has_pending_samples().await);

    runtime.shutdown().await;
    assert_eq!(h.transport.sent_count(), 0);
}

#[tokio::test]
async fn test_refresh_registers_new_anchors() {
    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h.start(granted()).await;
    assert_eq!(runtime.manager().stats().await.registered, 0);

    let sidebar = ContainerId(7);
    h.host.set_container(
        sidebar,
        vec![
            Anchor::new(AnchorId(2), "/blog").with_marker(),
            Anchor::new(AnchorId(3), "/about"),
        ],
    );
    runtime.refresh(sidebar);

    let host = h.host.clone();
    spin_until(move || host.is_observed(AnchorId(2))).await;

    assert!(runtime.manager().is_registered(AnchorId(2)).await);
    assert!(!runtime.manager().is_registered(AnchorId(3)).await);
    assert!(!h.host.is_observed(AnchorId(3)));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unusable_durable_store_degrades_to_memory() {
    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h
        .builder(PrewarmConfig::default(), granted())
        .durable_store(Arc::new(NoopStore))
        .session_store(Arc::new(NoopStore))
        .start()
        .await
        .unwrap();

    record(&runtime, "/pricing", 120.0).await;
    assert!(runtime.telemetry().has_pending_samples().await);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unopenable_durable_dir_degrades_to_memory() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();

    let mut config = PrewarmConfig::default();
    config.storage.durable_dir = Some(blocker.join("store"));

    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h.builder(config, granted()).start().await.unwrap();

    record(&runtime, "/pricing", 120.0).await;
    assert!(runtime.telemetry().has_pending_samples().await);
    assert_eq!(runtime.telemetry().get_aggregates().await.len(), 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_aggregates_survive_restart() {
    let dir = tempdir().unwrap();
    let mut config = PrewarmConfig::default();
    config.storage.durable_dir = Some(dir.path().to_path_buf());

    let h = Harness::new(RecordingTransport::delivering());
    let runtime = h
        .builder(config.clone(), MemoryConsent::new())
        .start()
        .await
        .unwrap();
    record(&runtime, "/pricing", 120.0).await;
    runtime.shutdown().await;

    let runtime = h
        .builder(config, MemoryConsent::new())
        .start()
        .await
        .unwrap();
    let aggregates = runtime.telemetry().get_aggregates().await;
    assert_eq!(aggregates.len(), 1);
    assert_eq!(aggregates[0].route, "/pricing");
    assert_eq!(aggregates[0].non_prefetched.visits, 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_hint_strategy_requires_head() {
    let mut config = PrewarmConfig::default();
    config.manager.strategy = PrefetchStrategy::Hint;

    let result = PrewarmRuntime::builder(config, document_url())
        .host(Arc::new(RecordingHost::new()))
        .start()
        .await;
    assert!(matches!(result, Err(PrewarmError::Config(_))));
}

#[tokio::test]
async fn test_hint_strategy_writes_one_hint() {
    let mut config = PrewarmConfig::default();
    config.manager.strategy = PrefetchStrategy::Hint;

    let host = Arc::new(RecordingHost::new());
    host.set_container(ContainerId::DOCUMENT, vec![intro_link()]);
    let head = Arc::new(RecordingHead::new());

    let runtime = PrewarmRuntime::builder(config, document_url())
        .host(host)
        .head(head.clone())
        .start()
        .await
        .unwrap();

    for event in [
        TriggerEvent::Visible(AnchorId(1)),
        TriggerEvent::Focus(AnchorId(1)),
    ] {
        runtime.manager().handle_trigger(event).await;
    }
    runtime.manager().wait_until_settled().await;

    assert_eq!(head.append_count(), 1);
    assert!(runtime.orchestrator().is_none());

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_missing_host_is_rejected() {
    let result = PrewarmRuntime::builder(PrewarmConfig::default(), document_url())
        .start()
        .await;
    assert!(matches!(result, Err(PrewarmError::Config(_))));
}

#[tokio::test]
async fn test_shutdown_releases_host_and_flushes() {
    let h = Harness::new(RecordingTransport::delivering());
    h.host.set_container(ContainerId::DOCUMENT, vec![intro_link()]);
    let runtime = h.start(granted()).await;
    assert!(h.host.has_environment_listeners());

    let orchestrator = runtime.orchestrator().unwrap().clone();
    record(&runtime, "/pricing", 120.0).await;
    let sent_before = h.transport.sent_count();

    runtime.shutdown().await;

    assert!(h.host.is_disconnected());
    assert!(!h.host.has_environment_listeners());
    assert!(!h.host.is_observed(AnchorId(1)));
    assert_eq!(h.transport.sent_count(), sent_before + 1);
    assert!(!orchestrator.is_running());
    assert_eq!(orchestrator.mount_count(), 0);
}
