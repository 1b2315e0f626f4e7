//! # Prewarm Telemetry
//!
//! Measures whether speculative prefetching actually improves
//! time-to-first-byte, without letting identifying paths leave the client.
//!
//! ## Pipeline
//!
//! ```text
//! ┌────────────────┐  mark_prefetched   ┌─────────────────────────────┐
//! │ Prefetch       │ ─────────────────> │ Warm marks (session, 15min) │
//! │ Manager        │                    └──────────────┬──────────────┘
//! └────────────────┘                                   │ consume once
//!                                                      ↓
//! Navigation timing ──> anonymize route ──> bucket TTFB ──> Route aggregates
//!                                                           (durable, 48 routes,
//!                                                            LRU + 7 day decay)
//!                                                                  │
//!              Flush Orchestrator (consent, 60s, hidden page) <────┘
//!                                │
//!                                ↓
//!                   AnalyticsPayload ──> DeliveryTransport
//! ```
//!
//! Aggregates are only reduced after a confirmed delivery; a failed
//! delivery keeps them for the next flush.

mod aggregate;
mod consent;
mod controller;
mod error;
mod flush;
mod histogram;
mod payload;
mod route;
mod store;
mod transport;
mod warm_mark;
pub mod testing;

pub use aggregate::RouteAggregate;
pub use consent::{ConsentService, MemoryConsent, TELEMETRY_CONSENT_SERVICE};
pub use controller::{
    NavigationTiming, NavigationType, RecordContext, RecordOutcome, RouteSummary, SubmitOutcome,
    TelemetryConfig, TelemetryController, TelemetrySummary,
};
pub use error::{Result, TelemetryError};
pub use flush::{FlushConfig, FlushHandle, FlushOrchestrator, FlushTrigger, PageVisibility};
pub use histogram::{BucketCounts, MetricBucket, TtfbBucket};
pub use payload::{AnalyticsPayload, PAYLOAD_VERSION};
pub use route::{
    anonymize_route, is_anonymized_route, route_for_name, route_for_url, HASH_TOKEN, INT_TOKEN,
    MAX_ROUTE_SEGMENTS,
};
pub use store::{AggregateStore, AGGREGATE_KEY, DEFAULT_MAX_ROUTES};
pub use transport::{
    DeliveryOutcome, DeliveryTransport, HttpTransport, HttpTransportConfig, TELEMETRY_EVENT,
};
pub use warm_mark::{WarmMarkLedger, DEFAULT_WARM_MARK_TTL_MS, WARM_MARK_KEY};

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        anonymize_route, DeliveryTransport, FlushOrchestrator, NavigationTiming, RecordContext,
        TelemetryController, TelemetryConfig,
    };
}
