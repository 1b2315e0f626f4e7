//! # Prewarm
//!
//! Speculative same-origin navigation prefetching with an anonymized,
//! consent-gated time-to-first-byte telemetry pipeline.
//!
//! ## Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                          PrewarmRuntime                             │
//! ├────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  AnchorHost ──triggers──> PrefetchManager ──executor──> network     │
//! │      ↑                          │                                   │
//! │  refresh (prewarm:refresh)      │ mark_prefetched                   │
//! │                                 ↓                                   │
//! │  navigation timing ──> TelemetryController ──> durable aggregates   │
//! │                                 ↑                                   │
//! │             FlushOrchestrator (consent · 60s · page hidden)         │
//! │                                 │                                   │
//! │                                 ↓                                   │
//! │                         DeliveryTransport                           │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use prewarm::{PrewarmConfig, PrewarmRuntime};
//!
//! let config = PrewarmConfig::load(Some(Path::new("prewarm.toml")))?;
//! prewarm::init_tracing(&config.log_level)?;
//!
//! let runtime = PrewarmRuntime::builder(config, document_url)
//!     .host(host)
//!     .consent(consent)
//!     .start()
//!     .await?;
//!
//! runtime.manager().handle_trigger(TriggerEvent::Focus(anchor)).await;
//! ```
//!
//! ## Crates
//!
//! - [`prewarm_core`] - clocks, stores, the recorder seam
//! - [`prewarm_speculative`] - eligibility, triggers, bounded dispatch
//! - [`prewarm_telemetry`] - anonymized TTFB aggregates and delivery

mod config;
mod error;
mod logging;
mod runtime;

pub use config::{
    PrewarmConfig, StorageConfig, ENV_LOG, ENV_MAX_CONCURRENT, ENV_ORIGIN, ENV_STORAGE_DIR,
    ENV_STRATEGY, ENV_TELEMETRY_ENDPOINT,
};
pub use error::{PrewarmError, Result};
pub use logging::init_tracing;
pub use runtime::{PrewarmRuntime, RefreshSignal, RuntimeBuilder, REFRESH_EVENT};

pub use prewarm_core as core;
pub use prewarm_speculative as speculative;
pub use prewarm_telemetry as telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use super::{PrewarmConfig, PrewarmRuntime, Result};
    pub use prewarm_core::prelude::*;
    pub use prewarm_speculative::{
        Anchor, AnchorHost, AnchorId, ContainerId, PrefetchManager, TreeMutation, TriggerEvent,
    };
    pub use prewarm_telemetry::{
        ConsentService, NavigationTiming, PageVisibility, RecordContext, TelemetryController,
    };
}
