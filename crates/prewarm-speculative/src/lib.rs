//! Speculative Navigation Prefetching
//!
//! This crate predicts which same-origin links a visitor is about to follow
//! and warms the network path for them ahead of the click:
//! - Opt-in anchors are screened by a pure eligibility evaluator
//! - Viewport visibility, pointer dwell and keyboard focus trigger work
//! - A deduplicating FIFO ledger feeds a bounded, idle-time drain loop
//! - Data-saver, slow-connection, offline and reduced-motion policy is live
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Prefetch Manager                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Anchors ──> Eligibility ──> Observation (host listeners)   │
//! │                                   │                          │
//! │              visible / dwell 65ms / focus                    │
//! │                                   ↓                          │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │              Prefetch Ledger                          │   │
//! │  │   Queued:    [/pricing] [/docs/intro]                 │   │
//! │  │   In-flight: [/about]          (gate: 4 slots)        │   │
//! │  │   Completed: [/contact] ──> PrefetchRecorder          │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                                   │                          │
//! │                 Hint executor  /  Fetch executor             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod anchor;
mod eligibility;
mod error;
mod executor;
mod ledger;
mod manager;
mod policy;
pub mod testing;

pub use anchor::{
    Anchor, AnchorHost, AnchorId, ContainerId, DocumentHead, TreeMutation, TriggerEvent,
    PREFETCH_MARKER_ATTR,
};
pub use eligibility::{evaluate, AnchorPredicate, EligibilityOptions, EligibilityResult, RejectReason};
pub use error::{Result, SpeculativeError};
pub use executor::{FetchConfig, FetchExecutor, HintExecutor, PrefetchExecutor, PrefetchStrategy};
pub use ledger::{LedgerStats, PrefetchLedger, PrefetchTask, TaskState};
pub use manager::{
    EnqueueOutcome, IdleStrategy, ManagerBuilder, ManagerConfig, ManagerStats, PrefetchManager,
    RegistrationOutcome,
};
pub use policy::{EffectiveConnectionType, Environment, NetworkInformation};

/// Default visibility margin ahead of the viewport, in pixels
pub const DEFAULT_ROOT_MARGIN_PX: u32 = 200;

/// Default pointer dwell before a hover counts as intent
pub const DEFAULT_DWELL_MS: u64 = 65;

/// Prelude for common imports
pub mod prelude {
    pub use super::{
        Anchor, AnchorHost, AnchorId, PrefetchExecutor, PrefetchManager, ManagerConfig,
        TriggerEvent, Result,
    };
}
