//! # Prewarm Core
//!
//! Shared seams for the prewarm speculative navigation engine.
//!
//! The prefetch manager and the telemetry pipeline never talk to a real
//! browser, disk or wall clock directly. Everything environmental goes
//! through the small traits defined here so both sides can be driven by
//! fakes in tests and by real bindings in production.
//!
//! ## Seams
//!
//! ```text
//! ┌──────────────────────┐      PrefetchRecorder      ┌──────────────────────┐
//! │   Prefetch Manager   │ ─────────────────────────> │ Telemetry Controller │
//! └──────────────────────┘                            └──────────────────────┘
//!            │                                                  │
//!            └──────────────── Clock ──────────────┬────────────┘
//!                                                  │
//!                                          KeyValueStore
//!                                  (durable / per-session / no-op)
//! ```
//!
//! - [`Clock`] - millisecond wall clock ([`SystemClock`], [`ManualClock`])
//! - [`KeyValueStore`] - origin-scoped string store ([`MemoryStore`],
//!   [`FileStore`], [`NoopStore`]) with availability probing
//! - [`PrefetchRecorder`] - receives "this URL was just warmed" notices

pub mod clock;
pub mod error;
pub mod storage;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use storage::{
    load_json, probe_store, save_json, FileStore, KeyValueStore, MemoryStore, NoopStore,
    PROBE_KEY,
};
pub use traits::PrefetchRecorder;

/// Prelude for common imports
pub mod prelude {
    pub use super::{Clock, KeyValueStore, PrefetchRecorder, Result, SystemClock};
}
