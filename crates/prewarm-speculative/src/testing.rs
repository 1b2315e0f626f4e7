//! In-memory host bindings for tests and headless replay
//!
//! These stand in for a real document: they record which observers are
//! attached, which hints were written, and which URLs were executed.

use crate::{
    Anchor, AnchorHost, AnchorId, ContainerId, DocumentHead, PrefetchExecutor, PrefetchStrategy,
    Result, SpeculativeError,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use prewarm_core::PrefetchRecorder;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;
use url::Url;

#[derive(Debug, Default)]
struct HostState {
    visibility: HashMap<AnchorId, u32>,
    pointer: HashSet<AnchorId>,
    focus: HashSet<AnchorId>,
    containers: HashMap<ContainerId, Vec<Anchor>>,
    attach_calls: usize,
}

/// Host that records attached observers instead of touching a document
#[derive(Debug, Default)]
pub struct RecordingHost {
    state: Mutex<HostState>,
    environment_listeners: AtomicBool,
    disconnected: AtomicBool,
}

impl RecordingHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `anchors` enumerable under `container`
    pub fn set_container(&self, container: ContainerId, anchors: Vec<Anchor>) {
        self.state().containers.insert(container, anchors);
    }

    /// Whether a visibility observer is attached
    pub fn is_visibility_observed(&self, anchor: AnchorId) -> bool {
        self.state().visibility.contains_key(&anchor)
    }

    /// Root margin the anchor is observed with
    pub fn root_margin(&self, anchor: AnchorId) -> Option<u32> {
        self.state().visibility.get(&anchor).copied()
    }

    /// Whether pointer listeners are attached
    pub fn has_pointer(&self, anchor: AnchorId) -> bool {
        self.state().pointer.contains(&anchor)
    }

    /// Whether a focus listener is attached
    pub fn has_focus(&self, anchor: AnchorId) -> bool {
        self.state().focus.contains(&anchor)
    }

    /// Whether any observer or listener is attached to the anchor
    pub fn is_observed(&self, anchor: AnchorId) -> bool {
        let state = self.state();
        state.visibility.contains_key(&anchor)
            || state.pointer.contains(&anchor)
            || state.focus.contains(&anchor)
    }

    /// Total attach calls of any kind
    pub fn attach_calls(&self) -> usize {
        self.state().attach_calls
    }

    /// Whether online/offline and motion listeners are installed
    pub fn has_environment_listeners(&self) -> bool {
        self.environment_listeners.load(Ordering::SeqCst)
    }

    /// Whether the visibility observer was disconnected
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl AnchorHost for RecordingHost {
    fn observe_visibility(&self, anchor: AnchorId, root_margin_px: u32) {
        let mut state = self.state();
        state.visibility.insert(anchor, root_margin_px);
        state.attach_calls += 1;
    }

    fn unobserve_visibility(&self, anchor: AnchorId) {
        self.state().visibility.remove(&anchor);
    }

    fn disconnect_visibility(&self) {
        self.state().visibility.clear();
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn attach_pointer(&self, anchor: AnchorId) {
        let mut state = self.state();
        state.pointer.insert(anchor);
        state.attach_calls += 1;
    }

    fn detach_pointer(&self, anchor: AnchorId) {
        self.state().pointer.remove(&anchor);
    }

    fn attach_focus(&self, anchor: AnchorId) {
        let mut state = self.state();
        state.focus.insert(anchor);
        state.attach_calls += 1;
    }

    fn detach_focus(&self, anchor: AnchorId) {
        self.state().focus.remove(&anchor);
    }

    fn attach_environment_listeners(&self) {
        self.environment_listeners.store(true, Ordering::SeqCst);
    }

    fn detach_environment_listeners(&self) {
        self.environment_listeners.store(false, Ordering::SeqCst);
    }

    fn anchors_within(&self, container: ContainerId) -> Vec<Anchor> {
        self.state()
            .containers
            .get(&container)
            .cloned()
            .unwrap_or_default()
    }
}

/// Document head keeping hints in a set
#[derive(Debug, Default)]
pub struct RecordingHead {
    hints: DashSet<String>,
    appended: AtomicUsize,
}

impl RecordingHead {
    /// Create an empty head
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hints appended
    pub fn append_count(&self) -> usize {
        self.appended.load(Ordering::SeqCst)
    }
}

impl DocumentHead for RecordingHead {
    fn has_prefetch_hint(&self, url: &Url) -> bool {
        self.hints.contains(url.as_str())
    }

    fn append_prefetch_hint(&self, url: &Url) {
        self.hints.insert(url.to_string());
        self.appended.fetch_add(1, Ordering::SeqCst);
    }
}

/// Executor with scripted outcomes.
///
/// Records every call, fails URLs registered with [`fail_on`], and when
/// created with [`holding`] parks each request until [`release`] hands out
/// a permit, which lets tests observe in-flight behaviour.
///
/// [`fail_on`]: ScriptedExecutor::fail_on
/// [`holding`]: ScriptedExecutor::holding
/// [`release`]: ScriptedExecutor::release
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    calls: Mutex<Vec<Url>>,
    failing: DashSet<String>,
    hold: Option<Arc<Semaphore>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    /// Executor that completes every request immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor that parks every request until released
    pub fn holding() -> Self {
        Self {
            hold: Some(Arc::new(Semaphore::new(0))),
            ..Default::default()
        }
    }

    /// Fail requests for this URL
    pub fn fail_on(&self, url: &str) {
        self.failing.insert(url.to_string());
    }

    /// Let `n` parked requests finish
    pub fn release(&self, n: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(n);
        }
    }

    /// URLs executed so far, in dispatch order
    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of executions
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Requests currently executing
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous requests seen
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrefetchExecutor for ScriptedExecutor {
    fn strategy(&self) -> PrefetchStrategy {
        PrefetchStrategy::Fetch
    }

    async fn execute(&self, url: &Url) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);

        if let Some(hold) = &self.hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(url.as_str()) {
            return Err(SpeculativeError::Network("scripted failure".into()));
        }
        Ok(())
    }
}

/// Recorder collecting warmed URLs
#[derive(Debug, Default)]
pub struct RecordingRecorder {
    marks: DashMap<String, usize>,
}

impl RecordingRecorder {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Times `url` was marked
    pub fn marks_for(&self, url: &str) -> usize {
        self.marks.get(url).map(|c| *c).unwrap_or(0)
    }

    /// Total marks recorded
    pub fn total(&self) -> usize {
        self.marks.iter().map(|e| *e.value()).sum()
    }
}

#[async_trait]
impl PrefetchRecorder for RecordingRecorder {
    async fn mark_prefetched(&self, url: &Url) {
        *self.marks.entry(url.to_string()).or_insert(0) += 1;
    }
}
