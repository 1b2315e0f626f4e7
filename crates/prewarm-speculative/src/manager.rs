//! Prefetch manager coordinating observation, policy and bounded dispatch

use crate::{
    evaluate, Anchor, AnchorHost, AnchorId, AnchorPredicate, ContainerId, EligibilityOptions,
    Environment, NetworkInformation, PrefetchExecutor, PrefetchLedger, PrefetchStrategy,
    PrefetchTask, RejectReason, Result, SpeculativeError, TreeMutation, TriggerEvent,
    DEFAULT_DWELL_MS, DEFAULT_ROOT_MARGIN_PX,
};
use prewarm_core::PrefetchRecorder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// How the drain loop waits for an idle moment before starting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IdleStrategy {
    /// Yield to the scheduler once, then drain
    Yield,
    /// Wait a short fixed delay, then drain
    Deferred { delay_ms: u64 },
}

impl Default for IdleStrategy {
    fn default() -> Self {
        IdleStrategy::Yield
    }
}

/// Configuration for the prefetch manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Origin hrefs are resolved against; the document's own when unset
    pub origin: Option<Url>,
    /// Execution strategy
    pub strategy: PrefetchStrategy,
    /// Maximum concurrent speculative requests
    pub max_concurrent: usize,
    /// Pointer dwell before a hover counts as intent (ms)
    pub dwell_ms: u64,
    /// Visibility margin ahead of the viewport (px)
    pub root_margin_px: u32,
    /// Idle-time scheduling of the drain loop
    pub idle: IdleStrategy,
    /// Treat requests outstanding longer than this as failed (ms)
    pub prefetch_timeout_ms: Option<u64>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            origin: None,
            strategy: PrefetchStrategy::default(),
            max_concurrent: 4,
            dwell_ms: DEFAULT_DWELL_MS,
            root_margin_px: DEFAULT_ROOT_MARGIN_PX,
            idle: IdleStrategy::default(),
            prefetch_timeout_ms: None,
        }
    }
}

/// Result of registering an anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Observers attached
    Registered,
    /// Already observed; destination updated in place
    Updated,
    /// Already observed with the same destination
    AlreadyRegistered,
    /// Opt-in marker absent; nothing attached
    Unmarked,
    /// Eligibility rejected the anchor; nothing attached
    Ineligible(RejectReason),
    /// Manager was destroyed
    Destroyed,
}

/// Result of a trigger asking for a prefetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued and a drain scheduled
    Queued,
    /// Queued while offline; dispatch withheld until online
    Deferred,
    /// URL already queued, in flight, completed or failed
    Duplicate,
    /// Data saver or very slow connection
    DroppedByPolicy,
    /// Anchor unknown or manager destroyed
    Ignored,
}

/// Manager statistics
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    /// Anchors currently observed
    pub registered: usize,
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Requests in flight
    pub in_flight: usize,
    /// URLs warmed
    pub completed: usize,
    /// URLs that failed
    pub failed: usize,
    /// Tasks dispatched overall
    pub dispatched: u64,
    /// Triggers collapsed into existing work
    pub duplicates: u64,
    /// Triggers dropped by bandwidth policy
    pub dropped_by_policy: u64,
}

impl ManagerStats {
    /// Share of finished requests that warmed their destination
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            1.0
        } else {
            self.completed as f64 / total as f64
        }
    }
}

/// Per-anchor observation record
struct Observation {
    url: Url,
    pointer: bool,
    dwell: Option<JoinHandle<()>>,
}

struct ManagerState {
    anchors: HashMap<AnchorId, Observation>,
    ledger: PrefetchLedger,
    env: Environment,
    destroyed: bool,
    dropped_by_policy: u64,
}

struct ManagerInner {
    config: ManagerConfig,
    eligibility: EligibilityOptions,
    host: Arc<dyn AnchorHost>,
    executor: Arc<dyn PrefetchExecutor>,
    recorder: Option<Arc<dyn PrefetchRecorder>>,
    state: Mutex<ManagerState>,
    gate: Arc<Semaphore>,
    drain_scheduled: AtomicBool,
    settled: Notify,
}

/// Builder for [`PrefetchManager`]
pub struct ManagerBuilder {
    config: ManagerConfig,
    document_url: Url,
    environment: Environment,
    host: Option<Arc<dyn AnchorHost>>,
    executor: Option<Arc<dyn PrefetchExecutor>>,
    recorder: Option<Arc<dyn PrefetchRecorder>>,
    predicate: Option<AnchorPredicate>,
}

impl ManagerBuilder {
    /// Document binding (required)
    pub fn host(mut self, host: Arc<dyn AnchorHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Execution strategy (required)
    pub fn executor(mut self, executor: Arc<dyn PrefetchExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Receiver of warm marks for completed prefetches
    pub fn recorder(mut self, recorder: Arc<dyn PrefetchRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Custom eligibility veto
    pub fn predicate(mut self, predicate: AnchorPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Initial environment (online state, motion preference, network)
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Build the manager and install environment listeners on the host
    pub fn build(self) -> Result<PrefetchManager> {
        let host = self
            .host
            .ok_or_else(|| SpeculativeError::Configuration("anchor host not set".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| SpeculativeError::Configuration("prefetch executor not set".into()))?;

        let mut eligibility = EligibilityOptions::new(self.document_url);
        if let Some(origin) = self.config.origin.clone() {
            eligibility = eligibility.with_origin(origin);
        }
        if let Some(predicate) = self.predicate {
            eligibility = eligibility.with_predicate(predicate);
        }

        let max_concurrent = self.config.max_concurrent.max(1);
        host.attach_environment_listeners();

        info!(
            "Prefetch manager ready ({:?}, {} concurrent, origin {})",
            executor.strategy(),
            max_concurrent,
            eligibility.base().origin().ascii_serialization()
        );

        Ok(PrefetchManager {
            inner: Arc::new(ManagerInner {
                config: self.config,
                eligibility,
                host,
                executor,
                recorder: self.recorder,
                state: Mutex::new(ManagerState {
                    anchors: HashMap::new(),
                    ledger: PrefetchLedger::new(),
                    env: self.environment,
                    destroyed: false,
                    dropped_by_policy: 0,
                }),
                gate: Arc::new(Semaphore::new(max_concurrent)),
                drain_scheduled: AtomicBool::new(false),
                settled: Notify::new(),
            }),
        })
    }
}

/// Speculative prefetch manager.
///
/// Cheap to clone; clones share one queue, one ledger and one
/// concurrency gate.
#[derive(Clone)]
pub struct PrefetchManager {
    inner: Arc<ManagerInner>,
}

impl PrefetchManager {
    /// Start building a manager for the document at `document_url`
    pub fn builder(config: ManagerConfig, document_url: Url) -> ManagerBuilder {
        ManagerBuilder {
            config,
            document_url,
            environment: Environment::default(),
            host: None,
            executor: None,
            recorder: None,
            predicate: None,
        }
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Register an anchor; idempotent.
    ///
    /// Unmarked or ineligible anchors get no observers at all, and an
    /// already-registered anchor that lost its marker or eligibility is
    /// torn down.
    pub async fn register_anchor(&self, anchor: Anchor) -> RegistrationOutcome {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;

        if state.destroyed {
            return RegistrationOutcome::Destroyed;
        }

        if !anchor.prefetch_marker {
            if let Some(observation) = state.anchors.remove(&anchor.id) {
                teardown(inner.host.as_ref(), anchor.id, observation);
            }
            return RegistrationOutcome::Unmarked;
        }

        let result = evaluate(&anchor, &inner.eligibility);
        let url = match result.url {
            Some(url) if result.eligible => url,
            _ => {
                if let Some(observation) = state.anchors.remove(&anchor.id) {
                    teardown(inner.host.as_ref(), anchor.id, observation);
                }
                let reason = result.reason.unwrap_or(RejectReason::InvalidUrl);
                debug!("{} not eligible: {}", anchor.id, reason);
                return RegistrationOutcome::Ineligible(reason);
            }
        };

        if let Some(observation) = state.anchors.get_mut(&anchor.id) {
            if observation.url == url {
                return RegistrationOutcome::AlreadyRegistered;
            }
            observation.url = url;
            return RegistrationOutcome::Updated;
        }

        let pointer = !state.env.reduced_motion;
        inner
            .host
            .observe_visibility(anchor.id, inner.config.root_margin_px);
        if pointer {
            inner.host.attach_pointer(anchor.id);
        }
        inner.host.attach_focus(anchor.id);

        debug!("Observing {} -> {}", anchor.id, url.path());
        state.anchors.insert(
            anchor.id,
            Observation {
                url,
                pointer,
                dwell: None,
            },
        );

        RegistrationOutcome::Registered
    }

    /// Tear down every observer of an anchor; idempotent
    pub async fn unregister_anchor(&self, id: AnchorId) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.anchors.remove(&id) {
            Some(observation) => {
                teardown(self.inner.host.as_ref(), id, observation);
                debug!("Stopped observing {}", id);
                true
            }
            None => false,
        }
    }

    /// Register every anchor the host reports below `container`.
    ///
    /// Returns the number of anchors newly registered or updated.
    pub async fn register_anchors_within(&self, container: ContainerId) -> usize {
        let anchors = self.inner.host.anchors_within(container);
        let mut registered = 0;

        for anchor in anchors {
            if matches!(
                self.register_anchor(anchor).await,
                RegistrationOutcome::Registered | RegistrationOutcome::Updated
            ) {
                registered += 1;
            }
        }

        registered
    }

    /// Reduce a batch of tree changes into register/unregister calls
    pub async fn apply_mutations<I>(&self, mutations: I)
    where
        I: IntoIterator<Item = TreeMutation>,
    {
        for mutation in mutations {
            match mutation {
                TreeMutation::Added(anchor) | TreeMutation::AttributesChanged(anchor) => {
                    self.register_anchor(anchor).await;
                }
                TreeMutation::Removed(id) => {
                    self.unregister_anchor(id).await;
                }
                TreeMutation::SubtreeAdded(container) => {
                    self.register_anchors_within(container).await;
                }
            }
        }
    }

    /// Handle an observer firing on the host.
    ///
    /// Returns the enqueue outcome for triggers that enqueue immediately;
    /// pointer events only arm or cancel the dwell timer.
    pub async fn handle_trigger(&self, event: TriggerEvent) -> Option<EnqueueOutcome> {
        match event {
            TriggerEvent::Visible(id) | TriggerEvent::Focus(id) => {
                let url = {
                    let state = self.inner.state.lock().await;
                    state.anchors.get(&id).map(|o| o.url.clone())
                };
                match url {
                    Some(url) => Some(self.enqueue(url, Some(id)).await),
                    None => None,
                }
            }
            TriggerEvent::PointerEnter(id) => {
                self.start_dwell(id).await;
                None
            }
            TriggerEvent::PointerLeave(id) => {
                self.cancel_dwell(id).await;
                None
            }
        }
    }

    async fn start_dwell(&self, id: AnchorId) {
        let mut state = self.inner.state.lock().await;
        let Some(observation) = state.anchors.get_mut(&id) else {
            return;
        };

        if !observation.pointer {
            return;
        }
        if observation
            .dwell
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }

        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let dwell = Duration::from_millis(self.inner.config.dwell_ms);

        observation.dwell = Some(tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            if let Some(inner) = weak.upgrade() {
                PrefetchManager { inner }.fire_dwell(id).await;
            }
        }));
    }

    async fn cancel_dwell(&self, id: AnchorId) {
        let mut state = self.inner.state.lock().await;
        if let Some(handle) = state.anchors.get_mut(&id).and_then(|o| o.dwell.take()) {
            handle.abort();
        }
    }

    async fn fire_dwell(&self, id: AnchorId) {
        let url = {
            let mut state = self.inner.state.lock().await;
            match state.anchors.get_mut(&id) {
                Some(observation) if observation.pointer => {
                    observation.dwell = None;
                    Some(observation.url.clone())
                }
                _ => None,
            }
        };

        if let Some(url) = url {
            debug!("Dwell intent on {}", id);
            self.enqueue(url, Some(id)).await;
        }
    }

    /// Queue a prefetch of `url` subject to dedup and policy
    pub async fn enqueue(&self, url: Url, anchor: Option<AnchorId>) -> EnqueueOutcome {
        let online = {
            let mut state = self.inner.state.lock().await;
            if state.destroyed {
                return EnqueueOutcome::Ignored;
            }

            let known = state.ledger.state(&url).is_some();
            if !known && state.env.network.is_constrained() {
                state.dropped_by_policy += 1;
                debug!("Constrained network, dropping prefetch of {}", url.path());
                return EnqueueOutcome::DroppedByPolicy;
            }

            if !state.ledger.admit(PrefetchTask { url, anchor }) {
                return EnqueueOutcome::Duplicate;
            }

            state.env.online
        };

        if online {
            self.schedule_drain();
            EnqueueOutcome::Queued
        } else {
            EnqueueOutcome::Deferred
        }
    }

    fn schedule_drain(&self) {
        if self.inner.drain_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }

        let manager = self.clone();
        tokio::spawn(async move {
            match manager.inner.config.idle {
                IdleStrategy::Yield => tokio::task::yield_now().await,
                IdleStrategy::Deferred { delay_ms } => {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await
                }
            }
            manager.inner.drain_scheduled.store(false, Ordering::Release);
            manager.flush_queue().await;
        });
    }

    /// Drain the queue up to the concurrency ceiling.
    ///
    /// Resolves once no more work can start: the queue is empty, the client
    /// is offline, or the manager was destroyed. Waits for a free slot while
    /// the gate is full. Returns the number of tasks dispatched.
    pub async fn flush_queue(&self) -> usize {
        let mut dispatched = 0;

        loop {
            {
                let state = self.inner.state.lock().await;
                if state.destroyed || !state.env.online || state.ledger.is_idle() {
                    break;
                }
            }

            let permit = match self.inner.gate.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let task = {
                let mut state = self.inner.state.lock().await;
                if state.destroyed || !state.env.online {
                    None
                } else {
                    state.ledger.start_next()
                }
            };

            let Some(task) = task else {
                break;
            };

            dispatched += 1;
            let manager = self.clone();
            tokio::spawn(async move {
                manager.execute(task, permit).await;
            });
        }

        if dispatched > 0 {
            debug!("Dispatched {} prefetch tasks", dispatched);
        }

        dispatched
    }

    async fn execute(&self, task: PrefetchTask, permit: OwnedSemaphorePermit) {
        let executor = &self.inner.executor;
        let outcome = match self.inner.config.prefetch_timeout_ms {
            Some(ms) => {
                match tokio::time::timeout(Duration::from_millis(ms), executor.execute(&task.url))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SpeculativeError::Timeout(ms)),
                }
            }
            None => executor.execute(&task.url).await,
        };

        match &outcome {
            Ok(()) => {
                if let Some(recorder) = &self.inner.recorder {
                    recorder.mark_prefetched(&task.url).await;
                }
            }
            Err(e) => debug!("Prefetch of {} failed: {}", task.url.path(), e),
        }

        let work_remains = {
            let mut state = self.inner.state.lock().await;
            if outcome.is_ok() {
                state.ledger.complete(&task.url);
            } else {
                state.ledger.fail(&task.url);
            }
            !state.destroyed && state.env.online && !state.ledger.is_idle()
        };

        drop(permit);
        self.inner.settled.notify_waiters();

        if work_remains {
            self.schedule_drain();
        }
    }

    /// Wait until nothing is in flight and no dispatchable work remains.
    ///
    /// A request that never resolves keeps this pending unless a prefetch
    /// timeout is configured.
    pub async fn wait_until_settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.inner.state.lock().await;
                let blocked = state.destroyed || !state.env.online;
                if state.ledger.in_flight_len() == 0 && (blocked || state.ledger.is_idle()) {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Connectivity changed; going online resumes any withheld backlog
    pub async fn set_online(&self, online: bool) {
        let resumed = {
            let mut state = self.inner.state.lock().await;
            if state.destroyed {
                return;
            }
            let was_online = state.env.online;
            state.env.online = online;
            !was_online && online && !state.ledger.is_idle()
        };

        if resumed {
            info!("Back online, draining withheld prefetch backlog");
            self.schedule_drain();
        }
        self.inner.settled.notify_waiters();
    }

    /// Motion preference changed; adds or removes pointer listeners in place
    pub async fn set_reduced_motion(&self, reduced: bool) {
        let mut state = self.inner.state.lock().await;
        if state.destroyed || state.env.reduced_motion == reduced {
            return;
        }
        state.env.reduced_motion = reduced;

        let host = self.inner.host.as_ref();
        for (id, observation) in state.anchors.iter_mut() {
            if reduced {
                if let Some(handle) = observation.dwell.take() {
                    handle.abort();
                }
                if observation.pointer {
                    host.detach_pointer(*id);
                    observation.pointer = false;
                }
            } else if !observation.pointer {
                host.attach_pointer(*id);
                observation.pointer = true;
            }
        }

        debug!(
            "Reduced motion {}, hover intent {} on {} anchors",
            if reduced { "on" } else { "off" },
            if reduced { "disabled" } else { "enabled" },
            state.anchors.len()
        );
    }

    /// Network conditions changed
    pub async fn set_network_information(&self, network: NetworkInformation) {
        let mut state = self.inner.state.lock().await;
        state.env.network = network;
    }

    /// Current environment snapshot
    pub async fn environment(&self) -> Environment {
        self.inner.state.lock().await.env
    }

    /// Whether an anchor is observed
    pub async fn is_registered(&self, id: AnchorId) -> bool {
        self.inner.state.lock().await.anchors.contains_key(&id)
    }

    /// Unregister everything, disconnect the visibility observer and remove
    /// environment listeners. Queued work is dropped; in-flight requests are
    /// left to resolve.
    pub async fn destroy(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.destroyed {
                return;
            }

            let host = self.inner.host.as_ref();
            let anchors: Vec<_> = state.anchors.drain().collect();
            let count = anchors.len();
            for (id, observation) in anchors {
                teardown(host, id, observation);
            }
            host.disconnect_visibility();
            host.detach_environment_listeners();

            let dropped = state.ledger.clear_queue();
            state.destroyed = true;

            info!(
                "Prefetch manager destroyed ({} anchors released, {} queued tasks dropped)",
                count, dropped
            );
        }

        self.inner.settled.notify_waiters();
    }

    /// Manager statistics
    pub async fn stats(&self) -> ManagerStats {
        let state = self.inner.state.lock().await;
        let ledger = state.ledger.stats();

        ManagerStats {
            registered: state.anchors.len(),
            queued: state.ledger.queued_len(),
            in_flight: state.ledger.in_flight_len(),
            completed: state.ledger.completed_len(),
            failed: state.ledger.failed_len(),
            dispatched: ledger.dispatched,
            duplicates: ledger.duplicates,
            dropped_by_policy: state.dropped_by_policy,
        }
    }
}

fn teardown(host: &dyn AnchorHost, id: AnchorId, observation: Observation) {
    if let Some(handle) = observation.dwell {
        handle.abort();
    }
    host.unobserve_visibility(id);
    if observation.pointer {
        host.detach_pointer(id);
    }
    host.detach_focus(id);
}
