//! Consent-gated flush orchestration
//!
//! One flush loop is shared by every mount. [`FlushOrchestrator::acquire`]
//! hands out a [`FlushHandle`]; the loop starts with the first handle and
//! stops when the last one is dropped.

use crate::{
    ConsentService, DeliveryTransport, SubmitOutcome, TelemetryController,
    TELEMETRY_CONSENT_SERVICE,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the flush loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Seconds between periodic flushes
    pub interval_secs: u64,
    /// Consent service id that must be granted
    pub consent_service: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            consent_service: TELEMETRY_CONSENT_SERVICE.to_string(),
        }
    }
}

/// Page visibility as reported by the host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageVisibility {
    #[default]
    Visible,
    Hidden,
}

/// What started a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Bootstrap,
    Interval,
    Hidden,
    ConsentGranted,
    Manual,
}

#[derive(Default)]
struct Mounts {
    count: usize,
    task: Option<JoinHandle<()>>,
}

struct FlushShared {
    config: FlushConfig,
    controller: Arc<TelemetryController>,
    transport: Arc<dyn DeliveryTransport>,
    consent: Arc<dyn ConsentService>,
    visibility: watch::Receiver<PageVisibility>,
    mounts: Mutex<Mounts>,
    attempts: AtomicU64,
}

impl FlushShared {
    fn mounts(&self) -> MutexGuard<'_, Mounts> {
        self.mounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn granted(&self) -> bool {
        self.consent.is_granted(&self.config.consent_service)
    }

    async fn flush(&self, trigger: FlushTrigger) -> Option<SubmitOutcome> {
        if !self.granted() {
            debug!("Skipping {:?} flush, consent not granted", trigger);
            return None;
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = self.controller.submit_pending(self.transport.as_ref()).await;

        match &outcome {
            SubmitOutcome::Delivered { routes, visits } => {
                debug!("{:?} flush delivered {} routes ({} visits)", trigger, routes, visits)
            }
            SubmitOutcome::NotDelivered { reason } => warn!(
                "{:?} flush not delivered: {}",
                trigger,
                reason.as_deref().unwrap_or("unknown")
            ),
            SubmitOutcome::NothingPending => {}
        }

        Some(outcome)
    }
}

/// Shared owner of the telemetry flush loop
#[derive(Clone)]
pub struct FlushOrchestrator {
    shared: Arc<FlushShared>,
}

impl FlushOrchestrator {
    /// Create an idle orchestrator; nothing runs until [`acquire`](Self::acquire)
    pub fn new(
        config: FlushConfig,
        controller: Arc<TelemetryController>,
        transport: Arc<dyn DeliveryTransport>,
        consent: Arc<dyn ConsentService>,
        visibility: watch::Receiver<PageVisibility>,
    ) -> Self {
        Self {
            shared: Arc::new(FlushShared {
                config,
                controller,
                transport,
                consent,
                visibility,
                mounts: Mutex::new(Mounts::default()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Mount; starts the loop on the first mount.
    ///
    /// Must be called from within a tokio runtime.
    pub fn acquire(&self) -> FlushHandle {
        let mut mounts = self.shared.mounts();
        mounts.count += 1;

        if mounts.count == 1 {
            info!(
                "Starting telemetry flush loop (every {}s)",
                self.shared.config.interval_secs
            );
            mounts.task = Some(tokio::spawn(run(self.shared.clone())));
        }

        FlushHandle {
            shared: self.shared.clone(),
        }
    }

    /// Live mounts
    pub fn mount_count(&self) -> usize {
        self.shared.mounts().count
    }

    /// Whether the loop is running
    pub fn is_running(&self) -> bool {
        self.shared.mounts().task.is_some()
    }

    /// Flush immediately if consent allows
    pub async fn flush_now(&self) -> Option<SubmitOutcome> {
        self.shared.flush(FlushTrigger::Manual).await
    }

    /// Flush attempts made while consent was granted
    pub fn flush_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }
}

/// Mount guard; dropping the last one stops the loop
#[must_use = "the flush loop stops when the handle is dropped"]
pub struct FlushHandle {
    shared: Arc<FlushShared>,
}

impl Drop for FlushHandle {
    fn drop(&mut self) {
        let mut mounts = self.shared.mounts();
        mounts.count = mounts.count.saturating_sub(1);

        if mounts.count == 0 {
            if let Some(task) = mounts.task.take() {
                task.abort();
                info!("Stopped telemetry flush loop");
            }
        }
    }
}

async fn run(shared: Arc<FlushShared>) {
    let mut consent = shared.consent.subscribe();
    let mut visibility = shared.visibility.clone();
    let mut consent_open = true;
    let mut visibility_open = true;

    let mut granted = shared.granted();
    if granted {
        shared.flush(FlushTrigger::Bootstrap).await;
    }

    let period = Duration::from_secs(shared.config.interval_secs.max(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                shared.flush(FlushTrigger::Interval).await;
            }
            changed = visibility.changed(), if visibility_open => {
                if changed.is_err() {
                    visibility_open = false;
                    continue;
                }
                let hidden = *visibility.borrow() == PageVisibility::Hidden;
                if hidden {
                    shared.flush(FlushTrigger::Hidden).await;
                }
            }
            changed = consent.changed(), if consent_open => {
                if changed.is_err() {
                    consent_open = false;
                    continue;
                }
                let now_granted = shared.granted();
                if now_granted && !granted {
                    shared.flush(FlushTrigger::ConsentGranted).await;
                }
                granted = now_granted;
            }
        }
    }
}
