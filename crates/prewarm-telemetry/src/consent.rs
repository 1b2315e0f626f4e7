//! Consent service seam

use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::watch;
use tracing::debug;

/// Consent service id gating telemetry delivery
pub const TELEMETRY_CONSENT_SERVICE: &str = "performance-analytics";

/// External consent manager.
///
/// `subscribe` returns a receiver that changes whenever any grant changes;
/// dropping it unsubscribes.
pub trait ConsentService: Send + Sync {
    /// Current per-service grant map
    fn snapshot(&self) -> HashMap<String, bool>;

    /// Whether `service` is granted
    fn is_granted(&self, service: &str) -> bool;

    /// Change notifications
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// In-process consent state
#[derive(Debug)]
pub struct MemoryConsent {
    grants: DashMap<String, bool>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryConsent {
    fn default() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            grants: DashMap::new(),
            changes,
        }
    }
}

impl MemoryConsent {
    /// Create with every service denied
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with `services` granted
    pub fn granted(services: &[&str]) -> Self {
        let consent = Self::new();
        for service in services {
            consent.grants.insert(service.to_string(), true);
        }
        consent
    }

    /// Set a grant, notifying subscribers when it changes
    pub fn set(&self, service: &str, granted: bool) {
        let previous = self.grants.insert(service.to_string(), granted);
        if previous != Some(granted) {
            debug!("Consent for {} {}", service, if granted { "granted" } else { "revoked" });
            self.changes.send_modify(|generation| *generation += 1);
        }
    }

    /// Grant a service
    pub fn grant(&self, service: &str) {
        self.set(service, true);
    }

    /// Revoke a service
    pub fn revoke(&self, service: &str) {
        self.set(service, false);
    }
}

impl ConsentService for MemoryConsent {
    fn snapshot(&self) -> HashMap<String, bool> {
        self.grants
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    fn is_granted(&self, service: &str) -> bool {
        self.grants.get(service).is_some_and(|g| *g)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}
