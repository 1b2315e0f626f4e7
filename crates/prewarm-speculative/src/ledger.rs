//! Prefetch ledger: FIFO queue plus per-URL lifecycle bookkeeping

use crate::AnchorId;
use std::collections::{HashMap, VecDeque};
use tracing::debug;
use url::Url;

/// Unit of speculative work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchTask {
    /// Absolute destination
    pub url: Url,
    /// Anchor whose trigger produced the task
    pub anchor: Option<AnchorId>,
}

/// Lifecycle of a URL known to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the queue
    Queued,
    /// Dispatched, awaiting the executor
    InFlight,
    /// Warmed successfully
    Completed,
    /// Executor failed; never retried
    Failed,
}

/// Counters kept by the ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Tasks admitted to the queue
    pub admitted: u64,
    /// Admissions refused because the URL was already known
    pub duplicates: u64,
    /// Tasks handed to an executor
    pub dispatched: u64,
    /// Tasks that completed
    pub completed: u64,
    /// Tasks that failed
    pub failed: u64,
}

/// Queue and dedup state owned by one manager
#[derive(Debug, Default)]
pub struct PrefetchLedger {
    queue: VecDeque<PrefetchTask>,
    states: HashMap<Url, TaskState>,
    stats: LedgerStats,
}

impl PrefetchLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// State of a URL, if known
    pub fn state(&self, url: &Url) -> Option<TaskState> {
        self.states.get(url).copied()
    }

    /// Queue a task unless its URL is queued, in flight, completed or failed
    pub fn admit(&mut self, task: PrefetchTask) -> bool {
        if self.states.contains_key(&task.url) {
            self.stats.duplicates += 1;
            return false;
        }

        self.states.insert(task.url.clone(), TaskState::Queued);
        self.queue.push_back(task);
        self.stats.admitted += 1;
        true
    }

    /// Pop the oldest queued task and mark it in flight
    pub fn start_next(&mut self) -> Option<PrefetchTask> {
        let task = self.queue.pop_front()?;
        self.states.insert(task.url.clone(), TaskState::InFlight);
        self.stats.dispatched += 1;
        Some(task)
    }

    /// Move an in-flight URL to completed
    pub fn complete(&mut self, url: &Url) {
        if let Some(state) = self.states.get_mut(url) {
            if *state == TaskState::InFlight {
                *state = TaskState::Completed;
                self.stats.completed += 1;
            }
        }
    }

    /// Move an in-flight URL to failed
    pub fn fail(&mut self, url: &Url) {
        if let Some(state) = self.states.get_mut(url) {
            if *state == TaskState::InFlight {
                *state = TaskState::Failed;
                self.stats.failed += 1;
            }
        }
    }

    /// Drop every queued task; in-flight and finished URLs are kept
    pub fn clear_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        for task in self.queue.drain(..) {
            self.states.remove(&task.url);
        }
        if dropped > 0 {
            debug!("Dropped {} queued prefetch tasks", dropped);
        }
        dropped
    }

    /// Number of queued tasks
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Number of URLs in flight
    pub fn in_flight_len(&self) -> usize {
        self.count(TaskState::InFlight)
    }

    /// Number of completed URLs
    pub fn completed_len(&self) -> usize {
        self.count(TaskState::Completed)
    }

    /// Number of failed URLs
    pub fn failed_len(&self) -> usize {
        self.count(TaskState::Failed)
    }

    /// Check if nothing is waiting
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Counters
    pub fn stats(&self) -> LedgerStats {
        self.stats
    }

    fn count(&self, wanted: TaskState) -> usize {
        self.states.values().filter(|s| **s == wanted).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(path: &str) -> PrefetchTask {
        PrefetchTask {
            url: Url::parse("https://example.com").unwrap().join(path).unwrap(),
            anchor: None,
        }
    }

    #[test]
    fn test_fifo_order() {
        let mut ledger = PrefetchLedger::new();
        ledger.admit(task("/a"));
        ledger.admit(task("/b"));
        ledger.admit(task("/c"));

        assert_eq!(ledger.start_next().unwrap().url.path(), "/a");
        assert_eq!(ledger.start_next().unwrap().url.path(), "/b");
        assert_eq!(ledger.start_next().unwrap().url.path(), "/c");
        assert!(ledger.start_next().is_none());
    }

    #[test]
    fn test_dedup_across_lifecycle() {
        let mut ledger = PrefetchLedger::new();
        let t = task("/docs/intro");

        assert!(ledger.admit(t.clone()));
        assert!(!ledger.admit(t.clone()));

        let started = ledger.start_next().unwrap();
        assert_eq!(ledger.state(&started.url), Some(TaskState::InFlight));
        assert!(!ledger.admit(t.clone()));

        ledger.complete(&started.url);
        assert_eq!(ledger.state(&started.url), Some(TaskState::Completed));
        assert!(!ledger.admit(t));

        let stats = ledger.stats();
        assert_eq!(stats.admitted, 1);
        assert_eq!(stats.duplicates, 3);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_failure_is_not_completion() {
        let mut ledger = PrefetchLedger::new();
        ledger.admit(task("/broken"));
        let started = ledger.start_next().unwrap();

        ledger.fail(&started.url);
        assert_eq!(ledger.state(&started.url), Some(TaskState::Failed));
        assert_eq!(ledger.completed_len(), 0);
        assert_eq!(ledger.failed_len(), 1);
        assert!(!ledger.admit(task("/broken")));
    }

    #[test]
    fn test_complete_ignores_unknown_or_queued() {
        let mut ledger = PrefetchLedger::new();
        let t = task("/a");
        ledger.complete(&t.url);
        assert!(ledger.state(&t.url).is_none());

        ledger.admit(t.clone());
        ledger.complete(&t.url);
        assert_eq!(ledger.state(&t.url), Some(TaskState::Queued));
    }

    #[test]
    fn test_clear_queue_forgets_queued_only() {
        let mut ledger = PrefetchLedger::new();
        ledger.admit(task("/a"));
        ledger.admit(task("/b"));
        let started = ledger.start_next().unwrap();

        assert_eq!(ledger.clear_queue(), 1);
        assert_eq!(ledger.in_flight_len(), 1);
        assert!(ledger.admit(task("/b")));
        assert!(!ledger.admit(task(started.url.path())));
    }
}
