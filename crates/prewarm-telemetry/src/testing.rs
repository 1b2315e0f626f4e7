//! Recording transport for tests and dry runs

use crate::{DeliveryOutcome, DeliveryTransport};
use async_trait::async_trait;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Sent {
    events: Vec<(String, serde_json::Value)>,
}

/// Transport that records payloads and answers with a scripted outcome
#[derive(Debug)]
pub struct RecordingTransport {
    sent: Mutex<Sent>,
    outcome: Mutex<DeliveryOutcome>,
}

impl RecordingTransport {
    /// Confirm every delivery
    pub fn delivering() -> Self {
        Self {
            sent: Mutex::new(Sent::default()),
            outcome: Mutex::new(DeliveryOutcome::delivered()),
        }
    }

    /// Refuse every delivery with `reason`
    pub fn rejecting(reason: &str) -> Self {
        Self {
            sent: Mutex::new(Sent::default()),
            outcome: Mutex::new(DeliveryOutcome::failed(reason)),
        }
    }

    /// Change the scripted outcome
    pub fn set_outcome(&self, outcome: DeliveryOutcome) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Number of send calls
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).events.len()
    }

    /// Event name of the latest send
    pub fn last_event(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .last()
            .map(|(event, _)| event.clone())
    }

    /// Every payload sent, oldest first
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn send(&self, event: &str, payload: &serde_json::Value) -> DeliveryOutcome {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .push((event.to_string(), payload.clone()));

        self.outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
