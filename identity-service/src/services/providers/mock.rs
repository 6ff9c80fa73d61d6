use super::{CallbackError, CallbackSink};
use crate::models::CallbackEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Mock callback sink for testing. Records delivered events per node and can
/// fail the first `failures` attempts to exercise retries.
pub struct MockCallbackSink {
    events: DashMap<String, Vec<CallbackEvent>>,
    failures_remaining: AtomicU32,
    fail_without_url: bool,
    attempt_count: AtomicU64,
}

impl MockCallbackSink {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            events: DashMap::new(),
            failures_remaining: AtomicU32::new(failures),
            fail_without_url: false,
            attempt_count: AtomicU64::new(0),
        }
    }

    /// Report the destination as having no callback URL for the first
    /// `failures` attempts.
    pub fn unregistered_first(failures: u32) -> Self {
        Self {
            fail_without_url: true,
            ..Self::failing_first(failures)
        }
    }

    pub fn attempt_count(&self) -> u64 {
        self.attempt_count.load(Ordering::SeqCst)
    }

    /// Events delivered to `node_id`, in delivery order.
    pub fn events_for(&self, node_id: &str) -> Vec<CallbackEvent> {
        self.events
            .get(node_id)
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn delivered_count(&self) -> usize {
        self.events.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn clear(&self) {
        self.events.clear();
    }
}

impl Default for MockCallbackSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackSink for MockCallbackSink {
    async fn deliver(&self, event: &CallbackEvent) -> Result<(), CallbackError> {
        self.attempt_count.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail && self.fail_without_url {
            return Err(CallbackError::NoCallbackUrl(event.node_id().to_string()));
        }
        if should_fail {
            return Err(CallbackError::Connection("[MOCK] injected failure".to_string()));
        }

        tracing::info!(
            node_id = %event.node_id(),
            event_type = event.kind(),
            "[MOCK] Callback would be delivered"
        );

        self.events
            .entry(event.node_id().to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
