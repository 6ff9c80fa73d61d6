//! Per-node callback queues.
//!
//! Each destination node gets its own FIFO drained by one worker task. A
//! delivery is retried with exponential backoff until it succeeds, so later
//! events for the same node never overtake earlier ones.

use crate::config::DispatcherConfig;
use crate::models::CallbackEvent;
use crate::services::providers::{CallbackError, CallbackSink};
use backoff::future::retry_notify;
use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    sink: Arc<dyn CallbackSink>,
    config: DispatcherConfig,
    queues: DashMap<String, mpsc::UnboundedSender<CallbackEvent>>,
    shutdown_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn CallbackSink>, config: DispatcherConfig) -> Self {
        tracing::info!(sink = sink.name(), "Callback dispatcher initialized");
        Self {
            inner: Arc::new(DispatcherInner {
                sink,
                config,
                queues: DashMap::new(),
                shutdown_token: CancellationToken::new(),
            }),
        }
    }

    /// Queue `event` for its destination node. Never blocks on delivery.
    pub fn notify(&self, event: CallbackEvent) {
        let node_id = event.node_id().to_string();
        let sender = self
            .inner
            .queues
            .entry(node_id.clone())
            .or_insert_with(|| self.spawn_worker(node_id.clone()))
            .clone();

        metrics::counter!("callbacks_queued_total", "type" => event.kind()).increment(1);

        if sender.send(event).is_err() {
            tracing::warn!(node_id = %node_id, "Callback queue closed, event dropped");
        }
    }

    pub fn queued_nodes(&self) -> usize {
        self.inner.queues.len()
    }

    pub async fn shutdown(&self) {
        tracing::info!("Initiating callback dispatcher shutdown");
        self.inner.shutdown_token.cancel();
    }

    fn spawn_worker(&self, node_id: String) -> mpsc::UnboundedSender<CallbackEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<CallbackEvent>();
        let sink = self.inner.sink.clone();
        let config = self.inner.config.clone();
        let shutdown = self.inner.shutdown_token.clone();

        tracing::debug!(node_id = %node_id, "Starting callback worker");

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!(node_id = %node_id, "Callback worker shutting down");
                        break;
                    }
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = deliver_with_retry(sink.as_ref(), &config, &event) => {}
                        }
                    }
                }
            }
        });

        tx
    }
}

async fn deliver_with_retry(sink: &dyn CallbackSink, config: &DispatcherConfig, event: &CallbackEvent) {
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(config.initial_backoff())
        .with_max_interval(config.max_backoff())
        .with_max_elapsed_time(None)
        .build();

    let result = retry_notify(
        backoff,
        || async {
            sink.deliver(event).await.map_err(|e| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        },
        |err: CallbackError, wait: Duration| {
            metrics::counter!("callback_retries_total").increment(1);
            tracing::warn!(
                node_id = %event.node_id(),
                event_type = event.kind(),
                error = %err,
                retry_in_ms = wait.as_millis() as u64,
                "Callback delivery failed, retrying"
            );
        },
    )
    .await;

    match result {
        Ok(()) => {
            metrics::counter!("callbacks_delivered_total", "type" => event.kind()).increment(1);
        }
        Err(e) => {
            metrics::counter!("callbacks_dropped_total", "type" => event.kind()).increment(1);
            tracing::warn!(
                node_id = %event.node_id(),
                event_type = event.kind(),
                error = %e,
                "Callback dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlockHeight, CreateRequestResult};
    use crate::services::providers::MockCallbackSink;

    fn fast_config() -> DispatcherConfig {
        DispatcherConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..DispatcherConfig::default()
        }
    }

    fn event(node_id: &str, reference_id: &str, height: u64) -> CallbackEvent {
        CallbackEvent::CreateRequestResult(CreateRequestResult {
            node_id: node_id.to_string(),
            reference_id: reference_id.to_string(),
            request_id: "req".to_string(),
            success: true,
            creation_block_height: BlockHeight::new("test", height),
        })
    }

    async fn wait_for_deliveries(sink: &MockCallbackSink, count: usize) {
        for _ in 0..200 {
            if sink.delivered_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_retries_preserve_order() {
        let sink = Arc::new(MockCallbackSink::failing_first(2));
        let dispatcher = Dispatcher::new(sink.clone(), fast_config());

        dispatcher.notify(event("rp1", "a", 1));
        dispatcher.notify(event("rp1", "b", 2));
        dispatcher.notify(event("rp1", "c", 3));

        wait_for_deliveries(&sink, 3).await;

        let heights: Vec<u64> = sink
            .events_for("rp1")
            .iter()
            .filter_map(|e| e.block_height().map(|h| h.height()))
            .collect();
        assert_eq!(heights, vec![1, 2, 3]);
        assert_eq!(sink.attempt_count(), 5);
    }

    #[tokio::test]
    async fn test_waits_for_callback_url() {
        let sink = Arc::new(MockCallbackSink::unregistered_first(3));
        let dispatcher = Dispatcher::new(sink.clone(), fast_config());

        dispatcher.notify(event("idp1", "a", 1));
        dispatcher.notify(event("idp1", "b", 2));

        wait_for_deliveries(&sink, 2).await;

        let references: Vec<String> = sink
            .events_for("idp1")
            .iter()
            .filter_map(|e| match e {
                CallbackEvent::CreateRequestResult(r) => Some(r.reference_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(references, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(sink.attempt_count(), 5);
    }

    #[tokio::test]
    async fn test_one_worker_per_node() {
        let sink = Arc::new(MockCallbackSink::new());
        let dispatcher = Dispatcher::new(sink.clone(), fast_config());

        dispatcher.notify(event("rp1", "a", 1));
        dispatcher.notify(event("idp1", "a", 1));
        dispatcher.notify(event("rp1", "b", 2));

        wait_for_deliveries(&sink, 3).await;
        assert_eq!(dispatcher.queued_nodes(), 2);
        assert_eq!(sink.events_for("rp1").len(), 2);
        assert_eq!(sink.events_for("idp1").len(), 1);
    }
}
