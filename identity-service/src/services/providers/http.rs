use super::{CallbackDirectory, CallbackError, CallbackSink};
use crate::models::CallbackEvent;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use service_core::observability::inject_trace_headers;
use std::sync::Arc;
use std::time::Duration;

/// POSTs events as JSON to the callback URL the destination node registered.
pub struct HttpCallbackSink {
    directory: Arc<dyn CallbackDirectory>,
    client: Client,
}

impl HttpCallbackSink {
    pub fn new(directory: Arc<dyn CallbackDirectory>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build callback client: {}", e))?;
        Ok(Self { directory, client })
    }
}

#[async_trait]
impl CallbackSink for HttpCallbackSink {
    async fn deliver(&self, event: &CallbackEvent) -> Result<(), CallbackError> {
        let node_id = event.node_id();
        let url = self
            .directory
            .callback_url(node_id)
            .ok_or_else(|| CallbackError::NoCallbackUrl(node_id.to_string()))?;

        let body =
            serde_json::to_vec(event).map_err(|e| CallbackError::Serialization(e.to_string()))?;

        let mut headers = HeaderMap::new();
        inject_trace_headers(&mut headers, event.request_id());

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| CallbackError::Connection(format!("{}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(CallbackError::Rejected {
                status: response.status().as_u16(),
            });
        }

        tracing::debug!(
            node_id = %node_id,
            event_type = event.kind(),
            "Callback delivered"
        );

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
