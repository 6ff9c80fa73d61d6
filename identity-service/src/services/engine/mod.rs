//! Request lifecycle engine.
//!
//! Every request lives behind its own `tokio::sync::Mutex`; all mutations of
//! one request are serialized on it while different requests proceed in
//! parallel. Lock order is request, then registry. Each mutation commits one
//! ledger transaction and every event it produces carries that height.

mod close;
mod create;
mod identity;
mod respond;

use crate::config::EngineConfig;
use crate::models::{
    BlockHeight, CallbackEvent, DataRequestEvent, Request, RequestStatus, ServiceStatus,
};
use crate::services::aggregator::{self, Audience, StatusSnapshot};
use crate::services::dispatcher::Dispatcher;
use crate::services::error::ServiceError;
use crate::services::governance::Governance;
use crate::services::ledger::Ledger;
use crate::services::registry::Registry;
use crate::services::store::MessageStore;
use crate::services::timeouts::TimeoutScheduler;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identity consent requests are opened by an IdP, which keeps the IdP view
/// of validity on its own request.
fn requester_audience(request: &Request) -> Audience {
    if request.purpose.is_identity_change() {
        Audience::Idp
    } else {
        Audience::Requester
    }
}

pub(crate) struct RequestRecord {
    request: Request,
    /// Last status view emitted to each node.
    last_status: HashMap<String, StatusSnapshot>,
    completion_handled: bool,
}

impl RequestRecord {
    fn new(request: Request) -> Self {
        Self {
            request,
            last_status: HashMap::new(),
            completion_handled: false,
        }
    }
}

#[derive(Clone)]
pub struct RequestEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    ledger: Ledger,
    governance: Arc<Governance>,
    registry: Registry,
    dispatcher: Dispatcher,
    store: MessageStore,
    requests: DashMap<String, Arc<Mutex<RequestRecord>>>,
    timers: TimeoutScheduler,
}

impl RequestEngine {
    pub fn new(config: EngineConfig, governance: Arc<Governance>, dispatcher: Dispatcher) -> Self {
        let ledger = Ledger::new(config.chain_id.clone());
        tracing::info!(chain_id = %config.chain_id, "Request engine initialized");
        Self {
            inner: Arc::new(EngineInner {
                config,
                ledger,
                governance,
                registry: Registry::new(),
                dispatcher,
                store: MessageStore::new(),
                requests: DashMap::new(),
                timers: TimeoutScheduler::new(),
            }),
        }
    }

    pub fn governance(&self) -> &Governance {
        &self.inner.governance
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn store(&self) -> &MessageStore {
        &self.inner.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.inner.ledger
    }

    /// Snapshot of a stored request.
    pub async fn get_request(&self, request_id: &str) -> Result<Request, ServiceError> {
        let record = self.record(request_id)?;
        let guard = record.lock().await;
        Ok(guard.request.clone())
    }

    pub async fn shutdown(&self) {
        self.inner.timers.cancel_all();
        self.inner.dispatcher.shutdown().await;
    }

    fn record(&self, request_id: &str) -> Result<Arc<Mutex<RequestRecord>>, ServiceError> {
        self.inner
            .requests
            .get(request_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::RequestNotFound(request_id.to_string()))
    }

    fn identifier_limit(&self) -> impl Fn(&str) -> Option<u32> + Send + Sync + 'static {
        let governance = self.inner.governance.clone();
        move |namespace: &str| governance.identifier_limit(namespace)
    }

    /// Record the event as a private message of its destination and queue it.
    fn emit(&self, event: CallbackEvent) {
        if let Some(request_id) = event.request_id() {
            match serde_json::to_value(&event) {
                Ok(message) => self
                    .inner
                    .store
                    .record_message(event.node_id(), request_id, message),
                Err(e) => tracing::warn!(error = %e, "Failed to record private message"),
            }
        }
        self.inner.dispatcher.notify(event);
    }

    /// Emit a status view to every participant whose view changed.
    fn fan_out_status(&self, record: &mut RequestRecord, height: &BlockHeight) {
        let request = &record.request;
        let mut audiences: Vec<(String, Audience)> =
            vec![(request.requester_node_id.clone(), requester_audience(request))];

        let idps = request
            .notified_idp_list
            .iter()
            .chain(request.responses.iter().map(|r| &r.idp_id));
        for idp_id in idps {
            if !audiences.iter().any(|(node, _)| node == idp_id) {
                audiences.push((idp_id.clone(), Audience::Idp));
            }
        }
        if request.data_requested {
            for as_id in request.data_request_targets() {
                if !audiences.iter().any(|(node, _)| *node == as_id) {
                    audiences.push((as_id, Audience::As));
                }
            }
        }

        for (node_id, audience) in audiences {
            let view = aggregator::snapshot(&record.request, audience);
            if record.last_status.get(&node_id) == Some(&view) {
                continue;
            }
            record.last_status.insert(node_id.clone(), view.clone());
            self.emit(view.into_event(&node_id, &record.request, height));
        }
    }

    /// Status to the requester only, used when a request is opened.
    fn emit_initial_status(&self, record: &mut RequestRecord, height: &BlockHeight) {
        let requester = record.request.requester_node_id.clone();
        let view = aggregator::snapshot(&record.request, requester_audience(&record.request));
        record.last_status.insert(requester.clone(), view.clone());
        self.emit(view.into_event(&requester, &record.request, height));
    }

    /// Recompute derived state after a response or data submission.
    async fn after_mutation(&self, record: &mut RequestRecord, height: &BlockHeight) {
        let request = &mut record.request;
        request.status = request.status.max(aggregator::compute_status(request));

        let request_data = !request.data_requested
            && !request.service_data.is_empty()
            && aggregator::idp_threshold_met(request);
        if request_data {
            request.data_requested = true;
            self.send_data_requests(&record.request, height);
        }

        self.fan_out_status(record, height);

        if record.request.status == RequestStatus::Completed && !record.completion_handled {
            self.on_completed(record, height).await;
        } else if record.request.purpose.is_identity_change()
            && !record.request.closed
            && aggregator::consent_exhausted(&record.request)
        {
            self.close_locked(record, close::CloseReason::ConsentRefused);
        }
    }

    fn send_data_requests(&self, request: &Request, height: &BlockHeight) {
        let (max_ial, max_aal) = aggregator::accepted_assurance(request);
        let response_signature_list = aggregator::response_signatures(request);

        for entry in &request.service_data {
            let request_params = request
                .data_request_list
                .iter()
                .find(|d| d.service_id == entry.service_id)
                .and_then(|d| d.request_params.clone());

            for as_id in &entry.as_id_list {
                self.emit(CallbackEvent::DataRequest(DataRequestEvent {
                    node_id: as_id.clone(),
                    request_id: request.request_id.clone(),
                    mode: request.mode,
                    namespace: request.namespace.clone(),
                    identifier: request.identifier.clone(),
                    service_id: entry.service_id.clone(),
                    request_params: request_params.clone(),
                    requester_node_id: request.requester_node_id.clone(),
                    max_ial,
                    max_aal,
                    request_timeout: request.request_timeout,
                    response_signature_list: response_signature_list.clone(),
                    creation_time: request.creation_time,
                    creation_block_height: request.creation_block_height.clone(),
                }));
            }
        }

        tracing::info!(
            request_id = %request.request_id,
            block_height = %height,
            "Data requested from AS nodes"
        );
    }

    async fn on_completed(&self, record: &mut RequestRecord, height: &BlockHeight) {
        record.completion_handled = true;
        self.inner.timers.cancel(&record.request.request_id);

        tracing::info!(
            request_id = %record.request.request_id,
            purpose = %record.request.purpose,
            block_height = %height,
            "Request completed"
        );

        if record.request.purpose.is_identity_change() {
            self.finish_identity_change(record, height).await;
        }
        self.schedule_auto_close(&record.request.request_id);
    }

    /// Per-service counters of a stored request.
    pub async fn service_status(&self, request_id: &str) -> Result<Vec<ServiceStatus>, ServiceError> {
        let record = self.record(request_id)?;
        let guard = record.lock().await;
        Ok(aggregator::service_list(&guard.request))
    }
}
