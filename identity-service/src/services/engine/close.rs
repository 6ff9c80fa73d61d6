use super::{RequestEngine, RequestRecord};
use crate::models::{BlockHeight, CallbackEvent, CloseRequestParams, OperationResult, RequestStatus};
use crate::services::error::ServiceError;
use crate::services::metrics;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CloseReason {
    /// The requester asked for it.
    Requested,
    /// Dissemination grace after completion elapsed.
    Completed,
    TimedOut,
    /// Every consenting IdP answered without enough valid accepts.
    ConsentRefused,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::Requested => "requested",
            CloseReason::Completed => "completed",
            CloseReason::TimedOut => "timed_out",
            CloseReason::ConsentRefused => "consent_refused",
        }
    }

    /// Error reported to the actor of an identity change that never completed.
    fn identity_error(self) -> ServiceError {
        match self {
            CloseReason::TimedOut => ServiceError::RequestTimedOut,
            CloseReason::ConsentRefused => ServiceError::ConsentNotSatisfied,
            CloseReason::Requested | CloseReason::Completed => ServiceError::RequestClosed,
        }
    }
}

fn auto_close_key(request_id: &str) -> String {
    format!("{}:auto-close", request_id)
}

impl RequestEngine {
    /// Close a request early. Only its requester may do so.
    pub async fn close_request(
        &self,
        node_id: &str,
        params: CloseRequestParams,
    ) -> Result<(), ServiceError> {
        params.validate()?;
        let record = self.record(&params.request_id)?;
        let mut guard = record.lock().await;

        if guard.request.requester_node_id != node_id {
            return Err(ServiceError::NotRequester);
        }
        if guard.request.closed {
            return Err(ServiceError::RequestClosed);
        }

        self.close_locked(&mut guard, CloseReason::Requested);

        self.emit(CallbackEvent::CloseRequestResult(OperationResult {
            node_id: node_id.to_string(),
            reference_id: params.reference_id,
            request_id: params.request_id,
            success: true,
            error: None,
        }));
        Ok(())
    }

    /// Mark a request closed in a new ledger transaction and announce it.
    pub(super) fn close_locked(&self, record: &mut RequestRecord, reason: CloseReason) -> BlockHeight {
        let height = self.inner.ledger.commit();
        let request_id = record.request.request_id.clone();

        record.request.closed = true;
        if reason == CloseReason::TimedOut {
            record.request.timed_out = true;
        }
        self.inner.timers.cancel(&request_id);
        self.inner.timers.cancel(&auto_close_key(&request_id));

        self.fan_out_status(record, &height);

        if record.request.purpose.is_identity_change() && !record.completion_handled {
            self.emit_identity_failure(&record.request, &reason.identity_error(), &height);
        }

        metrics::record_request_closed(reason.as_str());
        tracing::info!(
            request_id = %request_id,
            reason = reason.as_str(),
            block_height = %height,
            "Request closed"
        );
        height
    }

    /// Timer callback: a request still open at its deadline times out.
    pub(super) async fn expire(&self, request_id: &str) {
        let Ok(record) = self.record(request_id) else {
            return;
        };
        let mut guard = record.lock().await;
        if guard.request.closed || guard.request.status == RequestStatus::Completed {
            return;
        }
        self.close_locked(&mut guard, CloseReason::TimedOut);
    }

    async fn auto_close(&self, request_id: &str) {
        let Ok(record) = self.record(request_id) else {
            return;
        };
        let mut guard = record.lock().await;
        if guard.request.closed {
            return;
        }
        self.close_locked(&mut guard, CloseReason::Completed);
    }

    pub(super) fn schedule_timeout(&self, request_id: &str, timeout: Duration) {
        let engine = Arc::downgrade(&self.inner);
        let id = request_id.to_string();
        self.inner.timers.schedule(request_id, timeout, async move {
            if let Some(inner) = engine.upgrade() {
                RequestEngine { inner }.expire(&id).await;
            }
        });
    }

    pub(super) fn schedule_auto_close(&self, request_id: &str) {
        let engine = Arc::downgrade(&self.inner);
        let id = request_id.to_string();
        self.inner.timers.schedule(
            auto_close_key(request_id),
            self.inner.config.auto_close_grace(),
            async move {
                if let Some(inner) = engine.upgrade() {
                    RequestEngine { inner }.auto_close(&id).await;
                }
            },
        );
    }
}
