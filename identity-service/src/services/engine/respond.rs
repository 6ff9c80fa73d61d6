use super::RequestEngine;
use crate::models::{
    AsDataParams, AsDataRecord, CallbackEvent, IdpResponse, IdpResponseParams, NodeRole,
    OperationResult, ResponseStatus,
};
use crate::services::crypto;
use crate::services::error::ServiceError;
use crate::services::metrics;
use chrono::Utc;
use validator::Validate;

impl RequestEngine {
    /// Record an IdP's answer.
    ///
    /// Rejections are checked in a fixed order: unknown request, timed out,
    /// closed, association/accessor, routing (the explicit IdP list, or the
    /// IdPs the request was sent to, in an association supporting its mode),
    /// duplicate, assurance below the request minimum.
    pub async fn submit_idp_response(
        &self,
        idp_id: &str,
        params: IdpResponseParams,
    ) -> Result<(), ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;

        let record = self.record(&params.request_id)?;
        let mut guard = record.lock().await;

        let (valid_signature, valid_ial) = {
            let request = &guard.request;
            if request.timed_out {
                return Err(ServiceError::RequestTimedOut);
            }
            if request.closed {
                return Err(ServiceError::RequestClosed);
            }

            let proof = if request.mode.requires_signature() {
                let code = request
                    .reference_group_code
                    .as_deref()
                    .ok_or(ServiceError::IdentityNotFound)?;
                let group = self
                    .inner
                    .registry
                    .group(code)
                    .await
                    .ok_or(ServiceError::IdentityNotFound)?;
                let association = group
                    .usable_association(idp_id)
                    .ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;
                let accessor = params
                    .accessor_id
                    .as_deref()
                    .and_then(|id| association.live_accessor(id))
                    .ok_or_else(|| {
                        ServiceError::IdpNotAssociated(format!(
                            "{} has no usable accessor {}",
                            idp_id,
                            params.accessor_id.as_deref().unwrap_or_default()
                        ))
                    })?;
                if !association.supports_mode(request.mode) {
                    return Err(ServiceError::IdpNotRequested(idp_id.to_string()));
                }
                Some((
                    accessor.accessor_type,
                    accessor.accessor_public_key.clone(),
                    association.ial,
                ))
            } else {
                None
            };

            let routed_to = if request.idp_id_list.is_empty() {
                &request.notified_idp_list
            } else {
                &request.idp_id_list
            };
            if !routed_to.iter().any(|id| id == idp_id) {
                return Err(ServiceError::IdpNotRequested(idp_id.to_string()));
            }
            if request.response_from(idp_id).is_some() {
                return Err(ServiceError::DuplicateResponse(idp_id.to_string()));
            }
            if params.status == ResponseStatus::Accept
                && (params.ial < request.min_ial || params.aal < request.min_aal)
            {
                return Err(ServiceError::AssuranceTooLow);
            }

            match proof {
                Some((key_type, public_key, registered_ial)) => {
                    let signature = params.signature.as_deref().ok_or_else(|| {
                        ServiceError::InvalidParameter(
                            "signature is required for mode 2 and 3".to_string(),
                        )
                    })?;
                    let valid_signature = crypto::signature_matches(
                        key_type,
                        &public_key,
                        request.request_message_hash.as_bytes(),
                        signature,
                    );
                    let valid_ial = (params.ial - registered_ial).abs() < f64::EPSILON;
                    (Some(valid_signature), Some(valid_ial))
                }
                None => (None, None),
            }
        };

        let height = self.inner.ledger.commit();
        let response = IdpResponse {
            idp_id: idp_id.to_string(),
            ial: params.ial,
            aal: params.aal,
            status: params.status,
            accessor_id: params.accessor_id.clone(),
            signature: params.signature.clone(),
            valid_signature,
            valid_ial,
            block_height: height.clone(),
        };

        if let Ok(message) = serde_json::to_value(&response) {
            self.inner
                .store
                .record_message(idp_id, &params.request_id, message);
        }
        guard.request.responses.push(response);

        metrics::record_idp_response(match params.status {
            ResponseStatus::Accept => "accept",
            ResponseStatus::Reject => "reject",
        });
        tracing::info!(
            request_id = %params.request_id,
            idp_id = %idp_id,
            status = ?params.status,
            valid_signature = ?valid_signature,
            valid_ial = ?valid_ial,
            block_height = %height,
            "IdP response recorded"
        );

        self.emit(CallbackEvent::ResponseResult(OperationResult {
            node_id: idp_id.to_string(),
            reference_id: params.reference_id,
            request_id: params.request_id,
            success: true,
            error: None,
        }));

        self.after_mutation(&mut guard, &height).await;
        Ok(())
    }

    /// Record data an AS sends for one service.
    ///
    /// Two ledger transactions follow: the AS signature (signed count) and
    /// the delivery to the requester (received count). Each fans out status.
    pub async fn submit_as_data(
        &self,
        as_id: &str,
        params: AsDataParams,
    ) -> Result<(), ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(as_id, &[NodeRole::As])?;

        let record = self.record(&params.request_id)?;
        let mut guard = record.lock().await;

        {
            let request = &guard.request;
            if request.timed_out {
                return Err(ServiceError::RequestTimedOut);
            }
            if request.closed {
                return Err(ServiceError::RequestClosed);
            }
            let entry = request
                .service_data
                .iter()
                .find(|s| s.service_id == params.service_id && s.as_id_list.iter().any(|id| id == as_id))
                .ok_or_else(|| ServiceError::NoDataRequest {
                    service_id: params.service_id.clone(),
                    as_id: as_id.to_string(),
                })?;
            if !request.data_requested {
                return Err(ServiceError::ConsentNotSatisfied);
            }
            if entry.signed_as_ids.iter().any(|id| id == as_id) {
                return Err(ServiceError::DuplicateAsData);
            }
            if entry.signed_data_count() >= entry.min_as {
                return Err(ServiceError::ServiceDataSatisfied);
            }
        }

        let signed_height = self.inner.ledger.commit();
        if let Some(entry) = guard.request.service_entry_mut(&params.service_id) {
            entry.signed_as_ids.push(as_id.to_string());
        }
        let message = serde_json::json!({
            "service_id": params.service_id,
            "data": params.data,
            "signature": params.signature,
        });
        self.inner
            .store
            .record_message(as_id, &params.request_id, message);

        self.emit(CallbackEvent::SendDataResult(OperationResult {
            node_id: as_id.to_string(),
            reference_id: params.reference_id.clone(),
            request_id: params.request_id.clone(),
            success: true,
            error: None,
        }));
        self.after_mutation(&mut guard, &signed_height).await;

        let received_height = self.inner.ledger.commit();
        if let Some(entry) = guard.request.service_entry_mut(&params.service_id) {
            entry.received_as_ids.push(as_id.to_string());
        }
        let requester = guard.request.requester_node_id.clone();
        self.inner.store.store_as_data(
            &requester,
            &params.request_id,
            AsDataRecord {
                source_node_id: as_id.to_string(),
                service_id: params.service_id.clone(),
                data: params.data,
                source_signature: params.signature,
                received_utc: Utc::now(),
            },
        );

        metrics::record_as_data(&params.service_id);
        tracing::info!(
            request_id = %params.request_id,
            as_id = %as_id,
            service_id = %params.service_id,
            block_height = %received_height,
            "AS data received"
        );

        self.after_mutation(&mut guard, &received_height).await;
        Ok(())
    }
}
