use super::{RequestEngine, RequestRecord};
use crate::models::{
    CallbackEvent, CreateRequestAccepted, CreateRequestParams, CreateRequestResult, DataRequest,
    Identity, IdentityChange, IdentityResult, IdentityStage, IncomingRequest, NodeRole,
    ReferenceGroup, Request, RequestMode, RequestPurpose, RequestStatus, ServiceDataEntry,
};
use crate::services::crypto;
use crate::services::error::ServiceError;
use crate::services::metrics;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use validator::Validate;

/// A validated request ready to be committed.
pub(super) struct NewRequest {
    pub purpose: RequestPurpose,
    pub mode: RequestMode,
    pub requester_node_id: String,
    pub reference_id: String,
    pub identity: Option<Identity>,
    pub reference_group_code: Option<String>,
    pub idp_id_list: Vec<String>,
    pub notified_idp_list: Vec<String>,
    pub data_request_list: Vec<DataRequest>,
    pub service_data: Vec<ServiceDataEntry>,
    pub request_message: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub min_idp: u32,
    pub request_timeout: u64,
    pub identity_change: Option<IdentityChange>,
}

impl RequestEngine {
    /// Open a verification request on behalf of an RP.
    ///
    /// Every check runs before the ledger commit, so a rejected call leaves no
    /// trace. On success the requester receives `create_request_result` and
    /// an initial `request_status`; each relevant IdP receives
    /// `incoming_request`.
    pub async fn create_request(
        &self,
        requester_id: &str,
        params: CreateRequestParams,
    ) -> Result<CreateRequestAccepted, ServiceError> {
        params.validate()?;
        let governance = &self.inner.governance;
        governance.require_node(requester_id, &[NodeRole::Rp])?;

        let (identity, group, notified) = match params.mode {
            RequestMode::One => {
                if params.idp_id_list.is_empty() {
                    return Err(ServiceError::InvalidParameter(
                        "idp_id_list is required for mode 1".to_string(),
                    ));
                }
                let mut notified: Vec<String> = Vec::new();
                for idp_id in &params.idp_id_list {
                    let node = governance.require_node(idp_id, &[NodeRole::Idp])?;
                    let capable = node.max_ial.unwrap_or(0.0) >= params.min_ial
                        && node.max_aal.unwrap_or(0.0) >= params.min_aal;
                    if capable && !notified.contains(idp_id) {
                        notified.push(idp_id.clone());
                    }
                }
                (None, None, notified)
            }
            mode => {
                let identity = match (&params.namespace, &params.identifier) {
                    (Some(namespace), Some(identifier))
                        if !namespace.is_empty() && !identifier.is_empty() =>
                    {
                        Identity::new(namespace.clone(), identifier.clone())
                    }
                    _ => {
                        return Err(ServiceError::InvalidParameter(
                            "namespace and identifier are required for mode 2 and 3".to_string(),
                        ))
                    }
                };
                governance.require_active_namespace(&identity.namespace)?;
                let group = self
                    .inner
                    .registry
                    .find_group(&identity)
                    .await
                    .ok_or(ServiceError::IdentityNotFound)?;
                let notified = self.relevant_idps(
                    &group,
                    mode,
                    params.min_ial,
                    params.min_aal,
                    &params.idp_id_list,
                )?;
                (Some(identity), Some(group), notified)
            }
        };

        if notified.len() < params.min_idp as usize {
            return Err(ServiceError::NotEnoughIdps {
                found: notified.len(),
                required: params.min_idp,
            });
        }

        let (data_request_list, service_data) =
            self.resolve_data_requests(&params.data_request_list, params.min_ial, params.min_aal)?;

        let accepted = self
            .open_request(NewRequest {
                purpose: RequestPurpose::Verify,
                mode: params.mode,
                requester_node_id: requester_id.to_string(),
                reference_id: params.reference_id,
                identity,
                reference_group_code: group.map(|g| g.reference_group_code),
                idp_id_list: params.idp_id_list,
                notified_idp_list: notified,
                data_request_list,
                service_data,
                request_message: params.request_message,
                min_ial: params.min_ial,
                min_aal: params.min_aal,
                min_idp: params.min_idp,
                request_timeout: params.request_timeout,
                identity_change: None,
            })
            .await;

        Ok(accepted)
    }

    /// IdPs that may answer a mode 2/3 request. Explicitly listed IdPs must be
    /// usably associated with the group.
    fn relevant_idps(
        &self,
        group: &ReferenceGroup,
        mode: RequestMode,
        min_ial: f64,
        min_aal: f64,
        explicit: &[String],
    ) -> Result<Vec<String>, ServiceError> {
        for idp_id in explicit {
            if group.usable_association(idp_id).is_none() {
                return Err(ServiceError::IdpNotAssociated(idp_id.clone()));
            }
        }

        let governance = &self.inner.governance;
        let candidates: Vec<String> = group
            .idps
            .values()
            .filter(|a| a.is_usable() && a.supports_mode(mode) && a.ial >= min_ial)
            .filter(|a| {
                governance
                    .get_node(&a.idp_id)
                    .map(|node| node.active && node.max_aal.unwrap_or(0.0) >= min_aal)
                    .unwrap_or(false)
            })
            .map(|a| a.idp_id.clone())
            .collect();

        if explicit.is_empty() {
            return Ok(candidates);
        }

        let mut relevant: Vec<String> = Vec::new();
        for idp_id in explicit {
            if candidates.contains(idp_id) && !relevant.contains(idp_id) {
                relevant.push(idp_id.clone());
            }
        }
        Ok(relevant)
    }

    /// Resolve each data request to the ASes that will be asked for data.
    fn resolve_data_requests(
        &self,
        requested: &[DataRequest],
        min_ial: f64,
        min_aal: f64,
    ) -> Result<(Vec<DataRequest>, Vec<ServiceDataEntry>), ServiceError> {
        let governance = &self.inner.governance;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut resolved = Vec::with_capacity(requested.len());
        let mut entries = Vec::with_capacity(requested.len());

        for data_request in requested {
            if !seen.insert(data_request.service_id.as_str()) {
                return Err(ServiceError::InvalidDataRequest(format!(
                    "service {} requested twice",
                    data_request.service_id
                )));
            }
            governance.get_service(&data_request.service_id)?;

            let offers = governance.as_services_for(&data_request.service_id);
            let eligible: Vec<String> = offers
                .iter()
                .filter(|offer| offer.min_ial <= min_ial && offer.min_aal <= min_aal)
                .map(|offer| offer.as_id.clone())
                .collect();

            let targets: Vec<String> = if data_request.as_id_list.is_empty() {
                eligible
            } else {
                let mut targets = Vec::new();
                for as_id in &data_request.as_id_list {
                    if !offers.iter().any(|offer| &offer.as_id == as_id) {
                        return Err(ServiceError::ServiceNotFound(format!(
                            "{} does not offer {}",
                            as_id, data_request.service_id
                        )));
                    }
                    if eligible.contains(as_id) && !targets.contains(as_id) {
                        targets.push(as_id.clone());
                    }
                }
                targets
            };

            if data_request.min_as as usize > targets.len() {
                return Err(ServiceError::InvalidDataRequest(format!(
                    "min_as {} exceeds the {} AS available for {}",
                    data_request.min_as,
                    targets.len(),
                    data_request.service_id
                )));
            }

            resolved.push(DataRequest {
                as_id_list: targets.clone(),
                ..data_request.clone()
            });
            entries.push(ServiceDataEntry {
                service_id: data_request.service_id.clone(),
                min_as: data_request.min_as,
                as_id_list: targets,
                signed_as_ids: Vec::new(),
                received_as_ids: Vec::new(),
            });
        }

        Ok((resolved, entries))
    }

    /// Commit a validated request and announce it.
    pub(super) async fn open_request(&self, new: NewRequest) -> CreateRequestAccepted {
        let request_id = crypto::generate_request_id();
        let initial_salt = crypto::generate_salt();
        let request_message_salt =
            crypto::derive_salt(&initial_salt, &request_id, "request_message");
        let request_message_hash = crypto::hash_message(&new.request_message, &request_message_salt);
        let height = self.inner.ledger.commit();

        let (namespace, identifier) = match new.identity {
            Some(identity) => (Some(identity.namespace), Some(identity.identifier)),
            None => (None, None),
        };

        let request = Request {
            request_id: request_id.clone(),
            purpose: new.purpose,
            mode: new.mode,
            requester_node_id: new.requester_node_id,
            reference_id: new.reference_id,
            namespace,
            identifier,
            reference_group_code: new.reference_group_code,
            min_idp: new.min_idp,
            min_ial: new.min_ial,
            min_aal: new.min_aal,
            request_timeout: new.request_timeout,
            idp_id_list: new.idp_id_list,
            notified_idp_list: new.notified_idp_list,
            data_request_list: new.data_request_list,
            request_message: new.request_message,
            initial_salt: initial_salt.clone(),
            request_message_salt,
            request_message_hash,
            creation_time: Utc::now().timestamp_millis(),
            creation_block_height: height.clone(),
            status: RequestStatus::Pending,
            closed: false,
            timed_out: false,
            responses: Vec::new(),
            service_data: new.service_data,
            data_requested: false,
            identity_change: new.identity_change,
        };

        let record = Arc::new(Mutex::new(RequestRecord::new(request)));
        self.inner
            .requests
            .insert(request_id.clone(), record.clone());
        let mut guard = record.lock().await;
        let request = &guard.request;

        if request.purpose == RequestPurpose::Verify {
            self.emit(CallbackEvent::CreateRequestResult(CreateRequestResult {
                node_id: request.requester_node_id.clone(),
                reference_id: request.reference_id.clone(),
                request_id: request_id.clone(),
                success: true,
                creation_block_height: height.clone(),
            }));
        } else {
            let body = IdentityResult {
                node_id: request.requester_node_id.clone(),
                reference_id: request.reference_id.clone(),
                request_id: Some(request_id.clone()),
                success: true,
                error: None,
                creation_block_height: Some(height.clone()),
                accessor_id: request
                    .identity_change
                    .as_ref()
                    .and_then(super::identity::change_accessor_id),
                reference_group_code: request.reference_group_code.clone(),
            };
            if let Some(event) =
                CallbackEvent::identity_result(request.purpose, IdentityStage::Requested, body)
            {
                self.emit(event);
            }
        }

        for idp_id in &request.notified_idp_list {
            self.emit(CallbackEvent::IncomingRequest(IncomingRequest {
                node_id: idp_id.clone(),
                mode: request.mode,
                request_id: request_id.clone(),
                reference_group_code: request.reference_group_code.clone(),
                request_message: request.request_message.clone(),
                request_message_hash: request.request_message_hash.clone(),
                request_message_salt: request.request_message_salt.clone(),
                requester_node_id: request.requester_node_id.clone(),
                min_ial: request.min_ial,
                min_aal: request.min_aal,
                data_request_list: request.data_request_list.clone(),
                request_timeout: request.request_timeout,
                creation_time: request.creation_time,
                creation_block_height: height.clone(),
                purpose: request
                    .purpose
                    .is_identity_change()
                    .then_some(request.purpose),
            }));
        }

        metrics::record_request_created(request.purpose.as_str(), request.mode.as_u8());
        tracing::info!(
            request_id = %request_id,
            requester = %request.requester_node_id,
            purpose = %request.purpose,
            mode = %request.mode,
            idp_count = request.notified_idp_list.len(),
            block_height = %height,
            "Request created"
        );

        let timeout = Duration::from_secs(request.request_timeout);
        self.emit_initial_status(&mut guard, &height);
        drop(guard);

        self.schedule_timeout(&request_id, timeout);

        CreateRequestAccepted {
            request_id,
            initial_salt,
        }
    }
}
