//! Identity operations.
//!
//! A change either applies at once or, when the acting IdP operates in mode 3
//! and the group already has usable mode-3 associations, waits behind a
//! consent request routed to those IdPs.

use super::create::NewRequest;
use super::{RequestEngine, RequestRecord};
use crate::models::{
    Accessor, AccessorOwner, AddAccessorParams, AddIdentityParams, BlockHeight, CallbackEvent,
    CreateIdentityParams, Identity, IdentityAction, IdentityChange, IdentityInfo,
    IdentityModificationNotification, IdentityOperationAccepted, IdentityResult, IdentityStage,
    IdentityTargetParams, IdpAssociation, KeyType, NodeRole, ReferenceGroup, RelevantIdp,
    Request, RequestMode, RequestPurpose, RevokeAccessorParams,
};
use crate::services::crypto;
use crate::services::error::ServiceError;
use crate::services::metrics;
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

const CONSENT_MIN_IAL: f64 = 1.1;
const CONSENT_MIN_AAL: f64 = 1.0;

/// Accessor an identity change creates or revokes.
pub(super) fn change_accessor_id(change: &IdentityChange) -> Option<String> {
    match change {
        IdentityChange::CreateIdentity { association, .. } => association
            .accessors
            .first()
            .map(|a| a.accessor_id.clone()),
        IdentityChange::AddAccessor { accessor } => Some(accessor.accessor_id.clone()),
        IdentityChange::RevokeAccessor { accessor_id } => Some(accessor_id.clone()),
        _ => None,
    }
}

fn new_accessor(
    idp_id: &str,
    accessor_type: KeyType,
    public_key: &str,
    accessor_id: Option<String>,
) -> Result<Accessor, ServiceError> {
    crypto::verifier_for(accessor_type)
        .validate_public_key(public_key)
        .map_err(|e| ServiceError::InvalidAccessorKey(e.to_string()))?;

    Ok(Accessor {
        accessor_id: accessor_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        accessor_type,
        accessor_public_key: public_key.to_string(),
        idp_id: idp_id.to_string(),
        revoked: false,
    })
}

/// A change on its way through `start_identity_change`.
struct PendingChange {
    actor: String,
    reference_id: String,
    target: Identity,
    group: ReferenceGroup,
    change: IdentityChange,
    request_message: Option<String>,
    /// The operation itself puts the actor in mode 3.
    enters_mode3: bool,
}

impl RequestEngine {
    pub async fn create_identity(
        &self,
        idp_id: &str,
        params: CreateIdentityParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;

        let mode_list: BTreeSet<u8> = match params.mode {
            RequestMode::One => {
                return Err(ServiceError::InvalidParameter(
                    "identities are created in mode 2 or 3".to_string(),
                ))
            }
            RequestMode::Two => [2].into_iter().collect(),
            RequestMode::Three => [2, 3].into_iter().collect(),
        };
        for identity in &params.identity_list {
            self.inner
                .governance
                .require_active_namespace(&identity.namespace)?;
        }

        let accessor = new_accessor(
            idp_id,
            params.accessor_type,
            &params.accessor_public_key,
            params.accessor_id,
        )?;
        let accessor_id = accessor.accessor_id.clone();
        let association = IdpAssociation {
            idp_id: idp_id.to_string(),
            mode_list,
            ial: params.ial,
            lial: params.lial,
            laal: params.laal,
            active: true,
            accessors: vec![accessor],
        };

        let identities = params.identity_list;
        let existing = self.inner.registry.resolve(&identities).await?;

        let Some(group) = existing else {
            let limit = self.identifier_limit();
            let code = self
                .inner
                .registry
                .onboard(&identities, association, &limit)
                .await?;
            let height = self.inner.ledger.commit();

            metrics::record_identity_change(RequestPurpose::CreateIdentity.as_str(), false);
            self.emit_identity_success(
                idp_id,
                &params.reference_id,
                RequestPurpose::CreateIdentity,
                None,
                Some(accessor_id.clone()),
                &code,
                &height,
            );
            return Ok(IdentityOperationAccepted {
                request_id: None,
                accessor_id: Some(accessor_id),
                reference_group_code: Some(code),
                exist: false,
            });
        };

        let target = identities
            .iter()
            .find(|i| group.identities.contains(*i))
            .cloned()
            .ok_or(ServiceError::IdentityNotFound)?;
        let code = group.reference_group_code.clone();
        let request_id = self
            .start_identity_change(PendingChange {
                actor: idp_id.to_string(),
                reference_id: params.reference_id,
                target,
                group,
                change: IdentityChange::CreateIdentity {
                    association,
                    identities,
                },
                request_message: params.request_message,
                enters_mode3: params.mode == RequestMode::Three,
            })
            .await?;

        Ok(IdentityOperationAccepted {
            request_id,
            accessor_id: Some(accessor_id),
            reference_group_code: Some(code),
            exist: true,
        })
    }

    pub async fn add_identity(
        &self,
        idp_id: &str,
        params: AddIdentityParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;
        for identity in &params.identity_list {
            self.inner
                .governance
                .require_active_namespace(&identity.namespace)?;
        }

        let (target, group) = self
            .target_group(&params.namespace, &params.identifier)
            .await?;
        let code = group.reference_group_code.clone();
        let request_id = self
            .start_identity_change(PendingChange {
                actor: idp_id.to_string(),
                reference_id: params.reference_id,
                target,
                group,
                change: IdentityChange::AddIdentity {
                    identities: params.identity_list,
                },
                request_message: params.request_message,
                enters_mode3: false,
            })
            .await?;

        Ok(IdentityOperationAccepted {
            request_id,
            accessor_id: None,
            reference_group_code: Some(code),
            exist: true,
        })
    }

    pub async fn add_accessor(
        &self,
        idp_id: &str,
        params: AddAccessorParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;

        let accessor = new_accessor(
            idp_id,
            params.accessor_type,
            &params.accessor_public_key,
            params.accessor_id,
        )?;
        let accessor_id = accessor.accessor_id.clone();

        let (target, group) = self
            .target_group(&params.namespace, &params.identifier)
            .await?;
        let code = group.reference_group_code.clone();
        let request_id = self
            .start_identity_change(PendingChange {
                actor: idp_id.to_string(),
                reference_id: params.reference_id,
                target,
                group,
                change: IdentityChange::AddAccessor { accessor },
                request_message: params.request_message,
                enters_mode3: false,
            })
            .await?;

        Ok(IdentityOperationAccepted {
            request_id,
            accessor_id: Some(accessor_id),
            reference_group_code: Some(code),
            exist: true,
        })
    }

    pub async fn revoke_accessor(
        &self,
        idp_id: &str,
        params: RevokeAccessorParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;

        let owner = self.get_accessor_owner(&params.accessor_id).await?;
        if owner.idp_id != idp_id {
            return Err(ServiceError::AccessorNotFound(params.accessor_id));
        }

        let (target, group) = self
            .target_group(&params.namespace, &params.identifier)
            .await?;
        if owner.reference_group_code != group.reference_group_code {
            return Err(ServiceError::AccessorNotFound(params.accessor_id));
        }
        let code = group.reference_group_code.clone();
        let request_id = self
            .start_identity_change(PendingChange {
                actor: idp_id.to_string(),
                reference_id: params.reference_id,
                target,
                group,
                change: IdentityChange::RevokeAccessor {
                    accessor_id: params.accessor_id.clone(),
                },
                request_message: params.request_message,
                enters_mode3: false,
            })
            .await?;

        Ok(IdentityOperationAccepted {
            request_id,
            accessor_id: Some(params.accessor_id),
            reference_group_code: Some(code),
            exist: true,
        })
    }

    pub async fn upgrade_identity_mode(
        &self,
        idp_id: &str,
        params: IdentityTargetParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        self.target_change(idp_id, params, IdentityChange::UpgradeIdentityMode, true)
            .await
    }

    pub async fn revoke_identity_association(
        &self,
        idp_id: &str,
        params: IdentityTargetParams,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        self.target_change(idp_id, params, IdentityChange::RevokeIdentityAssociation, false)
            .await
    }

    async fn target_change(
        &self,
        idp_id: &str,
        params: IdentityTargetParams,
        change: IdentityChange,
        enters_mode3: bool,
    ) -> Result<IdentityOperationAccepted, ServiceError> {
        params.validate()?;
        self.inner
            .governance
            .require_node(idp_id, &[NodeRole::Idp])?;

        let (target, group) = self
            .target_group(&params.namespace, &params.identifier)
            .await?;
        let code = group.reference_group_code.clone();
        let request_id = self
            .start_identity_change(PendingChange {
                actor: idp_id.to_string(),
                reference_id: params.reference_id,
                target,
                group,
                change,
                request_message: params.request_message,
                enters_mode3,
            })
            .await?;

        Ok(IdentityOperationAccepted {
            request_id,
            accessor_id: None,
            reference_group_code: Some(code),
            exist: true,
        })
    }

    async fn target_group(
        &self,
        namespace: &str,
        identifier: &str,
    ) -> Result<(Identity, ReferenceGroup), ServiceError> {
        if namespace.is_empty() || identifier.is_empty() {
            return Err(ServiceError::InvalidParameter(
                "namespace and identifier are required".to_string(),
            ));
        }
        let identity = Identity::new(namespace, identifier);
        let group = self
            .inner
            .registry
            .find_group(&identity)
            .await
            .ok_or(ServiceError::IdentityNotFound)?;
        Ok((identity, group))
    }

    /// Validate a change, then apply it or open its consent request.
    /// Returns the consent request id when one was opened.
    async fn start_identity_change(
        &self,
        pending: PendingChange,
    ) -> Result<Option<String>, ServiceError> {
        let PendingChange {
            actor,
            reference_id,
            target,
            group,
            change,
            request_message,
            enters_mode3,
        } = pending;
        let code = group.reference_group_code.clone();
        let purpose = RequestPurpose::from(&change);
        let limit = self.identifier_limit();

        self.inner
            .registry
            .check_change(&code, &actor, &change, &limit)
            .await?;

        let actor_in_mode3 = enters_mode3
            || group
                .idps
                .get(&actor)
                .map(|a| a.active && a.mode_list.contains(&3))
                .unwrap_or(false);
        let consenting = group.usable_mode3_idps();
        let needs_consent = actor_in_mode3 && !consenting.is_empty();
        metrics::record_identity_change(purpose.as_str(), needs_consent);

        if !needs_consent {
            let updated = self
                .inner
                .registry
                .apply_change(&code, &actor, &change, &limit)
                .await?;
            let height = self.inner.ledger.commit();
            self.emit_identity_success(
                &actor,
                &reference_id,
                purpose,
                None,
                change_accessor_id(&change),
                &code,
                &height,
            );
            self.notify_modification(&updated, &actor, purpose);
            return Ok(None);
        }

        tracing::info!(
            actor = %actor,
            purpose = %purpose,
            reference_group_code = %code,
            consenting_idps = consenting.len(),
            "Identity change awaits consent"
        );

        let request_message = request_message
            .unwrap_or_else(|| format!("{} for reference group {}", purpose, code));
        let accepted = self
            .open_request(NewRequest {
                purpose,
                mode: RequestMode::Two,
                requester_node_id: actor,
                reference_id,
                identity: Some(target),
                reference_group_code: Some(code),
                idp_id_list: Vec::new(),
                notified_idp_list: consenting,
                data_request_list: Vec::new(),
                service_data: Vec::new(),
                request_message,
                min_ial: CONSENT_MIN_IAL,
                min_aal: CONSENT_MIN_AAL,
                min_idp: 1,
                request_timeout: self.inner.config.identity_request_timeout_secs,
                identity_change: Some(change),
            })
            .await;
        Ok(Some(accepted.request_id))
    }

    /// Apply the change carried by a completed consent request.
    pub(super) async fn finish_identity_change(
        &self,
        record: &mut RequestRecord,
        height: &BlockHeight,
    ) {
        let request = &record.request;
        let (Some(code), Some(change)) = (
            request.reference_group_code.as_deref(),
            request.identity_change.as_ref(),
        ) else {
            tracing::error!(
                request_id = %request.request_id,
                "Identity request carries no change"
            );
            return;
        };

        let limit = self.identifier_limit();
        let applied = self
            .inner
            .registry
            .apply_change(code, &request.requester_node_id, change, &limit)
            .await;

        match applied {
            Ok(group) => {
                self.emit_identity_success(
                    &request.requester_node_id,
                    &request.reference_id,
                    request.purpose,
                    Some(request.request_id.clone()),
                    change_accessor_id(change),
                    code,
                    height,
                );
                self.notify_modification(&group, &request.requester_node_id, request.purpose);
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Consented identity change no longer applies"
                );
                self.emit_identity_failure(request, &e, height);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_identity_success(
        &self,
        actor: &str,
        reference_id: &str,
        purpose: RequestPurpose,
        request_id: Option<String>,
        accessor_id: Option<String>,
        reference_group_code: &str,
        height: &BlockHeight,
    ) {
        let body = IdentityResult {
            node_id: actor.to_string(),
            reference_id: reference_id.to_string(),
            request_id,
            success: true,
            error: None,
            creation_block_height: Some(height.clone()),
            accessor_id,
            reference_group_code: Some(reference_group_code.to_string()),
        };
        if let Some(event) = CallbackEvent::identity_result(purpose, IdentityStage::Finished, body) {
            self.emit(event);
        }
    }

    pub(super) fn emit_identity_failure(
        &self,
        request: &Request,
        error: &ServiceError,
        height: &BlockHeight,
    ) {
        let body = IdentityResult {
            node_id: request.requester_node_id.clone(),
            reference_id: request.reference_id.clone(),
            request_id: Some(request.request_id.clone()),
            success: false,
            error: Some(error.to_body()),
            creation_block_height: Some(height.clone()),
            accessor_id: request.identity_change.as_ref().and_then(change_accessor_id),
            reference_group_code: request.reference_group_code.clone(),
        };
        if let Some(event) =
            CallbackEvent::identity_result(request.purpose, IdentityStage::Finished, body)
        {
            self.emit(event);
        }
    }

    fn notify_modification(&self, group: &ReferenceGroup, actor: &str, purpose: RequestPurpose) {
        let Some(action) = IdentityAction::from_purpose(purpose) else {
            return;
        };
        for idp_id in group.other_active_idps(actor) {
            self.emit(CallbackEvent::IdentityModificationNotification(
                IdentityModificationNotification {
                    node_id: idp_id,
                    reference_group_code: group.reference_group_code.clone(),
                    action,
                    actor_node_id: actor.to_string(),
                },
            ));
        }
    }

    /// The calling IdP's association with the identity's group.
    pub async fn get_identity_info(
        &self,
        idp_id: &str,
        identity: &Identity,
    ) -> Result<IdentityInfo, ServiceError> {
        let group = self.get_reference_group(identity).await?;
        let association = group
            .idps
            .get(idp_id)
            .filter(|a| a.active)
            .ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;

        Ok(IdentityInfo {
            reference_group_code: group.reference_group_code.clone(),
            ial: association.ial,
            mode_list: association.mode_list.clone(),
            lial: association.lial,
            laal: association.laal,
            active: association.active,
            accessors: association.accessors.clone(),
        })
    }

    /// IdPs able to answer a request about `identity` at the given assurance.
    pub async fn get_relevant_idps(
        &self,
        identity: &Identity,
        min_ial: f64,
        min_aal: f64,
        mode: Option<RequestMode>,
    ) -> Result<Vec<RelevantIdp>, ServiceError> {
        let group = self.get_reference_group(identity).await?;
        let governance = &self.inner.governance;

        let relevant = group
            .idps
            .values()
            .filter(|a| a.is_usable() && a.ial >= min_ial)
            .filter(|a| mode.map_or(true, |m| a.supports_mode(m)))
            .filter_map(|a| {
                let node = governance.get_node(&a.idp_id).ok()?;
                let max_aal = node.max_aal.unwrap_or(0.0);
                (node.active && max_aal >= min_aal).then(|| RelevantIdp {
                    node_id: node.node_id,
                    node_name: node.node_name,
                    ial: a.ial,
                    max_aal,
                    mode_list: a.mode_list.clone(),
                })
            })
            .collect();
        Ok(relevant)
    }

    pub async fn get_accessor_owner(&self, accessor_id: &str) -> Result<AccessorOwner, ServiceError> {
        self.inner
            .registry
            .accessor_owner(accessor_id)
            .await
            .ok_or_else(|| ServiceError::AccessorNotFound(accessor_id.to_string()))
    }

    pub async fn get_reference_group(
        &self,
        identity: &Identity,
    ) -> Result<ReferenceGroup, ServiceError> {
        self.inner
            .registry
            .find_group(identity)
            .await
            .ok_or(ServiceError::IdentityNotFound)
    }
}
