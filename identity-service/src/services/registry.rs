//! Identity & accessor registry.
//!
//! Reference groups are keyed by their code with a `(namespace, identifier)`
//! index and an accessor index on the side. Every identity mutation goes
//! through `check_change` before `apply_change`, so a consent request can be
//! validated when it is opened and again when it completes.

use crate::models::{Accessor, AccessorOwner, Identity, IdentityChange, IdpAssociation, ReferenceGroup};
use crate::services::error::ServiceError;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Namespace -> allowed identifier count in one reference group.
pub type IdentifierLimit<'a> = &'a (dyn Fn(&str) -> Option<u32> + Send + Sync);

#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    groups: HashMap<String, ReferenceGroup>,
    index: HashMap<Identity, String>,
    accessors: HashMap<String, AccessorOwner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn find_group(&self, identity: &Identity) -> Option<ReferenceGroup> {
        let state = self.state.read().await;
        state
            .index
            .get(identity)
            .and_then(|code| state.groups.get(code))
            .cloned()
    }

    pub async fn group(&self, reference_group_code: &str) -> Option<ReferenceGroup> {
        self.state
            .read()
            .await
            .groups
            .get(reference_group_code)
            .cloned()
    }

    /// The single group any of `identities` already belongs to.
    pub async fn resolve(
        &self,
        identities: &[Identity],
    ) -> Result<Option<ReferenceGroup>, ServiceError> {
        let state = self.state.read().await;
        let mut found: Option<&String> = None;
        for identity in identities {
            if let Some(code) = state.index.get(identity) {
                match found {
                    Some(existing) if existing != code => {
                        return Err(ServiceError::IdentityMismatch(
                            "identities belong to different reference groups".to_string(),
                        ));
                    }
                    _ => found = Some(code),
                }
            }
        }
        Ok(found.and_then(|code| state.groups.get(code)).cloned())
    }

    pub async fn accessor_owner(&self, accessor_id: &str) -> Option<AccessorOwner> {
        self.state.read().await.accessors.get(accessor_id).cloned()
    }

    /// Create a new reference group for identities nobody holds yet.
    pub async fn onboard(
        &self,
        identities: &[Identity],
        association: IdpAssociation,
        limit: IdentifierLimit<'_>,
    ) -> Result<String, ServiceError> {
        let mut state = self.state.write().await;

        if identities.iter().any(|i| state.index.contains_key(i)) {
            return Err(ServiceError::IdentityMismatch(
                "identity already belongs to a reference group".to_string(),
            ));
        }
        for accessor in &association.accessors {
            if state.accessors.contains_key(&accessor.accessor_id) {
                return Err(ServiceError::InvalidParameter(format!(
                    "accessor_id {} is already in use",
                    accessor.accessor_id
                )));
            }
        }

        let code = Uuid::new_v4().to_string();
        let mut group = ReferenceGroup {
            reference_group_code: code.clone(),
            identities: identities.iter().cloned().collect(),
            idps: BTreeMap::new(),
        };
        check_identifier_limits(&group, limit)?;

        for accessor in &association.accessors {
            state.accessors.insert(
                accessor.accessor_id.clone(),
                AccessorOwner {
                    idp_id: association.idp_id.clone(),
                    reference_group_code: code.clone(),
                },
            );
        }
        for identity in identities {
            state.index.insert(identity.clone(), code.clone());
        }
        group
            .idps
            .insert(association.idp_id.clone(), association);
        state.groups.insert(code.clone(), group);

        tracing::info!(reference_group_code = %code, "Reference group created");
        Ok(code)
    }

    pub async fn check_change(
        &self,
        reference_group_code: &str,
        idp_id: &str,
        change: &IdentityChange,
        limit: IdentifierLimit<'_>,
    ) -> Result<(), ServiceError> {
        let state = self.state.read().await;
        state.check(reference_group_code, idp_id, change, limit)
    }

    pub async fn apply_change(
        &self,
        reference_group_code: &str,
        idp_id: &str,
        change: &IdentityChange,
        limit: IdentifierLimit<'_>,
    ) -> Result<ReferenceGroup, ServiceError> {
        let mut state = self.state.write().await;
        state.check(reference_group_code, idp_id, change, limit)?;
        let group = state.apply(reference_group_code, idp_id, change);

        tracing::info!(
            reference_group_code = %reference_group_code,
            idp_id = %idp_id,
            "Identity change applied"
        );
        Ok(group)
    }
}

impl RegistryState {
    fn group(&self, code: &str) -> Result<&ReferenceGroup, ServiceError> {
        self.groups.get(code).ok_or(ServiceError::IdentityNotFound)
    }

    fn check_new_identities(
        &self,
        group: &ReferenceGroup,
        identities: &[Identity],
        limit: IdentifierLimit<'_>,
    ) -> Result<(), ServiceError> {
        let mut candidate = group.clone();
        for identity in identities {
            match self.index.get(identity) {
                Some(code) if *code != group.reference_group_code => {
                    return Err(ServiceError::IdentityMismatch(format!(
                        "{}/{} belongs to another reference group",
                        identity.namespace, identity.identifier
                    )));
                }
                _ => {
                    candidate.identities.insert(identity.clone());
                }
            }
        }
        check_identifier_limits(&candidate, limit)
    }

    fn check(
        &self,
        code: &str,
        idp_id: &str,
        change: &IdentityChange,
        limit: IdentifierLimit<'_>,
    ) -> Result<(), ServiceError> {
        let group = self.group(code)?;
        let association = group.idps.get(idp_id).filter(|a| a.active);

        match change {
            IdentityChange::CreateIdentity {
                association: new_association,
                identities,
            } => {
                if association.is_some() {
                    return Err(ServiceError::IdentityAlreadyOnboarded);
                }
                for accessor in &new_association.accessors {
                    if self.accessors.contains_key(&accessor.accessor_id) {
                        return Err(ServiceError::InvalidParameter(format!(
                            "accessor_id {} is already in use",
                            accessor.accessor_id
                        )));
                    }
                }
                self.check_new_identities(group, identities, limit)
            }
            IdentityChange::AddIdentity { identities } => {
                association.ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;
                self.check_new_identities(group, identities, limit)
            }
            IdentityChange::AddAccessor { accessor } => {
                association.ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;
                if self.accessors.contains_key(&accessor.accessor_id) {
                    return Err(ServiceError::InvalidParameter(format!(
                        "accessor_id {} is already in use",
                        accessor.accessor_id
                    )));
                }
                Ok(())
            }
            IdentityChange::RevokeAccessor { accessor_id } => {
                let association = association
                    .ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;
                association
                    .live_accessor(accessor_id)
                    .map(|_| ())
                    .ok_or_else(|| ServiceError::AccessorNotFound(accessor_id.clone()))
            }
            IdentityChange::UpgradeIdentityMode => {
                let association = association
                    .ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string()))?;
                if association.mode_list.contains(&3) {
                    return Err(ServiceError::AlreadyModeThree);
                }
                Ok(())
            }
            IdentityChange::RevokeIdentityAssociation => association
                .map(|_| ())
                .ok_or_else(|| ServiceError::IdpNotAssociated(idp_id.to_string())),
        }
    }

    /// Mutate a group already checked by `check`.
    fn apply(&mut self, code: &str, idp_id: &str, change: &IdentityChange) -> ReferenceGroup {
        let mut new_identities: Vec<Identity> = Vec::new();
        let mut new_accessors: Vec<String> = Vec::new();

        if let Some(group) = self.groups.get_mut(code) {
            match change {
                IdentityChange::CreateIdentity {
                    association,
                    identities,
                } => {
                    new_accessors.extend(association.accessors.iter().map(|a| a.accessor_id.clone()));
                    group.idps.insert(idp_id.to_string(), association.clone());
                    new_identities.extend(identities.iter().cloned());
                }
                IdentityChange::AddIdentity { identities } => {
                    new_identities.extend(identities.iter().cloned());
                }
                IdentityChange::AddAccessor { accessor } => {
                    if let Some(association) = group.idps.get_mut(idp_id) {
                        new_accessors.push(accessor.accessor_id.clone());
                        association.accessors.push(Accessor {
                            idp_id: idp_id.to_string(),
                            revoked: false,
                            ..accessor.clone()
                        });
                    }
                }
                IdentityChange::RevokeAccessor { accessor_id } => {
                    if let Some(accessor) = group
                        .idps
                        .get_mut(idp_id)
                        .and_then(|a| a.accessors.iter_mut().find(|a| &a.accessor_id == accessor_id))
                    {
                        accessor.revoked = true;
                    }
                }
                IdentityChange::UpgradeIdentityMode => {
                    if let Some(association) = group.idps.get_mut(idp_id) {
                        association.mode_list.insert(3);
                    }
                }
                IdentityChange::RevokeIdentityAssociation => {
                    if let Some(association) = group.idps.get_mut(idp_id) {
                        association.active = false;
                    }
                }
            }
            group.identities.extend(new_identities.iter().cloned());
        }

        for identity in new_identities {
            self.index.insert(identity, code.to_string());
        }
        for accessor_id in new_accessors {
            self.accessors.insert(
                accessor_id,
                AccessorOwner {
                    idp_id: idp_id.to_string(),
                    reference_group_code: code.to_string(),
                },
            );
        }

        self.groups.get(code).cloned().unwrap_or_else(|| ReferenceGroup {
            reference_group_code: code.to_string(),
            identities: Default::default(),
            idps: BTreeMap::new(),
        })
    }
}

fn check_identifier_limits(
    group: &ReferenceGroup,
    limit: IdentifierLimit<'_>,
) -> Result<(), ServiceError> {
    let namespaces: std::collections::BTreeSet<&str> = group
        .identities
        .iter()
        .map(|i| i.namespace.as_str())
        .collect();
    for namespace in namespaces {
        if let Some(max) = limit(namespace) {
            if group.identifier_count(namespace) > max as usize {
                return Err(ServiceError::IdentifierLimitExceeded(namespace.to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KeyType;
    use std::collections::BTreeSet;

    fn no_limit(_: &str) -> Option<u32> {
        None
    }

    fn accessor(id: &str, idp_id: &str) -> Accessor {
        Accessor {
            accessor_id: id.to_string(),
            accessor_type: KeyType::Ed25519,
            accessor_public_key: "key".to_string(),
            idp_id: idp_id.to_string(),
            revoked: false,
        }
    }

    fn association(idp_id: &str, accessor_id: &str, modes: &[u8]) -> IdpAssociation {
        IdpAssociation {
            idp_id: idp_id.to_string(),
            mode_list: modes.iter().copied().collect::<BTreeSet<u8>>(),
            ial: 2.3,
            lial: None,
            laal: None,
            active: true,
            accessors: vec![accessor(accessor_id, idp_id)],
        }
    }

    #[tokio::test]
    async fn test_onboard_indexes_identity_and_accessor() {
        let registry = Registry::new();
        let identity = Identity::new("citizen_id", "1234");
        let code = registry
            .onboard(&[identity.clone()], association("idp1", "acc-1", &[2, 3]), &no_limit)
            .await
            .unwrap();

        let group = registry.find_group(&identity).await.unwrap();
        assert_eq!(group.reference_group_code, code);
        assert_eq!(
            registry.accessor_owner("acc-1").await.unwrap().idp_id,
            "idp1"
        );
        assert_eq!(group.usable_mode3_idps(), vec!["idp1".to_string()]);
    }

    #[tokio::test]
    async fn test_second_onboard_by_same_idp_rejected() {
        let registry = Registry::new();
        let identity = Identity::new("citizen_id", "1234");
        let code = registry
            .onboard(&[identity.clone()], association("idp1", "acc-1", &[2]), &no_limit)
            .await
            .unwrap();

        let change = IdentityChange::CreateIdentity {
            association: association("idp1", "acc-2", &[2]),
            identities: vec![identity],
        };
        let err = registry
            .check_change(&code, "idp1", &change, &no_limit)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 20019);
    }

    #[tokio::test]
    async fn test_add_identity_respects_limit_and_groups() {
        let registry = Registry::new();
        let first = Identity::new("citizen_id", "1");
        let other = Identity::new("citizen_id", "2");
        let code = registry
            .onboard(&[first], association("idp1", "acc-1", &[2]), &no_limit)
            .await
            .unwrap();
        registry
            .onboard(&[other.clone()], association("idp2", "acc-2", &[2]), &no_limit)
            .await
            .unwrap();

        let change = IdentityChange::AddIdentity {
            identities: vec![other],
        };
        let err = registry
            .check_change(&code, "idp1", &change, &no_limit)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 20071);

        let limit_one = |_: &str| Some(1);
        let change = IdentityChange::AddIdentity {
            identities: vec![Identity::new("citizen_id", "3")],
        };
        let err = registry
            .check_change(&code, "idp1", &change, &limit_one)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 20060);
    }

    #[tokio::test]
    async fn test_revoke_accessor_and_association() {
        let registry = Registry::new();
        let identity = Identity::new("citizen_id", "1");
        let code = registry
            .onboard(&[identity], association("idp1", "acc-1", &[2]), &no_limit)
            .await
            .unwrap();

        let group = registry
            .apply_change(
                &code,
                "idp1",
                &IdentityChange::RevokeAccessor {
                    accessor_id: "acc-1".to_string(),
                },
                &no_limit,
            )
            .await
            .unwrap();
        assert!(group.usable_association("idp1").is_none());

        let err = registry
            .check_change(
                &code,
                "idp1",
                &IdentityChange::RevokeAccessor {
                    accessor_id: "acc-1".to_string(),
                },
                &no_limit,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), 20011);

        let group = registry
            .apply_change(&code, "idp1", &IdentityChange::RevokeIdentityAssociation, &no_limit)
            .await
            .unwrap();
        assert!(!group.idps["idp1"].active);
    }

    #[tokio::test]
    async fn test_upgrade_twice_rejected() {
        let registry = Registry::new();
        let code = registry
            .onboard(
                &[Identity::new("citizen_id", "1")],
                association("idp1", "acc-1", &[2]),
                &no_limit,
            )
            .await
            .unwrap();

        registry
            .apply_change(&code, "idp1", &IdentityChange::UpgradeIdentityMode, &no_limit)
            .await
            .unwrap();
        let err = registry
            .check_change(&code, "idp1", &IdentityChange::UpgradeIdentityMode, &no_limit)
            .await
            .unwrap_err();
        assert_eq!(err.code(), 20073);
    }
}
