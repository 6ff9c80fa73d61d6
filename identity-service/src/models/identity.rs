//! Reference groups, identities and accessors.

use super::governance::KeyType;
use super::request::RequestMode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Validate)]
pub struct Identity {
    #[validate(length(min = 1, message = "namespace cannot be empty"))]
    pub namespace: String,
    #[validate(length(min = 1, message = "identifier cannot be empty"))]
    pub identifier: String,
}

impl Identity {
    pub fn new(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accessor {
    pub accessor_id: String,
    pub accessor_type: KeyType,
    pub accessor_public_key: String,
    pub idp_id: String,
    pub revoked: bool,
}

/// One IdP's link to a reference group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpAssociation {
    pub idp_id: String,
    pub mode_list: BTreeSet<u8>,
    pub ial: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laal: Option<bool>,
    pub active: bool,
    pub accessors: Vec<Accessor>,
}

impl IdpAssociation {
    /// Active and holding at least one non-revoked accessor.
    pub fn is_usable(&self) -> bool {
        self.active && self.accessors.iter().any(|a| !a.revoked)
    }

    pub fn supports_mode(&self, mode: RequestMode) -> bool {
        self.mode_list.contains(&mode.as_u8())
    }

    pub fn live_accessor(&self, accessor_id: &str) -> Option<&Accessor> {
        self.accessors
            .iter()
            .find(|a| a.accessor_id == accessor_id && !a.revoked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceGroup {
    pub reference_group_code: String,
    pub identities: BTreeSet<Identity>,
    pub idps: BTreeMap<String, IdpAssociation>,
}

impl ReferenceGroup {
    pub fn identifier_count(&self, namespace: &str) -> usize {
        self.identities
            .iter()
            .filter(|i| i.namespace == namespace)
            .count()
    }

    pub fn usable_association(&self, idp_id: &str) -> Option<&IdpAssociation> {
        self.idps.get(idp_id).filter(|a| a.is_usable())
    }

    /// IdPs whose consent is needed for mode-3 identity changes.
    pub fn usable_mode3_idps(&self) -> Vec<String> {
        self.idps
            .values()
            .filter(|a| a.is_usable() && a.supports_mode(RequestMode::Three))
            .map(|a| a.idp_id.clone())
            .collect()
    }

    /// Every other IdP still actively associated, for modification notices.
    pub fn other_active_idps(&self, idp_id: &str) -> Vec<String> {
        self.idps
            .values()
            .filter(|a| a.active && a.idp_id != idp_id)
            .map(|a| a.idp_id.clone())
            .collect()
    }
}

/// The mutation an identity consent request applies once it completes.
#[derive(Debug, Clone)]
pub enum IdentityChange {
    CreateIdentity {
        association: IdpAssociation,
        identities: Vec<Identity>,
    },
    AddIdentity {
        identities: Vec<Identity>,
    },
    AddAccessor {
        accessor: Accessor,
    },
    RevokeAccessor {
        accessor_id: String,
    },
    UpgradeIdentityMode,
    RevokeIdentityAssociation,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateIdentityParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    #[validate(length(min = 1, message = "identity_list cannot be empty"), nested)]
    pub identity_list: Vec<Identity>,
    pub mode: RequestMode,
    pub accessor_type: KeyType,
    #[validate(length(min = 1, message = "accessor_public_key cannot be empty"))]
    pub accessor_public_key: String,
    pub accessor_id: Option<String>,
    #[validate(range(min = 1.0, message = "ial must be at least 1"))]
    pub ial: f64,
    pub lial: Option<bool>,
    pub laal: Option<bool>,
    pub request_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddIdentityParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    pub namespace: String,
    pub identifier: String,
    #[validate(length(min = 1, message = "identity_list cannot be empty"), nested)]
    pub identity_list: Vec<Identity>,
    pub request_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddAccessorParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    pub namespace: String,
    pub identifier: String,
    pub accessor_type: KeyType,
    #[validate(length(min = 1, message = "accessor_public_key cannot be empty"))]
    pub accessor_public_key: String,
    pub accessor_id: Option<String>,
    pub request_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeAccessorParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    pub namespace: String,
    pub identifier: String,
    #[validate(length(min = 1, message = "accessor_id cannot be empty"))]
    pub accessor_id: String,
    pub request_message: Option<String>,
}

/// Shared shape of upgrade-mode and revoke-association calls.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdentityTargetParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    pub namespace: String,
    pub identifier: String,
    pub request_message: Option<String>,
}

/// Synchronous answer to an identity operation. `request_id` is set when the
/// change waits for consent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityOperationAccepted {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_group_code: Option<String>,
    pub exist: bool,
}

/// Per-IdP view of a reference group, as returned to the owning IdP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityInfo {
    pub reference_group_code: String,
    pub ial: f64,
    pub mode_list: BTreeSet<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub laal: Option<bool>,
    pub active: bool,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelevantIdp {
    pub node_id: String,
    pub node_name: String,
    pub ial: f64,
    pub max_aal: f64,
    pub mode_list: BTreeSet<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessorOwner {
    pub idp_id: String,
    pub reference_group_code: String,
}
