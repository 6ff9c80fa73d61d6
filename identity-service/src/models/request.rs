//! The consent request aggregate and its inputs.

use super::block::BlockHeight;
use super::identity::IdentityChange;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Request class: mode 1 carries no identity, modes 2 and 3 require accessor
/// signatures, mode 3 additionally gates identity changes on consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RequestMode {
    One,
    Two,
    Three,
}

impl RequestMode {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }

    /// Whether IdP responses must be signed with an accessor key.
    pub fn requires_signature(self) -> bool {
        !matches!(self, Self::One)
    }
}

impl TryFrom<u8> for RequestMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(format!("unsupported request mode {}", other)),
        }
    }
}

impl From<RequestMode> for u8 {
    fn from(mode: RequestMode) -> Self {
        mode.as_u8()
    }
}

impl std::fmt::Display for RequestMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Aggregate status. Ordering follows the lifecycle so `max` never regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Confirmed,
    Completed,
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Confirmed => write!(f, "confirmed"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPurpose {
    Verify,
    CreateIdentity,
    AddIdentity,
    AddAccessor,
    RevokeAccessor,
    UpgradeIdentityMode,
    RevokeIdentityAssociation,
}

impl RequestPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::CreateIdentity => "create_identity",
            Self::AddIdentity => "add_identity",
            Self::AddAccessor => "add_accessor",
            Self::RevokeAccessor => "revoke_accessor",
            Self::UpgradeIdentityMode => "upgrade_identity_mode",
            Self::RevokeIdentityAssociation => "revoke_identity_association",
        }
    }

    pub fn is_identity_change(&self) -> bool {
        !matches!(self, Self::Verify)
    }
}

impl From<&IdentityChange> for RequestPurpose {
    fn from(change: &IdentityChange) -> Self {
        match change {
            IdentityChange::CreateIdentity { .. } => Self::CreateIdentity,
            IdentityChange::AddIdentity { .. } => Self::AddIdentity,
            IdentityChange::AddAccessor { .. } => Self::AddAccessor,
            IdentityChange::RevokeAccessor { .. } => Self::RevokeAccessor,
            IdentityChange::UpgradeIdentityMode => Self::UpgradeIdentityMode,
            IdentityChange::RevokeIdentityAssociation => Self::RevokeIdentityAssociation,
        }
    }
}

impl std::fmt::Display for RequestPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DataRequest {
    #[validate(length(min = 1, message = "service_id cannot be empty"))]
    pub service_id: String,
    #[serde(default)]
    pub as_id_list: Vec<String>,
    #[validate(range(min = 1, message = "min_as must be at least 1"))]
    pub min_as: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRequestParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    pub mode: RequestMode,
    pub namespace: Option<String>,
    pub identifier: Option<String>,
    #[serde(default)]
    pub idp_id_list: Vec<String>,
    #[serde(default)]
    #[validate(nested)]
    pub data_request_list: Vec<DataRequest>,
    pub request_message: String,
    #[validate(range(min = 1.0, message = "min_ial must be at least 1"))]
    pub min_ial: f64,
    #[validate(range(min = 1.0, message = "min_aal must be at least 1"))]
    pub min_aal: f64,
    #[validate(range(min = 1, message = "min_idp must be at least 1"))]
    pub min_idp: u32,
    /// Seconds.
    #[validate(range(min = 1, message = "request_timeout must be at least 1 second"))]
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRequestAccepted {
    pub request_id: String,
    pub initial_salt: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdpResponseParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    #[validate(length(min = 1, message = "request_id cannot be empty"))]
    pub request_id: String,
    #[validate(range(min = 1.0, message = "ial must be at least 1"))]
    pub ial: f64,
    #[validate(range(min = 1.0, message = "aal must be at least 1"))]
    pub aal: f64,
    pub status: ResponseStatus,
    pub accessor_id: Option<String>,
    /// Base64 signature over `request_message_hash`.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AsDataParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    #[validate(length(min = 1, message = "request_id cannot be empty"))]
    pub request_id: String,
    #[validate(length(min = 1, message = "service_id cannot be empty"))]
    pub service_id: String,
    pub data: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CloseRequestParams {
    #[validate(length(min = 1, message = "reference_id cannot be empty"))]
    pub reference_id: String,
    #[validate(length(min = 1, message = "request_id cannot be empty"))]
    pub request_id: String,
}

/// A recorded IdP answer. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpResponse {
    pub idp_id: String,
    pub ial: f64,
    pub aal: f64,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub valid_signature: Option<bool>,
    pub valid_ial: Option<bool>,
    pub block_height: BlockHeight,
}

impl IdpResponse {
    /// Counts toward `min_idp`: an accept whose proofs (when required) hold.
    pub fn is_valid_accept(&self) -> bool {
        self.status == ResponseStatus::Accept
            && self.valid_signature != Some(false)
            && self.valid_ial != Some(false)
    }
}

/// Progress of one requested service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDataEntry {
    pub service_id: String,
    pub min_as: u32,
    /// ASes the data request was routed to.
    pub as_id_list: Vec<String>,
    pub signed_as_ids: Vec<String>,
    pub received_as_ids: Vec<String>,
}

impl ServiceDataEntry {
    pub fn signed_data_count(&self) -> u32 {
        self.signed_as_ids.len() as u32
    }

    pub fn received_data_count(&self) -> u32 {
        self.received_as_ids.len() as u32
    }

    pub fn is_satisfied(&self) -> bool {
        self.received_data_count() >= self.min_as
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub request_id: String,
    pub purpose: RequestPurpose,
    pub mode: RequestMode,
    pub requester_node_id: String,
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_group_code: Option<String>,
    pub min_idp: u32,
    pub min_ial: f64,
    pub min_aal: f64,
    pub request_timeout: u64,
    pub idp_id_list: Vec<String>,
    pub notified_idp_list: Vec<String>,
    pub data_request_list: Vec<DataRequest>,
    pub request_message: String,
    #[serde(skip_serializing, default)]
    pub initial_salt: String,
    pub request_message_salt: String,
    pub request_message_hash: String,
    /// Unix milliseconds.
    pub creation_time: i64,
    pub creation_block_height: BlockHeight,
    pub status: RequestStatus,
    pub closed: bool,
    pub timed_out: bool,
    pub responses: Vec<IdpResponse>,
    pub service_data: Vec<ServiceDataEntry>,
    /// Set once `min_idp` valid accepts existed and ASes were asked for data.
    pub data_requested: bool,
    #[serde(skip)]
    pub identity_change: Option<IdentityChange>,
}

impl Request {
    pub fn response_from(&self, idp_id: &str) -> Option<&IdpResponse> {
        self.responses.iter().find(|r| r.idp_id == idp_id)
    }

    pub fn service_entry_mut(&mut self, service_id: &str) -> Option<&mut ServiceDataEntry> {
        self.service_data
            .iter_mut()
            .find(|s| s.service_id == service_id)
    }

    /// ASes that were sent a data request.
    pub fn data_request_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        for entry in &self.service_data {
            for as_id in &entry.as_id_list {
                if !targets.contains(as_id) {
                    targets.push(as_id.clone());
                }
            }
        }
        targets
    }
}
