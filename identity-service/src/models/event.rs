//! Callback payloads delivered to node callback URLs.

use super::block::BlockHeight;
use super::request::{DataRequest, RequestMode, RequestPurpose, RequestStatus};
use serde::{Deserialize, Serialize};
use service_core::error::ErrorBody;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackEvent {
    CreateRequestResult(CreateRequestResult),
    IncomingRequest(IncomingRequest),
    ResponseResult(OperationResult),
    RequestStatus(RequestStatusEvent),
    DataRequest(DataRequestEvent),
    SendDataResult(OperationResult),
    CloseRequestResult(OperationResult),
    CreateIdentityRequestResult(IdentityResult),
    CreateIdentityResult(IdentityResult),
    AddIdentityRequestResult(IdentityResult),
    AddIdentityResult(IdentityResult),
    AddAccessorRequestResult(IdentityResult),
    AddAccessorResult(IdentityResult),
    RevokeAccessorRequestResult(IdentityResult),
    RevokeAccessorResult(IdentityResult),
    UpgradeIdentityModeRequestResult(IdentityResult),
    UpgradeIdentityModeResult(IdentityResult),
    RevokeIdentityAssociationRequestResult(IdentityResult),
    RevokeIdentityAssociationResult(IdentityResult),
    IdentityModificationNotification(IdentityModificationNotification),
}

/// Which half of an identity operation a result reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStage {
    /// The consent request was created.
    Requested,
    /// The change was applied or abandoned.
    Finished,
}

impl CallbackEvent {
    /// Wrap an identity result in the variant matching `purpose` and `stage`.
    /// Returns `None` for verification requests.
    pub fn identity_result(
        purpose: RequestPurpose,
        stage: IdentityStage,
        body: IdentityResult,
    ) -> Option<Self> {
        use IdentityStage::{Finished, Requested};
        let event = match (purpose, stage) {
            (RequestPurpose::Verify, _) => return None,
            (RequestPurpose::CreateIdentity, Requested) => Self::CreateIdentityRequestResult(body),
            (RequestPurpose::CreateIdentity, Finished) => Self::CreateIdentityResult(body),
            (RequestPurpose::AddIdentity, Requested) => Self::AddIdentityRequestResult(body),
            (RequestPurpose::AddIdentity, Finished) => Self::AddIdentityResult(body),
            (RequestPurpose::AddAccessor, Requested) => Self::AddAccessorRequestResult(body),
            (RequestPurpose::AddAccessor, Finished) => Self::AddAccessorResult(body),
            (RequestPurpose::RevokeAccessor, Requested) => Self::RevokeAccessorRequestResult(body),
            (RequestPurpose::RevokeAccessor, Finished) => Self::RevokeAccessorResult(body),
            (RequestPurpose::UpgradeIdentityMode, Requested) => {
                Self::UpgradeIdentityModeRequestResult(body)
            }
            (RequestPurpose::UpgradeIdentityMode, Finished) => Self::UpgradeIdentityModeResult(body),
            (RequestPurpose::RevokeIdentityAssociation, Requested) => {
                Self::RevokeIdentityAssociationRequestResult(body)
            }
            (RequestPurpose::RevokeIdentityAssociation, Finished) => {
                Self::RevokeIdentityAssociationResult(body)
            }
        };
        Some(event)
    }

    /// Destination node.
    pub fn node_id(&self) -> &str {
        match self {
            Self::CreateRequestResult(e) => &e.node_id,
            Self::IncomingRequest(e) => &e.node_id,
            Self::ResponseResult(e) | Self::SendDataResult(e) | Self::CloseRequestResult(e) => {
                &e.node_id
            }
            Self::RequestStatus(e) => &e.node_id,
            Self::DataRequest(e) => &e.node_id,
            Self::IdentityModificationNotification(e) => &e.node_id,
            Self::CreateIdentityRequestResult(e)
            | Self::CreateIdentityResult(e)
            | Self::AddIdentityRequestResult(e)
            | Self::AddIdentityResult(e)
            | Self::AddAccessorRequestResult(e)
            | Self::AddAccessorResult(e)
            | Self::RevokeAccessorRequestResult(e)
            | Self::RevokeAccessorResult(e)
            | Self::UpgradeIdentityModeRequestResult(e)
            | Self::UpgradeIdentityModeResult(e)
            | Self::RevokeIdentityAssociationRequestResult(e)
            | Self::RevokeIdentityAssociationResult(e) => &e.node_id,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::CreateRequestResult(e) => Some(&e.request_id),
            Self::IncomingRequest(e) => Some(&e.request_id),
            Self::ResponseResult(e) | Self::SendDataResult(e) | Self::CloseRequestResult(e) => {
                Some(&e.request_id)
            }
            Self::RequestStatus(e) => Some(&e.request_id),
            Self::DataRequest(e) => Some(&e.request_id),
            Self::IdentityModificationNotification(_) => None,
            Self::CreateIdentityRequestResult(e)
            | Self::CreateIdentityResult(e)
            | Self::AddIdentityRequestResult(e)
            | Self::AddIdentityResult(e)
            | Self::AddAccessorRequestResult(e)
            | Self::AddAccessorResult(e)
            | Self::RevokeAccessorRequestResult(e)
            | Self::RevokeAccessorResult(e)
            | Self::UpgradeIdentityModeRequestResult(e)
            | Self::UpgradeIdentityModeResult(e)
            | Self::RevokeIdentityAssociationRequestResult(e)
            | Self::RevokeIdentityAssociationResult(e) => e.request_id.as_deref(),
        }
    }

    /// The `type` discriminant as sent on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRequestResult(_) => "create_request_result",
            Self::IncomingRequest(_) => "incoming_request",
            Self::ResponseResult(_) => "response_result",
            Self::RequestStatus(_) => "request_status",
            Self::DataRequest(_) => "data_request",
            Self::SendDataResult(_) => "send_data_result",
            Self::CloseRequestResult(_) => "close_request_result",
            Self::CreateIdentityRequestResult(_) => "create_identity_request_result",
            Self::CreateIdentityResult(_) => "create_identity_result",
            Self::AddIdentityRequestResult(_) => "add_identity_request_result",
            Self::AddIdentityResult(_) => "add_identity_result",
            Self::AddAccessorRequestResult(_) => "add_accessor_request_result",
            Self::AddAccessorResult(_) => "add_accessor_result",
            Self::RevokeAccessorRequestResult(_) => "revoke_accessor_request_result",
            Self::RevokeAccessorResult(_) => "revoke_accessor_result",
            Self::UpgradeIdentityModeRequestResult(_) => "upgrade_identity_mode_request_result",
            Self::UpgradeIdentityModeResult(_) => "upgrade_identity_mode_result",
            Self::RevokeIdentityAssociationRequestResult(_) => {
                "revoke_identity_association_request_result"
            }
            Self::RevokeIdentityAssociationResult(_) => "revoke_identity_association_result",
            Self::IdentityModificationNotification(_) => "identity_modification_notification",
        }
    }

    /// Ledger position of the transition this event reports, when it has one.
    pub fn block_height(&self) -> Option<&BlockHeight> {
        match self {
            Self::CreateRequestResult(e) => Some(&e.creation_block_height),
            Self::IncomingRequest(e) => Some(&e.creation_block_height),
            Self::RequestStatus(e) => Some(&e.block_height),
            Self::DataRequest(e) => Some(&e.creation_block_height),
            Self::CreateIdentityRequestResult(e)
            | Self::CreateIdentityResult(e)
            | Self::AddIdentityRequestResult(e)
            | Self::AddIdentityResult(e)
            | Self::AddAccessorRequestResult(e)
            | Self::AddAccessorResult(e)
            | Self::RevokeAccessorRequestResult(e)
            | Self::RevokeAccessorResult(e)
            | Self::UpgradeIdentityModeRequestResult(e)
            | Self::UpgradeIdentityModeResult(e)
            | Self::RevokeIdentityAssociationRequestResult(e)
            | Self::RevokeIdentityAssociationResult(e) => e.creation_block_height.as_ref(),
            Self::ResponseResult(_)
            | Self::SendDataResult(_)
            | Self::CloseRequestResult(_)
            | Self::IdentityModificationNotification(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequestResult {
    pub node_id: String,
    pub reference_id: String,
    pub request_id: String,
    pub success: bool,
    pub creation_block_height: BlockHeight,
}

/// `response_result`, `send_data_result` and `close_request_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub node_id: String,
    pub reference_id: String,
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub node_id: String,
    pub mode: RequestMode,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_group_code: Option<String>,
    pub request_message: String,
    pub request_message_hash: String,
    pub request_message_salt: String,
    pub requester_node_id: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub data_request_list: Vec<DataRequest>,
    pub request_timeout: u64,
    pub creation_time: i64,
    pub creation_block_height: BlockHeight,
    /// Present for identity consent requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<RequestPurpose>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_id: String,
    pub min_as: u32,
    pub signed_data_count: u32,
    pub received_data_count: u32,
}

/// Validity of one IdP's proof. Both fields are `null` on IdP channels and
/// for mode 1 requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseValidity {
    pub idp_id: String,
    pub valid_signature: Option<bool>,
    pub valid_ial: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatusEvent {
    pub node_id: String,
    pub request_id: String,
    pub requester_node_id: String,
    pub status: RequestStatus,
    pub mode: RequestMode,
    pub min_idp: u32,
    pub answered_idp_count: u32,
    pub closed: bool,
    pub timed_out: bool,
    pub service_list: Vec<ServiceStatus>,
    pub response_valid_list: Vec<ResponseValidity>,
    pub block_height: BlockHeight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequestEvent {
    pub node_id: String,
    pub request_id: String,
    pub mode: RequestMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub service_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_params: Option<String>,
    pub requester_node_id: String,
    pub max_ial: f64,
    pub max_aal: f64,
    pub request_timeout: u64,
    pub response_signature_list: Vec<String>,
    pub creation_time: i64,
    pub creation_block_height: BlockHeight,
}

/// Shared shape of every identity operation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityResult {
    pub node_id: String,
    pub reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_block_height: Option<BlockHeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_group_code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityAction {
    CreateIdentity,
    AddIdentity,
    AddAccessor,
    RevokeAccessor,
    UpgradeIdentityMode,
    RevokeIdentityAssociation,
}

impl IdentityAction {
    pub fn from_purpose(purpose: RequestPurpose) -> Option<Self> {
        match purpose {
            RequestPurpose::Verify => None,
            RequestPurpose::CreateIdentity => Some(Self::CreateIdentity),
            RequestPurpose::AddIdentity => Some(Self::AddIdentity),
            RequestPurpose::AddAccessor => Some(Self::AddAccessor),
            RequestPurpose::RevokeAccessor => Some(Self::RevokeAccessor),
            RequestPurpose::UpgradeIdentityMode => Some(Self::UpgradeIdentityMode),
            RequestPurpose::RevokeIdentityAssociation => Some(Self::RevokeIdentityAssociation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityModificationNotification {
    pub node_id: String,
    pub reference_group_code: String,
    pub action: IdentityAction,
    pub actor_node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_matches_kind() {
        let event = CallbackEvent::AddAccessorResult(IdentityResult {
            node_id: "idp1".to_string(),
            reference_id: "ref-1".to_string(),
            request_id: Some("abc".to_string()),
            success: true,
            error: None,
            creation_block_height: None,
            accessor_id: None,
            reference_group_code: None,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_validity_nulls_are_serialized() {
        let validity = ResponseValidity {
            idp_id: "idp1".to_string(),
            valid_signature: None,
            valid_ial: None,
        };
        let json = serde_json::to_value(&validity).unwrap();
        assert!(json["valid_signature"].is_null());
        assert!(json.as_object().unwrap().contains_key("valid_ial"));
    }

    #[test]
    fn test_identity_result_for_verify_is_none() {
        let body = IdentityResult {
            node_id: "rp1".to_string(),
            reference_id: "r".to_string(),
            request_id: None,
            success: true,
            error: None,
            creation_block_height: None,
            accessor_id: None,
            reference_group_code: None,
        };
        assert!(
            CallbackEvent::identity_result(RequestPurpose::Verify, IdentityStage::Finished, body)
                .is_none()
        );
    }
}
