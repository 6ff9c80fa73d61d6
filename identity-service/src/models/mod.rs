pub mod block;
pub mod event;
pub mod governance;
pub mod identity;
pub mod request;

pub use block::{BlockHeight, ParseBlockHeightError};
pub use event::{
    CallbackEvent, CreateRequestResult, DataRequestEvent, IdentityAction,
    IdentityModificationNotification, IdentityResult, IdentityStage, IncomingRequest,
    OperationResult, RequestStatusEvent, ResponseValidity, ServiceStatus,
};
pub use governance::{
    AsService, KeyType, Namespace, Node, NodeRole, RegisterAsServiceParams,
    RegisterNamespaceParams, RegisterNodeParams, Service, UpdateNamespaceParams, UpdateNodeParams,
};
pub use identity::{
    Accessor, AccessorOwner, AddAccessorParams, AddIdentityParams, CreateIdentityParams,
    Identity, IdentityChange, IdentityInfo, IdentityOperationAccepted, IdentityTargetParams,
    IdpAssociation, ReferenceGroup, RelevantIdp, RevokeAccessorParams,
};
pub use request::{
    AsDataParams, CloseRequestParams, CreateRequestAccepted, CreateRequestParams, DataRequest,
    IdpResponse, IdpResponseParams, Request, RequestMode, RequestPurpose, RequestStatus,
    ResponseStatus, ServiceDataEntry,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message a node sent or received about one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub request_id: String,
    pub node_id: String,
    pub message: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

/// AS data held for the requester until it is removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsDataRecord {
    pub source_node_id: String,
    pub service_id: String,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_signature: Option<String>,
    pub received_utc: DateTime<Utc>,
}
