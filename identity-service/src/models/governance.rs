//! NDID-managed records: nodes, namespaces and services.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Rp,
    Idp,
    As,
    Ndid,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rp => "rp",
            Self::Idp => "idp",
            Self::As => "as",
            Self::Ndid => "ndid",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Public key algorithm of a node key or an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "Ed25519")]
    Ed25519,
}

impl std::fmt::Display for KeyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyType::Rsa => write!(f, "RSA"),
            KeyType::Ed25519 => write!(f, "Ed25519"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: String,
    pub node_name: String,
    pub role: NodeRole,
    pub public_key: String,
    pub key_type: KeyType,
    pub master_public_key: String,
    pub master_key_type: KeyType,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ial: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_aal: Option<f64>,
    #[serde(default)]
    pub supported_request_message_data_url_type_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterNodeParams {
    #[validate(length(min = 1, message = "node_id cannot be empty"))]
    pub node_id: String,
    #[serde(default)]
    pub node_name: String,
    pub role: NodeRole,
    #[validate(length(min = 1, message = "public_key cannot be empty"))]
    pub public_key: String,
    pub key_type: KeyType,
    #[validate(length(min = 1, message = "master_public_key cannot be empty"))]
    pub master_public_key: String,
    pub master_key_type: KeyType,
    #[validate(range(min = 1.0, message = "max_ial must be at least 1"))]
    pub max_ial: Option<f64>,
    #[validate(range(min = 1.0, message = "max_aal must be at least 1"))]
    pub max_aal: Option<f64>,
}

/// Key rotation request. Each new key must come with a signature over the
/// node's current check string made with the matching private key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNodeParams {
    pub check_string: String,
    pub node_key: Option<String>,
    pub node_key_type: Option<KeyType>,
    pub signed_check_string: Option<String>,
    pub node_master_key: Option<String>,
    pub node_master_key_type: Option<KeyType>,
    pub master_signed_check_string: Option<String>,
    /// IdP only.
    pub supported_request_message_data_url_type_list: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub namespace: String,
    pub description: String,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_identifier_count_in_reference_group: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterNamespaceParams {
    #[validate(length(min = 1, message = "namespace cannot be empty"))]
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1, message = "allowed identifier count must be positive"))]
    pub allowed_identifier_count_in_reference_group: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateNamespaceParams {
    pub description: Option<String>,
    #[validate(range(min = 1, message = "allowed identifier count must be positive"))]
    pub allowed_identifier_count_in_reference_group: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_id: String,
    pub service_name: String,
    pub active: bool,
}

/// An AS offering a service, with the assurance floor it requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsService {
    pub as_id: String,
    pub service_id: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterAsServiceParams {
    #[validate(length(min = 1, message = "service_id cannot be empty"))]
    pub service_id: String,
    #[validate(range(min = 1.0, message = "min_ial must be at least 1"))]
    pub min_ial: f64,
    #[validate(range(min = 1.0, message = "min_aal must be at least 1"))]
    pub min_aal: f64,
}
