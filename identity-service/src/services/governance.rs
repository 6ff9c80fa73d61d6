//! NDID governance: namespaces, nodes, services and key rotation.

use crate::models::{
    AsService, KeyType, Namespace, Node, NodeRole, RegisterAsServiceParams, RegisterNamespaceParams,
    RegisterNodeParams, Service, UpdateNamespaceParams, UpdateNodeParams,
};
use crate::services::crypto;
use crate::services::error::ServiceError;
use crate::services::providers::CallbackDirectory;
use dashmap::DashMap;
use validator::Validate;

const DEFAULT_MAX_IAL: f64 = 3.0;
const DEFAULT_MAX_AAL: f64 = 3.0;

#[derive(Default)]
pub struct Governance {
    namespaces: DashMap<String, Namespace>,
    nodes: DashMap<String, Node>,
    services: DashMap<String, Service>,
    /// Keyed by `(as_id, service_id)`.
    as_services: DashMap<(String, String), AsService>,
    check_strings: DashMap<String, String>,
}

impl Governance {
    pub fn new() -> Self {
        Self::default()
    }

    // Namespaces

    pub fn register_namespace(
        &self,
        params: RegisterNamespaceParams,
    ) -> Result<Namespace, ServiceError> {
        params.validate()?;

        let entry = self.namespaces.entry(params.namespace.clone());
        if let dashmap::mapref::entry::Entry::Occupied(_) = entry {
            return Err(ServiceError::NamespaceExists(params.namespace));
        }

        let namespace = Namespace {
            namespace: params.namespace,
            description: params.description,
            active: true,
            allowed_identifier_count_in_reference_group: params
                .allowed_identifier_count_in_reference_group,
        };
        entry.or_insert(namespace.clone());

        tracing::info!(namespace = %namespace.namespace, "Namespace registered");
        Ok(namespace)
    }

    pub fn update_namespace(
        &self,
        namespace: &str,
        params: UpdateNamespaceParams,
    ) -> Result<Namespace, ServiceError> {
        params.validate()?;
        if params.description.is_none()
            && params.allowed_identifier_count_in_reference_group.is_none()
        {
            return Err(ServiceError::MissingUpdateField);
        }

        let mut record = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| ServiceError::NamespaceNotFound(namespace.to_string()))?;

        if let Some(description) = params.description {
            record.description = description;
        }
        if let Some(limit) = params.allowed_identifier_count_in_reference_group {
            record.allowed_identifier_count_in_reference_group = Some(limit);
        }

        Ok(record.clone())
    }

    pub fn disable_namespace(&self, namespace: &str) -> Result<(), ServiceError> {
        self.set_namespace_active(namespace, false)
    }

    pub fn enable_namespace(&self, namespace: &str) -> Result<(), ServiceError> {
        self.set_namespace_active(namespace, true)
    }

    fn set_namespace_active(&self, namespace: &str, active: bool) -> Result<(), ServiceError> {
        let mut record = self
            .namespaces
            .get_mut(namespace)
            .ok_or_else(|| ServiceError::NamespaceNotFound(namespace.to_string()))?;
        record.active = active;

        tracing::info!(namespace = %namespace, active, "Namespace state changed");
        Ok(())
    }

    /// Active namespaces, sorted by name.
    pub fn list_namespaces(&self) -> Vec<Namespace> {
        let mut namespaces: Vec<Namespace> = self
            .namespaces
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.value().clone())
            .collect();
        namespaces.sort_by(|a, b| a.namespace.cmp(&b.namespace));
        namespaces
    }

    pub fn require_active_namespace(&self, namespace: &str) -> Result<(), ServiceError> {
        match self.namespaces.get(namespace) {
            Some(record) if record.active => Ok(()),
            Some(_) => Err(ServiceError::NamespaceDisabled(namespace.to_string())),
            None => Err(ServiceError::NamespaceNotFound(namespace.to_string())),
        }
    }

    pub fn identifier_limit(&self, namespace: &str) -> Option<u32> {
        self.namespaces
            .get(namespace)
            .and_then(|record| record.allowed_identifier_count_in_reference_group)
    }

    // Nodes

    pub fn register_node(&self, params: RegisterNodeParams) -> Result<Node, ServiceError> {
        params.validate()?;

        if params.role != NodeRole::Idp && (params.max_ial.is_some() || params.max_aal.is_some())
        {
            return Err(ServiceError::InvalidParameter(
                "max_ial and max_aal apply to IdP nodes only".to_string(),
            ));
        }
        validate_key(params.key_type, &params.public_key)?;
        validate_key(params.master_key_type, &params.master_public_key)?;

        let entry = self.nodes.entry(params.node_id.clone());
        if let dashmap::mapref::entry::Entry::Occupied(_) = entry {
            return Err(ServiceError::NodeAlreadyExists(params.node_id));
        }

        let is_idp = params.role == NodeRole::Idp;
        let node = Node {
            node_name: if params.node_name.is_empty() {
                params.node_id.clone()
            } else {
                params.node_name
            },
            node_id: params.node_id,
            role: params.role,
            public_key: params.public_key,
            key_type: params.key_type,
            master_public_key: params.master_public_key,
            master_key_type: params.master_key_type,
            active: true,
            max_ial: is_idp.then(|| params.max_ial.unwrap_or(DEFAULT_MAX_IAL)),
            max_aal: is_idp.then(|| params.max_aal.unwrap_or(DEFAULT_MAX_AAL)),
            supported_request_message_data_url_type_list: Vec::new(),
            callback_url: None,
        };
        entry.or_insert(node.clone());

        tracing::info!(node_id = %node.node_id, role = %node.role, "Node registered");
        Ok(node)
    }

    pub fn set_callback_url(&self, node_id: &str, url: &str) -> Result<(), ServiceError> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ServiceError::NodeNotFound(node_id.to_string()))?;
        node.callback_url = Some(url.to_string());
        Ok(())
    }

    pub fn set_node_active(&self, node_id: &str, active: bool) -> Result<(), ServiceError> {
        let mut node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ServiceError::NodeNotFound(node_id.to_string()))?;
        node.active = active;

        tracing::info!(node_id = %node_id, active, "Node state changed");
        Ok(())
    }

    pub fn get_node(&self, node_id: &str) -> Result<Node, ServiceError> {
        self.nodes
            .get(node_id)
            .map(|node| node.clone())
            .ok_or_else(|| ServiceError::NodeNotFound(node_id.to_string()))
    }

    /// An active node holding one of `roles`.
    pub fn require_node(&self, node_id: &str, roles: &[NodeRole]) -> Result<Node, ServiceError> {
        let node = self.get_node(node_id)?;
        if !node.active {
            return Err(ServiceError::NodeNotFound(node_id.to_string()));
        }
        if !roles.contains(&node.role) {
            return Err(ServiceError::RoleNotPermitted(format!(
                "{} is a {} node",
                node_id, node.role
            )));
        }
        Ok(node)
    }

    /// Issue the challenge the next `update_node` call must sign.
    pub fn issue_check_string(&self, node_id: &str) -> Result<String, ServiceError> {
        self.get_node(node_id)?;
        let check_string = crypto::generate_check_string();
        self.check_strings
            .insert(node_id.to_string(), check_string.clone());
        Ok(check_string)
    }

    /// Rotate the operational and/or master key. Each new key must sign the
    /// issued check string; the check string is consumed by the attempt.
    pub fn update_node(&self, node_id: &str, params: UpdateNodeParams) -> Result<Node, ServiceError> {
        let node = self.get_node(node_id)?;

        if params.node_key.is_none()
            && params.node_master_key.is_none()
            && params.supported_request_message_data_url_type_list.is_none()
        {
            return Err(ServiceError::MissingUpdateField);
        }
        if params.supported_request_message_data_url_type_list.is_some()
            && node.role != NodeRole::Idp
        {
            return Err(ServiceError::UnsupportedUpdate);
        }

        let issued = self
            .check_strings
            .remove(node_id)
            .map(|(_, check_string)| check_string);
        if issued.as_deref() != Some(params.check_string.as_str()) {
            return Err(ServiceError::InvalidCheckString);
        }

        let new_node_key = match params.node_key {
            Some(key) => {
                let key_type = params.node_key_type.unwrap_or(node.key_type);
                validate_key(key_type, &key)?;
                let signature = params.signed_check_string.as_deref().unwrap_or_default();
                if !crypto::signature_matches(
                    key_type,
                    &key,
                    params.check_string.as_bytes(),
                    signature,
                ) {
                    return Err(ServiceError::NodeKeySignatureMismatch);
                }
                Some((key, key_type))
            }
            None => None,
        };

        let new_master_key = match params.node_master_key {
            Some(key) => {
                let key_type = params.node_master_key_type.unwrap_or(node.master_key_type);
                validate_key(key_type, &key)?;
                let signature = params
                    .master_signed_check_string
                    .as_deref()
                    .unwrap_or_default();
                if !crypto::signature_matches(
                    key_type,
                    &key,
                    params.check_string.as_bytes(),
                    signature,
                ) {
                    return Err(ServiceError::MasterKeySignatureMismatch);
                }
                Some((key, key_type))
            }
            None => None,
        };

        let mut record = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| ServiceError::NodeNotFound(node_id.to_string()))?;
        if let Some((key, key_type)) = new_node_key {
            record.public_key = key;
            record.key_type = key_type;
        }
        if let Some((key, key_type)) = new_master_key {
            record.master_public_key = key;
            record.master_key_type = key_type;
        }
        if let Some(list) = params.supported_request_message_data_url_type_list {
            record.supported_request_message_data_url_type_list = list;
        }

        tracing::info!(node_id = %node_id, "Node updated");
        Ok(record.clone())
    }

    // Services

    pub fn register_service(
        &self,
        service_id: &str,
        service_name: &str,
    ) -> Result<Service, ServiceError> {
        if service_id.is_empty() {
            return Err(ServiceError::InvalidParameter(
                "service_id cannot be empty".to_string(),
            ));
        }

        let entry = self.services.entry(service_id.to_string());
        if let dashmap::mapref::entry::Entry::Occupied(_) = entry {
            return Err(ServiceError::ServiceAlreadyExists(service_id.to_string()));
        }

        let service = Service {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            active: true,
        };
        entry.or_insert(service.clone());
        Ok(service)
    }

    pub fn get_service(&self, service_id: &str) -> Result<Service, ServiceError> {
        self.services
            .get(service_id)
            .filter(|service| service.active)
            .map(|service| service.clone())
            .ok_or_else(|| ServiceError::ServiceNotFound(service_id.to_string()))
    }

    /// Register (or replace) the offer `as_id` makes for a service.
    pub fn register_as_service(
        &self,
        as_id: &str,
        params: RegisterAsServiceParams,
    ) -> Result<AsService, ServiceError> {
        params.validate()?;
        self.require_node(as_id, &[NodeRole::As])?;
        self.get_service(&params.service_id)?;

        let offer = AsService {
            as_id: as_id.to_string(),
            service_id: params.service_id,
            min_ial: params.min_ial,
            min_aal: params.min_aal,
            active: true,
        };
        self.as_services.insert(
            (offer.as_id.clone(), offer.service_id.clone()),
            offer.clone(),
        );
        Ok(offer)
    }

    pub fn as_offer(&self, as_id: &str, service_id: &str) -> Option<AsService> {
        self.as_services
            .get(&(as_id.to_string(), service_id.to_string()))
            .filter(|offer| offer.active)
            .map(|offer| offer.clone())
    }

    /// Active offers for a service from active AS nodes, sorted by AS id.
    pub fn as_services_for(&self, service_id: &str) -> Vec<AsService> {
        let mut offers: Vec<AsService> = self
            .as_services
            .iter()
            .filter(|entry| entry.service_id == service_id && entry.active)
            .filter(|entry| {
                self.nodes
                    .get(&entry.as_id)
                    .map(|node| node.active)
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().clone())
            .collect();
        offers.sort_by(|a, b| a.as_id.cmp(&b.as_id));
        offers
    }
}

impl CallbackDirectory for Governance {
    fn callback_url(&self, node_id: &str) -> Option<String> {
        self.nodes
            .get(node_id)
            .and_then(|node| node.callback_url.clone())
    }
}

fn validate_key(key_type: KeyType, public_key: &str) -> Result<(), ServiceError> {
    crypto::verifier_for(key_type)
        .validate_public_key(public_key)
        .map_err(|e| ServiceError::InvalidParameter(e.to_string()))
}
