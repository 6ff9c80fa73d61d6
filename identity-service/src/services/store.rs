//! Per-node housekeeping data: private messages and AS data held for
//! requesters. Both can be purged independently of the request itself.

use crate::models::{AsDataRecord, PrivateMessage};
use chrono::Utc;
use dashmap::DashMap;

type NodeRequestKey = (String, String);

#[derive(Default)]
pub struct MessageStore {
    private_messages: DashMap<NodeRequestKey, Vec<PrivateMessage>>,
    as_data: DashMap<NodeRequestKey, Vec<AsDataRecord>>,
}

fn key(node_id: &str, request_id: &str) -> NodeRequestKey {
    (node_id.to_string(), request_id.to_string())
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, node_id: &str, request_id: &str, message: serde_json::Value) {
        self.private_messages
            .entry(key(node_id, request_id))
            .or_default()
            .push(PrivateMessage {
                request_id: request_id.to_string(),
                node_id: node_id.to_string(),
                message,
                created_utc: Utc::now(),
            });
    }

    pub fn private_messages(&self, node_id: &str, request_id: &str) -> Vec<PrivateMessage> {
        self.private_messages
            .get(&key(node_id, request_id))
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    pub fn remove_private_messages(&self, node_id: &str, request_id: &str) {
        self.private_messages.remove(&key(node_id, request_id));
    }

    pub fn remove_all_private_messages(&self, node_id: &str) {
        self.private_messages.retain(|(owner, _), _| owner != node_id);
    }

    pub fn store_as_data(&self, node_id: &str, request_id: &str, record: AsDataRecord) {
        self.as_data
            .entry(key(node_id, request_id))
            .or_default()
            .push(record);
    }

    pub fn as_data(&self, node_id: &str, request_id: &str) -> Vec<AsDataRecord> {
        self.as_data
            .get(&key(node_id, request_id))
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn remove_as_data(&self, node_id: &str, request_id: &str) {
        self.as_data.remove(&key(node_id, request_id));
    }

    pub fn remove_all_as_data(&self, node_id: &str) {
        self.as_data.retain(|(owner, _), _| owner != node_id);
    }
}
