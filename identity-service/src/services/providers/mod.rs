pub mod http;
pub mod mock;

use crate::models::CallbackEvent;
use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpCallbackSink;
pub use mock::MockCallbackSink;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("No callback URL registered for node {0}")]
    NoCallbackUrl(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Callback rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CallbackError {
    /// Transient failures are retried; permanent ones drop the event.
    ///
    /// A node without a callback URL yet keeps its queue until one is set.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CallbackError::Serialization(_))
    }
}

/// Resolves the callback URL a node registered.
pub trait CallbackDirectory: Send + Sync {
    fn callback_url(&self, node_id: &str) -> Option<String>;
}

/// Delivers one event to its destination node.
#[async_trait]
pub trait CallbackSink: Send + Sync {
    async fn deliver(&self, event: &CallbackEvent) -> Result<(), CallbackError>;
    fn name(&self) -> &'static str;
}
