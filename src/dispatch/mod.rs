//! # Dispatch Module
//!
//! Routes every inbound bus message to the handlers whose topic pattern matches it.
//!
//! ```text
//! transport ──► mpsc ──► Dispatcher ──► Handler (registration order)
//!                             │
//!                       topic::matches
//! ```
//!
//! Handlers run one after another on the dispatch task. A handler that waits (the
//! topology handler does) holds back the following messages; the transport keeps
//! polling the broker meanwhile. Errors are logged per handler and never stop the loop.

pub mod dispatcher;
pub mod handlers;

use async_trait::async_trait;

use crate::mqtt::message_manager::{InboundMessage, PublishError};
use crate::persistence::StoreError;
use crate::refresh::CoalescerError;

pub use dispatcher::Dispatcher;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Invalid payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Topology store failed: {0}")]
    Store(#[from] StoreError),

    #[error("Publish failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Refresh request failed: {0}")]
    Refresh(#[from] CoalescerError),
}

impl HandlerError {
    pub fn payload(msg: &InboundMessage, source: serde_json::Error) -> Self {
        HandlerError::Payload {
            topic: msg.topic.clone(),
            source,
        }
    }
}

/// Reaction to messages on one topic pattern.
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError>;
}
