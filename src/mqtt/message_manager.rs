use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, QoS};
use std::fmt;
use tracing::debug;

/// A message delivered by the broker on one of the bridge's subscriptions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        InboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text, invalid UTF-8 replaced.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn render(&self) -> String {
        format!(
            "{} {} {}",
            self.received_at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.topic,
            self.payload_str().trim()
        )
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.topic, self.payload.len())
    }
}

/// A message the bridge wants on the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    /// Bus command: QoS 0, not retained.
    pub fn command(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn retained(topic: impl Into<String>, payload: impl Into<Vec<u8>>, qos: QoS) -> Self {
        OutboundMessage {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Client rejected publish to {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Fire-and-forget publishing seam shared by handlers and the refresh worker.
pub trait Publisher: Send + Sync {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}

impl Publisher for AsyncClient {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        debug!(
            "Publishing {} bytes to {} (qos {:?}, retain {})",
            message.payload.len(),
            message.topic,
            message.qos,
            message.retain
        );
        let topic = message.topic.clone();
        self.try_publish(message.topic, message.qos, message.retain, message.payload)
            .map_err(|e| PublishError::Rejected {
                topic,
                reason: e.to_string(),
            })
    }
}
