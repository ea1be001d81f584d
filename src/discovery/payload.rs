use rumqttc::QoS;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::mqtt::message_manager::{OutboundMessage, PublishError};

/// Device block shared by every entity of one controller.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct HaDevice {
    pub identifiers: Option<String>,
    pub name: String,
    pub manufacturer: String,
    pub model: Option<String>,
    pub sw_version: Option<String>,
}

/// Discovery payload: the fields every entity carries plus open per-domain keys.
///
/// `extra` is merged over the core fields when serialized, in insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HaPayload {
    pub name: String,
    pub unique_id: String,
    pub object_id: String,
    pub device: HaDevice,
    pub state_topic: String,
    pub command_topic: Option<String>,
    pub json_attributes_topic: String,
    pub json_attributes_template: String,
    pub(super) extra: Map<String, Value>,
}

impl HaPayload {
    /// Sets a domain specific key, replacing any previous value.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Value of `key` as it will appear in the serialized payload.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.to_json().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.to_json().contains_key(key)
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn to_json(&self) -> Map<String, Value> {
        let mut object = Map::new();
        object.insert("name".to_string(), Value::from(self.name.clone()));
        object.insert("unique_id".to_string(), Value::from(self.unique_id.clone()));
        object.insert("object_id".to_string(), Value::from(self.object_id.clone()));
        object.insert(
            "device".to_string(),
            serde_json::to_value(&self.device).unwrap_or(Value::Null),
        );
        object.insert("state_topic".to_string(), Value::from(self.state_topic.clone()));
        if let Some(command_topic) = &self.command_topic {
            object.insert("command_topic".to_string(), Value::from(command_topic.clone()));
        }
        object.insert(
            "json_attributes_topic".to_string(),
            Value::from(self.json_attributes_topic.clone()),
        );
        object.insert(
            "json_attributes_template".to_string(),
            Value::from(self.json_attributes_template.clone()),
        );

        for (key, value) in &self.extra {
            object.insert(key.clone(), value.clone());
        }
        object
    }
}

impl Serialize for HaPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// One retained discovery message. `payload == None` retracts the entity.
#[derive(Clone, Debug, PartialEq)]
pub struct HaMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Option<HaPayload>,
}

impl HaMessage {
    pub fn new(domain: &str, payload: HaPayload) -> Self {
        Self {
            topic: format!("homeassistant/{}/{}/config", domain, payload.unique_id),
            qos: QoS::ExactlyOnce,
            retain: true,
            payload: Some(payload),
        }
    }

    pub fn is_retraction(&self) -> bool {
        self.payload.is_none()
    }

    /// Discovery domain taken from the topic.
    pub fn domain(&self) -> Option<&str> {
        self.topic.split('/').nth(1)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.topic.split('/').nth(2)
    }

    pub fn retract(&mut self) {
        self.payload = None;
    }

    pub fn to_outbound(&self) -> Result<OutboundMessage, PublishError> {
        let body = match &self.payload {
            Some(payload) => serde_json::to_vec(payload)?,
            None => Vec::new(),
        };
        Ok(OutboundMessage::retained(self.topic.clone(), body, self.qos))
    }
}
