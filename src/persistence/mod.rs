//! # Persistence Module
//!
//! ## Why This Module Exists
//! The Qbus gateway publishes its whole installation (controllers and their function
//! blocks) as one JSON topology document. Every other part of the bridge reads that
//! document: the discovery factory translates it, the entity-state handler looks
//! thermostats up in it, and the status handlers use it to know which ids exist.
//!
//! ## Key Abstractions
//! - **Topology snapshot**: immutable once received, replaced wholesale on update
//! - **Schema-on-read entities**: `properties`/`actions` stay open JSON maps, their keys
//!   select translator capabilities
//! - **ConfigStore**: the single owner of the current snapshot, durable on disk
//!
//! ## Error Handling Strategy
//! A missing snapshot on disk degrades to "no known entities". A snapshot that exists
//! but cannot be parsed is an error for that load attempt.

pub mod config_store;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub use config_store::{ConfigStore, ControllerRef, EntityRef, StoreError};

/// Complete bus topology as published on `cloudapp/QBUSMQTTGW/config`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Topology {
    pub app: Option<String>,
    pub version: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub devices: Vec<Controller>,
}

impl Topology {
    /// Number of entities across all controllers.
    pub fn entity_count(&self) -> usize {
        self.devices.iter().map(|c| c.function_blocks.len()).sum()
    }
}

/// A physical bus controller hosting function blocks.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Controller {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub name: Option<String>,
    pub serial_nr: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub version: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub properties: Map<String, Value>,
    #[serde(deserialize_with = "nullable")]
    pub function_blocks: Vec<Entity>,
}

/// Entity variant as sent by the gateway: absent, a single name or a list.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Variant {
    Single(String),
    Multiple(Vec<Option<String>>),
}

impl Variant {
    /// The variant name when exactly one is given.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            Variant::Single(name) => Some(name.as_str()),
            Variant::Multiple(_) => None,
        }
    }
}

/// One function block on the bus.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Entity {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    pub location: Option<String>,
    pub location_id: Option<i64>,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    pub original_name: Option<String>,
    #[serde(deserialize_with = "nullable")]
    pub ref_id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    pub variant: Option<Variant>,
    #[serde(deserialize_with = "nullable")]
    pub actions: Map<String, Value>,
    #[serde(deserialize_with = "nullable")]
    pub properties: Map<String, Value>,
}

impl Entity {
    pub fn has_property(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn has_action(&self, key: &str) -> bool {
        self.actions.contains_key(key)
    }

    /// The `unit` declared on a property descriptor, e.g. `properties.co2.unit`.
    pub fn property_unit(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(|p| p.get("unit"))
            .and_then(Value::as_str)
    }
}

// The gateway sends explicit `null` for fields it has no value for
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// State document of a controller (`cloudapp/QBUSMQTTGW/{id}/state`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerState {
    pub id: String,
    pub properties: Option<ControllerStateProperties>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerStateProperties {
    pub connectable: Option<bool>,
    pub connected: Option<bool>,
}

/// State document of an entity (`cloudapp/QBUSMQTTGW/{controller}/{id}/state`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct EntityState {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: Map<String, Value>,
}

/// Gateway state document (`cloudapp/QBUSMQTTGW/state`).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayState {
    pub id: Option<String>,
    pub online: bool,
    pub reason: Option<String>,
}
