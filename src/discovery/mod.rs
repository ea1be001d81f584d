//! Home Assistant MQTT discovery.
//!
//! [`MessageFactory`] turns one bus entity into the retained `homeassistant/.../config`
//! messages describing it. Messages with no payload retract a previously announced
//! entity.

pub mod factory;
pub mod payload;

pub use factory::{parse_ref_id, EntityKind, MessageFactory, UnsupportedKind};
pub use payload::{HaDevice, HaMessage, HaPayload};
