use std::sync::Mutex;

use crate::mqtt::message_manager::{OutboundMessage, PublishError, Publisher};
use crate::persistence::{Controller, Entity};

/// Publisher that keeps every message for inspection.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.topic).collect()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

pub fn controller(id: &str, entities: Vec<Entity>) -> Controller {
    Controller {
        id: id.to_string(),
        name: Some(format!("Controller {}", id)),
        serial_nr: Some(format!("SN-{}", id)),
        kind: Some("Qbus".to_string()),
        version: Some("3.14".to_string()),
        function_blocks: entities,
        ..Controller::default()
    }
}

pub fn entity(id: &str, kind: &str, ref_id: &str) -> Entity {
    Entity {
        id: id.to_string(),
        name: format!("Entity {}", id),
        ref_id: ref_id.to_string(),
        kind: kind.to_string(),
        ..Entity::default()
    }
}
