use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::TOPIC_PREFIX;
use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::{InboundMessage, OutboundMessage, Publisher};
use crate::persistence::ControllerState;

const AUTH_KEY: &str = "ubielite";

/// Activates controllers that report themselves as not connectable.
///
/// Each controller id is activated at most once per process run.
pub struct ControllerStateHandler {
    publisher: Arc<dyn Publisher>,
    activated: Mutex<HashSet<String>>,
}

impl ControllerStateHandler {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            activated: Mutex::new(HashSet::new()),
        }
    }

    /// Records `id`, returning `false` when it was activated before.
    fn claim(&self, id: &str) -> bool {
        match self.activated.lock() {
            Ok(mut activated) => activated.insert(id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(id.to_string()),
        }
    }
}

#[async_trait]
impl Handler for ControllerStateHandler {
    fn name(&self) -> &str {
        "controller_state"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let state: ControllerState =
            serde_json::from_slice(&msg.payload).map_err(|e| HandlerError::payload(msg, e))?;

        let connectable = state.properties.as_ref().and_then(|p| p.connectable);
        if connectable != Some(false) {
            debug!("Controller {} connectable: {:?}", state.id, connectable);
            return Ok(());
        }

        if state.id.is_empty() {
            warn!("Controller state without id on {}", msg.topic);
            return Ok(());
        }

        if !self.claim(&state.id) {
            debug!("Controller {} already activated", state.id);
            return Ok(());
        }

        info!("Activating controller {}", state.id);
        let payload = json!({
            "id": state.id,
            "type": "action",
            "action": "activate",
            "properties": { "authKey": AUTH_KEY },
        });
        self.publisher.publish(OutboundMessage::command(
            format!("{}/{}/setState", TOPIC_PREFIX, state.id),
            payload.to_string(),
        ))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingPublisher;
    use serde_json::Value;

    fn state(id: &str, connectable: bool) -> InboundMessage {
        InboundMessage::new(
            format!("cloudapp/QBUSMQTTGW/{}/state", id),
            json!({"id": id, "type": "state", "properties": {"connectable": connectable, "connected": true}})
                .to_string(),
        )
    }

    #[tokio::test]
    async fn unconnectable_controller_is_activated_once() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = ControllerStateHandler::new(publisher.clone());

        handler.process(&state("UL1", false)).await.unwrap();
        handler.process(&state("UL1", false)).await.unwrap();
        handler.process(&state("UL2", false)).await.unwrap();

        let messages = publisher.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].topic, "cloudapp/QBUSMQTTGW/UL1/setState");
        assert_eq!(messages[1].topic, "cloudapp/QBUSMQTTGW/UL2/setState");

        let body: Value = serde_json::from_slice(&messages[0].payload).unwrap();
        assert_eq!(
            body,
            json!({"id": "UL1", "type": "action", "action": "activate", "properties": {"authKey": "ubielite"}})
        );
    }

    #[tokio::test]
    async fn connectable_or_unknown_controllers_are_left_alone() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = ControllerStateHandler::new(publisher.clone());

        handler.process(&state("UL1", true)).await.unwrap();
        handler
            .process(&InboundMessage::new("cloudapp/QBUSMQTTGW/UL3/state", r#"{"id":"UL3"}"#))
            .await
            .unwrap();

        assert!(publisher.messages().is_empty());
    }
}
