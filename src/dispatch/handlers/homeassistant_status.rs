use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::request_config;
use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::{InboundMessage, Publisher};

/// Re-requests the topology when Home Assistant comes back online, so discovery is
/// republished after a restart.
pub struct HomeAssistantStatusHandler {
    publisher: Arc<dyn Publisher>,
}

impl HomeAssistantStatusHandler {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Handler for HomeAssistantStatusHandler {
    fn name(&self) -> &str {
        "homeassistant_status"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        if msg.payload_str().trim() != "online" {
            debug!("Home Assistant status '{}' ignored", msg.payload_str().trim());
            return Ok(());
        }

        info!("Home Assistant online, requesting topology");
        request_config(self.publisher.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::handlers::GET_CONFIG_TOPIC;
    use crate::test_support::RecordingPublisher;

    #[tokio::test]
    async fn online_requests_config() {
        let publisher = Arc::new(RecordingPublisher::default());
        let handler = HomeAssistantStatusHandler::new(publisher.clone());

        handler
            .process(&InboundMessage::new("homeassistant/status", "offline"))
            .await
            .unwrap();
        assert!(publisher.messages().is_empty());

        handler
            .process(&InboundMessage::new("homeassistant/status", "online"))
            .await
            .unwrap();
        let messages = publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic, GET_CONFIG_TOPIC);
        assert!(messages[0].payload.is_empty());
        assert!(!messages[0].retain);
    }
}
