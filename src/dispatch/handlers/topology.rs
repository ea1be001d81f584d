//! Topology updates: persist, translate, request states, publish discovery.
//!
//! ```text
//! config ──► ConfigStore.save ──► MessageFactory (per entity)
//!                                      │
//!              getState(controllers) ◄─┤
//!              getState(entities)    ◄─┤  (only when something is announced)
//!              wait state_response_delay
//!              homeassistant/.../config (payloads and retractions)
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::discovery::{HaMessage, MessageFactory};
use crate::dispatch::{Handler, HandlerError};
use crate::mqtt::message_manager::{InboundMessage, OutboundMessage, PublishError, Publisher};
use crate::persistence::{ConfigStore, Topology};
use crate::refresh::GET_STATE_TOPIC;
use crate::settings::DiscoverySettings;

pub struct TopologyHandler {
    store: Arc<ConfigStore>,
    publisher: Arc<dyn Publisher>,
    factory: MessageFactory,
    settings: DiscoverySettings,
}

impl TopologyHandler {
    pub fn new(
        store: Arc<ConfigStore>,
        publisher: Arc<dyn Publisher>,
        factory: MessageFactory,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            store,
            publisher,
            factory,
            settings,
        }
    }

    fn request_states(&self, ids: &[String]) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(ids)?;
        self.publisher
            .publish(OutboundMessage::command(GET_STATE_TOPIC, payload))
    }
}

#[async_trait]
impl Handler for TopologyHandler {
    fn name(&self) -> &str {
        "topology"
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), HandlerError> {
        let topology: Topology =
            serde_json::from_slice(&msg.payload).map_err(|e| HandlerError::payload(msg, e))?;

        if topology.entity_count() == 0 {
            warn!("Topology without entities received, ignoring");
            return Ok(());
        }

        info!(
            "Topology received: {} controllers, {} entities",
            topology.devices.len(),
            topology.entity_count()
        );
        let controller_ids: Vec<String> = topology.devices.iter().map(|c| c.id.clone()).collect();

        if let Err(e) = self.store.save(&msg.payload, topology).await {
            error!("Failed to persist topology, continuing with cached copy: {}", e);
        }

        let mut messages: Vec<HaMessage> = Vec::new();
        let mut entity_ids: Vec<String> = Vec::new();
        for (entity, controller) in self.store.entities_with_controller().await? {
            let created = self.factory.create(&entity, &controller, &self.settings);
            if !created.is_empty() {
                entity_ids.push(entity.id.clone());
                messages.extend(created);
            }
        }

        self.request_states(&controller_ids)?;
        if entity_ids.is_empty() {
            info!("No supported entities in topology, nothing to announce");
            return Ok(());
        }
        self.request_states(&entity_ids)?;

        let delay = Duration::from_secs(self.settings.state_response_delay_secs);
        if !delay.is_zero() {
            debug!("Waiting {}s for entity states", delay.as_secs());
            tokio::time::sleep(delay).await;
        }

        let mut failed = 0;
        for message in &messages {
            let published = message
                .to_outbound()
                .and_then(|outbound| self.publisher.publish(outbound));
            if let Err(e) = published {
                failed += 1;
                error!("Discovery for {} not published: {}", message.topic, e);
            }
        }

        info!(
            "Published {} discovery messages ({} failed) for {} entities",
            messages.len() - failed,
            failed,
            entity_ids.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{controller, entity, RecordingPublisher};

    fn topology() -> Topology {
        Topology {
            app: Some("qbus".to_string()),
            version: Some("1.0".to_string()),
            devices: vec![
                controller(
                    "UL1",
                    vec![entity("UL60", "thermo", "1/60"), entity("UL5", "audio", "1/5")],
                ),
                controller("UL2", vec![entity("UL15", "analog", "2/15")]),
            ],
        }
    }

    fn handler(dir: &tempfile::TempDir) -> (TopologyHandler, Arc<RecordingPublisher>, Arc<ConfigStore>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(ConfigStore::new(dir.path()));
        let settings = DiscoverySettings {
            state_response_delay_secs: 0,
            ..DiscoverySettings::default()
        };
        let handler = TopologyHandler::new(store.clone(), publisher.clone(), MessageFactory::new(), settings);
        (handler, publisher, store)
    }

    #[tokio::test]
    async fn topology_is_saved_translated_and_published() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, publisher, store) = handler(&dir);
        let raw = serde_json::to_vec(&topology()).unwrap();

        handler
            .process(&InboundMessage::new("cloudapp/QBUSMQTTGW/config", raw.clone()))
            .await
            .unwrap();

        assert_eq!(*store.load().await.unwrap().unwrap(), topology());
        assert_eq!(std::fs::read(store.source_path()).unwrap(), raw);

        let messages = publisher.messages();
        assert_eq!(
            publisher.topics(),
            vec![
                GET_STATE_TOPIC,
                GET_STATE_TOPIC,
                "homeassistant/climate/qbus_UL1_60/config",
                "homeassistant/sensor/qbus_UL1_60_temperature/config",
                "homeassistant/light/qbus_UL2_15/config",
            ]
        );
        assert_eq!(messages[0].payload, br#"["UL1","UL2"]"#.to_vec());
        assert_eq!(messages[1].payload, br#"["UL60","UL15"]"#.to_vec());

        // Companion sensor is off by default and goes out as a retraction
        assert!(!messages[2].payload.is_empty());
        assert!(messages[3].payload.is_empty());
        assert!(messages[3].retain);
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_waits_for_state_responses() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(ConfigStore::new(dir.path()));
        let handler = Arc::new(TopologyHandler::new(
            store,
            publisher.clone(),
            MessageFactory::new(),
            DiscoverySettings::default(),
        ));
        let raw = serde_json::to_vec(&topology()).unwrap();

        let started = tokio::time::Instant::now();
        handler
            .process(&InboundMessage::new("cloudapp/QBUSMQTTGW/config", raw))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(publisher.messages().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_entities_skip_state_request_and_wait() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Arc::new(RecordingPublisher::default());
        let store = Arc::new(ConfigStore::new(dir.path()));
        let handler = TopologyHandler::new(
            store.clone(),
            publisher.clone(),
            MessageFactory::new(),
            DiscoverySettings::default(),
        );
        let audio_only = Topology {
            devices: vec![controller("UL1", vec![entity("UL5", "audio", "1/5")])],
            ..Topology::default()
        };

        let started = tokio::time::Instant::now();
        handler
            .process(&InboundMessage::new(
                "cloudapp/QBUSMQTTGW/config",
                serde_json::to_vec(&audio_only).unwrap(),
            ))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(publisher.topics(), vec![GET_STATE_TOPIC]);
        assert_eq!(publisher.messages()[0].payload, br#"["UL1"]"#.to_vec());
        assert_eq!(*store.load().await.unwrap().unwrap(), audio_only);
    }

    #[tokio::test]
    async fn empty_topology_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, publisher, store) = handler(&dir);
        let empty = Topology {
            devices: vec![controller("UL1", vec![])],
            ..Topology::default()
        };

        handler
            .process(&InboundMessage::new(
                "cloudapp/QBUSMQTTGW/config",
                serde_json::to_vec(&empty).unwrap(),
            ))
            .await
            .unwrap();

        assert!(publisher.messages().is_empty());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_topology_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, publisher, store) = handler(&dir);

        let result = handler
            .process(&InboundMessage::new("cloudapp/QBUSMQTTGW/config", "{\"devices\": 3}"))
            .await;

        assert!(matches!(result, Err(HandlerError::Payload { .. })));
        assert!(publisher.messages().is_empty());
        assert!(store.load().await.unwrap().is_none());
    }
}
