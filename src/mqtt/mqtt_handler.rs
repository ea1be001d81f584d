use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Packet, Publish, QoS,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::InboundMessage;

pub const AVAILABILITY_TOPIC: &str = "qbha/availability";
pub const ONLINE: &str = "online";
pub const OFFLINE: &str = "offline";

/// Capacity of the client's request queue. Discovery bursts are published without
/// waiting, so this bounds the largest topology that can go out in one go.
const REQUEST_CAPACITY: usize = 10_000;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
    Reconnecting,
}

/// Drives the broker connection and forwards publishes to the dispatcher.
pub struct MqttHandler {
    client: AsyncClient,
    eventloop: EventLoop,
    patterns: Vec<String>,
    inbound: mpsc::Sender<InboundMessage>,
    state: ConnectionState,
}

impl MqttHandler {
    /// Builds the client; nothing is sent until [`MqttHandler::run`] polls.
    pub fn new(config: &MqttConfig, inbound: mpsc::Sender<InboundMessage>) -> (Self, AsyncClient) {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CAPACITY);
        let handler = MqttHandler {
            client: client.clone(),
            eventloop,
            patterns: Vec::new(),
            inbound,
            state: ConnectionState::Disconnected,
        };
        (handler, client)
    }

    /// Polls until `cancel` fires. `patterns` are (re)subscribed on every connect.
    pub async fn run(mut self, patterns: Vec<String>, cancel: CancellationToken) {
        self.patterns = patterns;
        info!("MQTT transport started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // A full channel holds the transport back until dispatch catches up
                    if self.inbound.send(inbound_from(&publish)).await.is_err() {
                        warn!("Dispatcher gone, stopping transport");
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => self.on_error(e).await,
            }
        }

        self.shutdown().await;
    }

    fn on_connected(&mut self) {
        info!("Connected to broker (previous state {:?})", self.state);
        self.state = ConnectionState::Connected;

        if let Err(e) = self
            .client
            .try_publish(AVAILABILITY_TOPIC, QoS::AtLeastOnce, true, ONLINE)
        {
            error!("Failed to announce availability: {}", e);
        }

        for pattern in &self.patterns {
            match self.client.try_subscribe(pattern.as_str(), QoS::ExactlyOnce) {
                Ok(()) => debug!("Subscribed to {}", pattern),
                Err(e) => error!("Failed to subscribe to {}: {}", pattern, e),
            }
        }
    }

    async fn on_error(&mut self, e: ConnectionError) {
        if self.state == ConnectionState::Connected {
            warn!("Connection to broker lost: {}", e);
        } else {
            warn!("Broker unreachable: {}", e);
        }
        self.state = ConnectionState::Reconnecting;
        tokio::time::sleep(RETRY_DELAY).await;
    }

    async fn shutdown(mut self) {
        info!("Stopping MQTT transport");
        if self.state != ConnectionState::Connected {
            return;
        }

        if let Err(e) = self
            .client
            .try_publish(AVAILABILITY_TOPIC, QoS::AtLeastOnce, true, OFFLINE)
        {
            warn!("Failed to announce shutdown: {}", e);
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
            return;
        }

        // Flush the queued requests until the broker connection closes
        let flush = async {
            while self.eventloop.poll().await.is_ok() {}
        };
        if tokio::time::timeout(DISCONNECT_TIMEOUT, flush).await.is_err() {
            warn!("Broker did not acknowledge disconnect in time");
        }
        self.state = ConnectionState::Disconnected;
        info!("Disconnected from broker");
    }
}

pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options
        .set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)))
        .set_last_will(LastWill::new(AVAILABILITY_TOPIC, OFFLINE, QoS::AtLeastOnce, true));

    if let Some(user) = &config.user {
        options.set_credentials(user.clone(), config.password.clone().unwrap_or_default());
    }
    options
}

fn inbound_from(publish: &Publish) -> InboundMessage {
    InboundMessage::new(publish.topic.clone(), publish.payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_carry_will_and_credentials() {
        let config = MqttConfig {
            host: "broker.local".to_string(),
            port: 1884,
            user: Some("qbus".to_string()),
            password: None,
            client_id: "qbha-test".to_string(),
            keep_alive_secs: 30,
        };

        let options = mqtt_options(&config);
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1884));
        assert_eq!(options.client_id(), "qbha-test");
        assert_eq!(options.keep_alive(), Duration::from_secs(30));

        let will = options.last_will().unwrap();
        assert_eq!(will.topic, AVAILABILITY_TOPIC);
        assert_eq!(&will.message[..], OFFLINE.as_bytes());
        assert!(will.retain);
    }

    #[test]
    fn anonymous_connection_has_no_credentials() {
        let options = mqtt_options(&MqttConfig::default());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn publish_becomes_inbound_message() {
        let publish = Publish::new("cloudapp/QBUSMQTTGW/state", QoS::AtMostOnce, r#"{"online":true}"#);
        let msg = inbound_from(&publish);
        assert_eq!(msg.topic, "cloudapp/QBUSMQTTGW/state");
        assert_eq!(msg.payload, br#"{"online":true}"#.to_vec());
    }
}
