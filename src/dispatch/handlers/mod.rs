//! Bus and Home Assistant handlers with the patterns they are registered on.

pub mod capture;
pub mod controller_state;
pub mod entity_state;
pub mod gateway_state;
pub mod homeassistant_status;
pub mod topology;

pub use capture::CaptureHandler;
pub use controller_state::ControllerStateHandler;
pub use entity_state::EntityStateHandler;
pub use gateway_state::GatewayStateHandler;
pub use homeassistant_status::HomeAssistantStatusHandler;
pub use topology::TopologyHandler;

use crate::mqtt::message_manager::{OutboundMessage, PublishError, Publisher};

pub const TOPIC_PREFIX: &str = "cloudapp/QBUSMQTTGW";

pub const CAPTURE_PATTERN: &str = "cloudapp/QBUSMQTTGW/#";
pub const HOMEASSISTANT_STATUS_PATTERN: &str = "homeassistant/status";
pub const TOPOLOGY_PATTERN: &str = "cloudapp/QBUSMQTTGW/config";
pub const CONTROLLER_STATE_PATTERN: &str = "cloudapp/QBUSMQTTGW/+/state";
pub const ENTITY_STATE_PATTERN: &str = "cloudapp/QBUSMQTTGW/+/+/state";
pub const GATEWAY_STATE_PATTERN: &str = "cloudapp/QBUSMQTTGW/state";

pub const GET_CONFIG_TOPIC: &str = "cloudapp/QBUSMQTTGW/getConfig";

/// Asks the gateway to publish its topology.
pub(crate) fn request_config(publisher: &dyn Publisher) -> Result<(), PublishError> {
    publisher.publish(OutboundMessage::command(GET_CONFIG_TOPIC, Vec::new()))
}
