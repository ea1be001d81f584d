//! # MQTT Integration Module
//!
//! Everything that touches the broker: connection settings, the message types that
//! cross the transport boundary, topic filter matching and the rumqttc event loop.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - broker connection settings
//! ├── message_manager.rs  - inbound/outbound messages and the Publisher seam
//! ├── mqtt_handler.rs     - connect, subscribe, availability, forward to dispatch
//! └── topic.rs            - MQTT topic filter matching
//! ```
//!
//! Publishing is fire-and-forget through [`message_manager::Publisher`]. Handlers never
//! await the broker, they only queue requests on the client.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topic;
