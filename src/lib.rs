//! Bridge between the Qbus MQTT gateway and Home Assistant MQTT discovery.

pub mod discovery;
pub mod dispatch;
pub mod mqtt;
pub mod persistence;
pub mod refresh;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;
