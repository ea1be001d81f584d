use serde::{Deserialize, Serialize};

/// Broker connection settings.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            user: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: 60,
        }
    }
}

fn default_client_id() -> String {
    match std::env::var("HOSTNAME") {
        Ok(host) if !host.trim().is_empty() => format!("qbha-{}", host.trim()),
        _ => "qbha".to_string(),
    }
}
