//! Start-up settings: a TOML file overlaid with environment variables.
//!
//! ```toml
//! data_dir = "/data"
//! log_level = "debug"
//!
//! [mqtt]
//! host = "broker.local"
//!
//! [discovery]
//! binary_sensors = ["UL20", "Door Contact"]
//!
//! [refresh]
//! interval_ms = 2000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use crate::mqtt::config::MqttConfig;

const SETTINGS_ENV: &str = "QBHA_SETTINGS";
const APP_DIR: &str = "qbha";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Where the loaded settings came from.
///
/// Loading runs before the log subscriber exists, so the outcome is returned and
/// reported once logging is set up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsSource {
    File(PathBuf),
    Defaults(PathBuf),
}

impl SettingsSource {
    pub fn report(&self) {
        match self {
            SettingsSource::File(path) => info!("Loaded settings from {}", path.display()),
            SettingsSource::Defaults(path) => {
                warn!("Settings file {} does not exist, using defaults", path.display())
            }
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub mqtt: MqttConfig,
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Log every gateway message under the `qbha::capture` target.
    pub capture: bool,
    pub discovery: DiscoverySettings,
    pub refresh: RefreshSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig::default(),
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            capture: false,
            discovery: DiscoverySettings::default(),
            refresh: RefreshSettings::default(),
        }
    }
}

/// Options that shape the generated discovery messages.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Publish a separate temperature sensor next to each thermostat.
    pub climate_sensors: bool,
    pub climate_presets: Vec<String>,
    /// On/off outputs (id, name, ref id or parsed ref id) shown as binary sensors.
    pub binary_sensors: Vec<String>,
    /// Wait between requesting entity states and publishing discovery.
    pub state_response_delay_secs: u64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            climate_sensors: false,
            climate_presets: ["MANUAL", "FREEZE", "ECONOMY", "COMFORT", "NIGHT"]
                .into_iter()
                .map(String::from)
                .collect(),
            binary_sensors: Vec::new(),
            state_response_delay_secs: 10,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RefreshSettings {
    pub interval_ms: u64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Settings {
    /// Reads the settings file and applies the process environment on top.
    pub async fn load() -> Result<(Self, SettingsSource), SettingsError> {
        let path = settings_path();
        let (mut settings, source) = Self::from_file(&path).await?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok((settings, source))
    }

    /// Defaults when `path` does not exist.
    pub async fn from_file(path: &Path) -> Result<(Self, SettingsSource), SettingsError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::default(), SettingsSource::Defaults(path.to_path_buf())));
            }
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok((settings, SettingsSource::File(path.to_path_buf())))
    }

    /// Overlays environment style variables resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("MQTT_HOST") {
            self.mqtt.host = host.trim().to_string();
        }
        if let Some(port) = get("MQTT_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) if port > 0 => self.mqtt.port = port,
                _ => warn!("Ignoring invalid MQTT_PORT '{}'", port),
            }
        }
        if let Some(user) = get("MQTT_USER") {
            self.mqtt.user = Some(user);
        }
        if let Some(password) = get("MQTT_PWD") {
            self.mqtt.password = Some(password);
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level.trim().to_string();
        }
        if let Some(capture) = get("QBUS_CAPTURE") {
            self.capture = is_enabled(&capture);
        }
        if let Some(dir) = get("QBHA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(enabled) = get("CLIMATE_SENSORS") {
            self.discovery.climate_sensors = is_enabled(&enabled);
        }
        if let Some(presets) = get("CLIMATE_PRESETS") {
            self.discovery.climate_presets = split_list(&presets);
        }
        if let Some(sensors) = get("BINARY_SENSORS") {
            self.discovery.binary_sensors = split_list(&sensors);
        }
    }

    /// Maximum log level, `info` when the configured name is unknown.
    pub fn level(&self) -> Level {
        self.log_level.trim().parse::<Level>().unwrap_or(Level::INFO)
    }
}

fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path.trim());
        }
    }

    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
        .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
}

fn default_data_dir() -> PathBuf {
    if Path::new("/.dockerenv").exists() {
        return PathBuf::from("/data");
    }

    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("data"))
}

fn is_enabled(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.mqtt.host, "localhost");
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.log_level, "info");
        assert!(!settings.capture);
        assert!(!settings.discovery.climate_sensors);
        assert_eq!(
            settings.discovery.climate_presets,
            vec!["MANUAL", "FREEZE", "ECONOMY", "COMFORT", "NIGHT"]
        );
        assert!(settings.discovery.binary_sensors.is_empty());
        assert_eq!(settings.discovery.state_response_delay_secs, 10);
        assert_eq!(settings.refresh.interval_ms, 2000);
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut settings = Settings::default();
        settings.apply_overrides(lookup(&[
            ("MQTT_HOST", " broker.local "),
            ("MQTT_PORT", "8883"),
            ("MQTT_USER", "qbus"),
            ("MQTT_PWD", "secret"),
            ("LOG_LEVEL", "debug"),
            ("QBUS_CAPTURE", "1"),
            ("QBHA_DATA_DIR", "/tmp/qbha"),
            ("CLIMATE_SENSORS", "TRUE"),
            ("CLIMATE_PRESETS", "MANUAL, ,NIGHT"),
            ("BINARY_SENSORS", "UL20,Door Contact ,"),
        ]));

        assert_eq!(settings.mqtt.host, "broker.local");
        assert_eq!(settings.mqtt.port, 8883);
        assert_eq!(settings.mqtt.user.as_deref(), Some("qbus"));
        assert_eq!(settings.mqtt.password.as_deref(), Some("secret"));
        assert_eq!(settings.level(), Level::DEBUG);
        assert!(settings.capture);
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/qbha"));
        assert!(settings.discovery.climate_sensors);
        assert_eq!(settings.discovery.climate_presets, vec!["MANUAL", "NIGHT"]);
        assert_eq!(settings.discovery.binary_sensors, vec!["UL20", "Door Contact"]);
    }

    #[test]
    fn invalid_port_and_blank_values_are_ignored() {
        let mut settings = Settings::default();
        settings.apply_overrides(lookup(&[("MQTT_PORT", "0"), ("MQTT_HOST", "  ")]));
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.mqtt.host, "localhost");

        settings.apply_overrides(lookup(&[("MQTT_PORT", "abc"), ("CLIMATE_SENSORS", "no")]));
        assert_eq!(settings.mqtt.port, 1883);
        assert!(!settings.discovery.climate_sensors);
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let settings = Settings {
            log_level: "chatty".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.level(), Level::INFO);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let (settings, source) = Settings::from_file(&path).await.unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(source, SettingsSource::Defaults(path));
    }

    #[tokio::test]
    async fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(
            &path,
            "capture = true\n\n[mqtt]\nhost = \"10.0.0.2\"\n\n[discovery]\nbinary_sensors = [\"UL20\"]\n",
        )
        .unwrap();

        let (settings, source) = Settings::from_file(&path).await.unwrap();
        assert_eq!(source, SettingsSource::File(path.clone()));
        assert!(settings.capture);
        assert_eq!(settings.mqtt.host, "10.0.0.2");
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.discovery.binary_sensors, vec!["UL20"]);
        assert_eq!(settings.discovery.state_response_delay_secs, 10);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "[mqtt\nhost = ").unwrap();

        assert!(matches!(
            Settings::from_file(&path).await,
            Err(SettingsError::Parse { .. })
        ));
    }
}
