//! Entity to discovery message translation.
//!
//! Every supported entity type has one translator. A translator always builds every
//! message its type can produce; visibility rules then null out the payloads that must
//! not be shown so Home Assistant removes entities that were announced earlier.
//!
//! ```text
//! analog      -> light
//! onoff       -> switch + binary_sensor (one of both retracted)
//! gauge       -> sensor, or one sensor per value property
//! scene       -> scene
//! shutter     -> cover
//! thermo      -> climate + sensor "_temperature" (optional)
//! ventilation -> sensor (co2 only)
//! ```

use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use super::payload::{HaDevice, HaMessage, HaPayload};
use crate::persistence::{Controller, Entity};
use crate::settings::DiscoverySettings;

const TOPIC_PREFIX: &str = "cloudapp/QBUSMQTTGW";
const MANUFACTURER: &str = "Qbus";

const LIGHT_TO_BUS: f64 = 0.39215686;
const BUS_TO_LIGHT: f64 = 2.55;

/// Supported entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Analog,
    OnOff,
    Gauge,
    Scene,
    Shutter,
    Thermo,
    Ventilation,
}

const ENTITY_KINDS: [(&str, EntityKind); 7] = [
    ("analog", EntityKind::Analog),
    ("onoff", EntityKind::OnOff),
    ("gauge", EntityKind::Gauge),
    ("scene", EntityKind::Scene),
    ("shutter", EntityKind::Shutter),
    ("thermo", EntityKind::Thermo),
    ("ventilation", EntityKind::Ventilation),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Entity type '{0}' not (yet) supported")]
pub struct UnsupportedKind(pub String);

impl FromStr for EntityKind {
    type Err = UnsupportedKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ENTITY_KINDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s.trim()))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| UnsupportedKind(s.to_string()))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = ENTITY_KINDS
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("unknown");
        write!(f, "{}", name)
    }
}

/// Gauge variants with a fixed device class.
const GAUGE_VARIANTS: [(&str, &str); 7] = [
    ("Current", "current"),
    ("Energy", "energy"),
    ("Power", "power"),
    ("Temperature", "temperature"),
    ("Voltage", "voltage"),
    ("Volume", "volume_storage"),
    ("Water", "water"),
];

/// Gauge value properties that become their own sensor when the variant is unknown.
const GAUGE_VALUE_PROPERTIES: [&str; 2] = ["currentValue", "consumptionValue"];

/// Extracts the group part of a bus address: `12/34` -> `34`, `12/34/56` -> `34-56`.
///
/// Anything else yields an empty string.
pub fn parse_ref_id(ref_id: &str) -> String {
    static REF_ID: OnceLock<Regex> = OnceLock::new();
    let regex = REF_ID.get_or_init(|| {
        Regex::new(r"^\d+/(\d+(?:/\d+)?)$").unwrap_or_else(|_| unreachable!("static pattern"))
    });

    regex
        .captures(ref_id)
        .and_then(|captures| captures.get(1))
        .map(|group| group.as_str().replace('/', "-"))
        .unwrap_or_default()
}

/// Converts `consumptionValue` to `consumption_value`.
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (index, ch) in key.chars().enumerate() {
        if ch.is_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Stateless translator from bus entities to discovery messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageFactory;

impl MessageFactory {
    pub fn new() -> Self {
        Self
    }

    /// All discovery messages for `entity`, retractions included.
    ///
    /// Unsupported types and variants log a warning and produce nothing.
    pub fn create(
        &self,
        entity: &Entity,
        controller: &Controller,
        settings: &DiscoverySettings,
    ) -> Vec<HaMessage> {
        let kind = match entity.kind.parse::<EntityKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("{} (entity {})", e, entity.id);
                return Vec::new();
            }
        };

        let ctx = Context {
            entity,
            controller,
            settings,
        };

        let messages = match kind {
            EntityKind::Analog => vec![ctx.light()],
            EntityKind::OnOff => ctx.onoff(),
            EntityKind::Gauge => ctx.gauge(),
            EntityKind::Scene => vec![ctx.scene()],
            EntityKind::Shutter => vec![ctx.cover()],
            EntityKind::Thermo => ctx.thermo(),
            EntityKind::Ventilation => ctx.ventilation().into_iter().collect(),
        };

        for message in &messages {
            match &message.payload {
                Some(payload) => debug!("Adding entity {}", payload.unique_id),
                None => debug!("Entity {} marked for removal", message.topic),
            }
        }
        messages
    }
}

struct Context<'a> {
    entity: &'a Entity,
    controller: &'a Controller,
    settings: &'a DiscoverySettings,
}

impl Context<'_> {
    fn state_topic(&self) -> String {
        format!("{}/{}/{}/state", TOPIC_PREFIX, self.controller.id, self.entity.id)
    }

    fn command_topic(&self) -> String {
        format!("{}/{}/{}/setState", TOPIC_PREFIX, self.controller.id, self.entity.id)
    }

    /// `{"id": .., "type": "state", "properties": {key: value}}` for this entity.
    fn state_command(&self, key: &str, value: Value) -> String {
        json!({ "id": self.entity.id, "type": "state", "properties": { key: value } }).to_string()
    }

    fn action_command(&self, action: &str) -> String {
        json!({ "id": self.entity.id, "type": "action", "action": action }).to_string()
    }

    fn base(&self, domain: &str, id_suffix: &str) -> HaMessage {
        let ref_id = parse_ref_id(&self.entity.ref_id);
        let unique_id = format!("qbus_{}_{}{}", self.controller.id, ref_id, id_suffix);
        let state_topic = self.state_topic();

        let device = HaDevice {
            identifiers: self.controller.serial_nr.clone(),
            name: MANUFACTURER.to_string(),
            manufacturer: MANUFACTURER.to_string(),
            model: self.controller.serial_nr.clone(),
            sw_version: self.controller.version.clone(),
        };

        let json_attributes_template = format!(
            "{{ \"controller_id\": \"{}\", \"entity_id\": \"{{{{ value_json.id }}}}\", \"ref_id\": \"{}\" }}",
            self.controller.id, ref_id
        );

        let payload = HaPayload {
            name: self.entity.name.clone(),
            unique_id: unique_id.clone(),
            object_id: unique_id,
            device,
            state_topic: state_topic.clone(),
            command_topic: (!domain.ends_with("sensor")).then(|| self.command_topic()),
            json_attributes_topic: state_topic,
            json_attributes_template,
            ..HaPayload::default()
        };

        HaMessage::new(domain, payload)
    }

    fn light(&self) -> HaMessage {
        let mut message = self.base("light", "");
        let id = &self.entity.id;

        if let Some(payload) = message.payload.as_mut() {
            payload
                .set("schema", "template")
                .set(
                    "brightness_template",
                    format!(
                        "{{{{ value_json.properties.value | float | multiply({}) | round(0) }}}}",
                        BUS_TO_LIGHT
                    ),
                )
                .set("command_off_template", self.state_command("value", json!(0)))
                .set(
                    "command_on_template",
                    format!(
                        "{{%- if brightness is defined -%}} {{\"id\": \"{id}\", \"type\": \"state\", \"properties\": {{\"value\": {{{{ brightness | float | multiply({factor}) | round(0) }}}}}}}} {{%- else -%}} {} {{%- endif -%}}",
                        self.state_command("value", json!(100)),
                        id = id,
                        factor = LIGHT_TO_BUS,
                    ),
                )
                .set(
                    "state_template",
                    "{% if value_json.properties.value > 0 %} on {% else %} off {% endif %}",
                );
        }
        message
    }

    fn onoff(&self) -> Vec<HaMessage> {
        let mut switch = self.base("switch", "");
        if let Some(payload) = switch.payload.as_mut() {
            payload
                .set("payload_on", self.state_command("value", json!(true)))
                .set("payload_off", self.state_command("value", json!(false)))
                .set("value_template", "{{ value_json['properties']['value'] }}")
                .set("state_on", true)
                .set("state_off", false);
        }

        let mut binary_sensor = self.base("binary_sensor", "");
        if let Some(payload) = binary_sensor.payload.as_mut() {
            payload
                .set("value_template", "{{ value_json['properties']['value'] }}")
                .set("payload_on", true)
                .set("payload_off", false);
        }

        if self.is_binary_sensor() {
            switch.retract();
        } else {
            binary_sensor.retract();
        }

        vec![switch, binary_sensor]
    }

    /// Whether the allow-list names this entity by id, name, raw or parsed ref id.
    fn is_binary_sensor(&self) -> bool {
        let parsed = parse_ref_id(&self.entity.ref_id);
        let candidates = [
            self.entity.id.as_str(),
            self.entity.name.as_str(),
            self.entity.ref_id.as_str(),
            parsed.as_str(),
        ];

        self.settings
            .binary_sensors
            .iter()
            .map(|listed| listed.trim())
            .filter(|listed| !listed.is_empty())
            .any(|listed| {
                candidates
                    .iter()
                    .any(|candidate| !candidate.is_empty() && candidate.eq_ignore_ascii_case(listed))
            })
    }

    fn gauge(&self) -> Vec<HaMessage> {
        let device_class = self
            .entity
            .variant
            .as_ref()
            .and_then(|variant| variant.as_single())
            .and_then(|name| {
                GAUGE_VARIANTS
                    .iter()
                    .find(|(variant, _)| variant.eq_ignore_ascii_case(name.trim()))
                    .map(|(_, class)| *class)
            });

        if let Some(device_class) = device_class {
            return vec![self.gauge_variant_sensor(device_class)];
        }

        if !GAUGE_VALUE_PROPERTIES
            .iter()
            .any(|key| self.entity.has_property(key))
        {
            warn!(
                "Gauge {} with variant {:?} not (yet) supported",
                self.entity.id, self.entity.variant
            );
            return Vec::new();
        }

        // Sensors for absent value properties are retracted
        GAUGE_VALUE_PROPERTIES
            .iter()
            .map(|key| {
                let mut message = self.gauge_property_sensor(key);
                if !self.entity.has_property(key) {
                    message.retract();
                }
                message
            })
            .collect()
    }

    fn gauge_variant_sensor(&self, device_class: &str) -> HaMessage {
        let mut message = self.base("sensor", "");
        let unit = self
            .entity
            .property_unit("currentValue")
            .map(|unit| normalize_unit(unit, Some(device_class)));

        if let Some(payload) = message.payload.as_mut() {
            payload.set("value_template", "{{ value_json['properties']['currentValue'] }}");
            if let Some(unit) = &unit {
                payload.set("unit_of_measurement", unit.as_str());
            }
            payload
                .set("device_class", device_class)
                .set("suggested_display_precision", 2)
                .set("state_class", state_class(unit.as_deref()));
        }
        message
    }

    fn gauge_property_sensor(&self, key: &str) -> HaMessage {
        let snake = snake_case(key);
        let mut message = self.base("sensor", &format!("_{}", snake));
        let device_class = self.entity.property_unit(key).and_then(device_class_for_unit);
        let unit = self
            .entity
            .property_unit(key)
            .map(|unit| normalize_unit(unit, device_class));

        if let Some(payload) = message.payload.as_mut() {
            payload.name = format!("{} {}", self.entity.name, snake);
            payload.set(
                "value_template",
                format!("{{{{ value_json['properties']['{}'] }}}}", key),
            );
            if let Some(unit) = &unit {
                payload.set("unit_of_measurement", unit.as_str());
            }
            if let Some(device_class) = device_class {
                payload.set("device_class", device_class);
            }
            payload
                .set("suggested_display_precision", 2)
                .set("state_class", state_class(unit.as_deref()));
        }
        message
    }

    fn scene(&self) -> HaMessage {
        let mut message = self.base("scene", "");
        if let Some(payload) = message.payload.as_mut() {
            payload.set("payload_on", self.action_command("active"));
        }
        message
    }

    fn cover(&self) -> HaMessage {
        let mut message = self.base("cover", "");
        let state_topic = self.state_topic();
        let command_topic = self.command_topic();
        let entity = self.entity;

        let Some(payload) = message.payload.as_mut() else {
            return message;
        };

        if entity.has_property("state") {
            payload
                .set("payload_open", self.state_command("state", json!("up")))
                .set("payload_close", self.state_command("state", json!("down")))
                .set("state_opening", "up")
                .set("state_closing", "down")
                .set("value_template", "{{ value_json['properties']['state'] }}");
        }

        if entity.has_action("shutterStop") {
            payload
                .set("payload_stop", self.action_command("shutterStop"))
                .set("state_stopped", "stop");
        }

        if entity.has_property("shutterPosition") {
            if !entity.has_property("state") {
                payload
                    .set("payload_open", self.state_command("shutterPosition", json!(100)))
                    .set("payload_close", self.state_command("shutterPosition", json!(0)));
            }
            payload
                .set("position_open", 100)
                .set("position_closed", 0)
                .set("position_topic", state_topic.as_str())
                .set(
                    "position_template",
                    "{{ value_json['properties']['shutterPosition'] }}",
                )
                .set("set_position_topic", command_topic.as_str())
                .set(
                    "set_position_template",
                    format!(
                        "{{\"id\": \"{}\", \"type\": \"state\", \"properties\": {{\"shutterPosition\": {{{{ position | float | round(0) }}}}}}}}",
                        entity.id
                    ),
                );
        }

        if entity.has_property("slatPosition") {
            payload
                .set("tilt_opened_value", 100)
                .set("tilt_closed_value", 0)
                .set("tilt_status_topic", state_topic.as_str())
                .set(
                    "tilt_status_template",
                    "{{ value_json['properties']['slatPosition'] }}",
                )
                .set("tilt_command_topic", command_topic.as_str())
                .set(
                    "tilt_command_template",
                    format!(
                        "{{\"id\": \"{}\", \"type\": \"state\", \"properties\": {{\"slatPosition\": {{{{ tilt_position | float | round(0) }}}}}}}}",
                        entity.id
                    ),
                );
        }

        message
    }

    fn thermo(&self) -> Vec<HaMessage> {
        let climate = self.climate();

        let mut sensor = self.base("sensor", "_temperature");
        if let Some(payload) = sensor.payload.as_mut() {
            payload
                .set("device_class", "temperature")
                .set("unit_of_measurement", "°C")
                .set("state_class", "measurement")
                .set(
                    "value_template",
                    "{%- if value_json.properties.currTemp is defined -%} {{ value_json.properties.currTemp }} {%- endif -%}",
                );
        }

        if !self.settings.climate_sensors {
            sensor.retract();
        }

        vec![climate, sensor]
    }

    fn climate(&self) -> HaMessage {
        let mut message = self.base("climate", "");
        let state_topic = self.state_topic();
        let command_topic = self.command_topic();

        if let Some(payload) = message.payload.as_mut() {
            payload
                .set("temperature_unit", "C")
                .set("precision", 0.1)
                .set("temp_step", 0.5)
                .set("current_temperature_topic", state_topic.as_str())
                .set(
                    "current_temperature_template",
                    "{%- if value_json.properties.currTemp is defined -%} {{ value_json.properties.currTemp }} {%- endif -%}",
                )
                .set("modes", json!(["heat", "off"]))
                .set("mode_state_topic", state_topic.as_str())
                .set(
                    "mode_state_template",
                    "{%- if value_json.properties.setTemp is defined and value_json.properties.currTemp is defined -%} {%- if value_json.properties.setTemp > value_json.properties.currTemp -%} heat {%- else -%} off {%- endif -%} {%- else -%} off {%- endif -%}",
                )
                .set("preset_modes", json!(self.settings.climate_presets))
                .set("preset_mode_command_topic", command_topic.as_str())
                .set(
                    "preset_mode_command_template",
                    format!(
                        "{{\"id\": \"{}\", \"type\": \"state\", \"properties\": {{\"currRegime\": \"{{{{ value }}}}\"}}}}",
                        self.entity.id
                    ),
                )
                .set("preset_mode_state_topic", state_topic.as_str())
                .set(
                    "preset_mode_value_template",
                    "{%- if value_json.properties.currRegime is defined -%} {{ value_json.properties.currRegime }} {%- endif -%}",
                )
                .set("temperature_command_topic", command_topic.as_str())
                .set(
                    "temperature_command_template",
                    format!(
                        "{{\"id\": \"{}\", \"type\": \"state\", \"properties\": {{\"setTemp\": {{{{ value }}}}}}}}",
                        self.entity.id
                    ),
                )
                .set("temperature_state_topic", state_topic.as_str())
                .set(
                    "temperature_state_template",
                    "{%- if value_json.properties.setTemp is defined -%} {{ value_json.properties.setTemp }} {%- endif -%}",
                );
        }
        message
    }

    fn ventilation(&self) -> Option<HaMessage> {
        if !self.entity.has_property("co2") {
            debug!("Ventilation {} has no co2 property, skipping", self.entity.id);
            return None;
        }

        let mut message = self.base("sensor", "");
        let unit = self.entity.property_unit("co2").map(str::to_string);

        if let Some(payload) = message.payload.as_mut() {
            payload
                .set("device_class", "carbon_dioxide")
                .set("state_class", "measurement")
                .set("value_template", "{{ value_json['properties']['co2'] }}");
            if let Some(unit) = unit {
                payload.set("unit_of_measurement", unit);
            }
        }
        Some(message)
    }
}

/// Upper-cases `l` for water and volume sensors.
fn normalize_unit(unit: &str, device_class: Option<&str>) -> String {
    match device_class {
        Some("water") | Some("volume_storage") if unit == "l" => "L".to_string(),
        _ => unit.to_string(),
    }
}

fn state_class(unit: Option<&str>) -> &'static str {
    match unit {
        Some("kWh") | Some("L") => "total",
        _ => "measurement",
    }
}

fn device_class_for_unit(unit: &str) -> Option<&'static str> {
    match unit {
        "kWh" | "Wh" => Some("energy"),
        "W" | "kW" => Some("power"),
        "l" | "L" | "m³" | "m3" => Some("water"),
        "V" => Some("voltage"),
        "A" => Some("current"),
        "°C" => Some("temperature"),
        _ => None,
    }
}
