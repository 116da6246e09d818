use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

pub const ATTR_TEMPERATURE: &str = "temperature";
pub const ATTR_CURRENT_TEMPERATURE: &str = "current_temperature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    Off,
    Heat,
    Cool,
    HeatCool,
    Auto,
    Dry,
    FanOnly,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Cool => "cool",
            Self::HeatCool => "heat_cool",
            Self::Auto => "auto",
            Self::Dry => "dry",
            Self::FanOnly => "fan_only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "cool" => Some(Self::Cool),
            "heat_cool" => Some(Self::HeatCool),
            "auto" => Some(Self::Auto),
            "dry" => Some(Self::Dry),
            "fan_only" => Some(Self::FanOnly),
            _ => None,
        }
    }

    /// Modes the engine knows how to balance zones against.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Heat | Self::Cool)
    }
}

/// Whether a zone (or the whole house) still needs conditioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Active,
    Idle,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Idle => "IDLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamperCommand {
    Open,
    Close,
}

impl DamperCommand {
    pub fn service(self) -> Service {
        match self {
            Self::Open => Service::OpenCover,
            Self::Close => Service::CloseCover,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "opening",
            Self::Close => "closing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Cover,
    Climate,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Climate => "climate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    OpenCover,
    CloseCover,
    SetTemperature,
}

impl Service {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenCover => "open_cover",
            Self::CloseCover => "close_cover",
            Self::SetTemperature => "set_temperature",
        }
    }
}

/// A single fire-and-forget command for the host platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: Domain,
    pub service: Service,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ServiceCall {
    pub fn cover(command: DamperCommand, entity_id: impl Into<String>) -> Self {
        Self {
            domain: Domain::Cover,
            service: command.service(),
            entity_id: entity_id.into(),
            temperature: None,
        }
    }

    pub fn set_temperature(entity_id: impl Into<String>, temperature: f64) -> Self {
        Self {
            domain: Domain::Climate,
            service: Service::SetTemperature,
            entity_id: entity_id.into(),
            temperature: Some(temperature),
        }
    }
}

/// Snapshot of one host entity: a state label plus its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub state: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl Reading {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn is_available(&self) -> bool {
        self.state != STATE_UNAVAILABLE && self.state != STATE_UNKNOWN
    }

    /// Numeric sensor value. Unavailable, unknown and malformed states are `None`.
    pub fn numeric_state(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        parse_finite(&self.state)
    }

    pub fn attribute_f64(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key)? {
            Value::Number(number) => number.as_f64().filter(|value| value.is_finite()),
            Value::String(raw) => parse_finite(raw),
            _ => None,
        }
    }

    pub fn hvac_mode(&self) -> Option<HvacMode> {
        HvacMode::parse(&self.state)
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_state_rejects_unavailable_and_garbage() {
        assert_eq!(Reading::new("68.5").numeric_state(), Some(68.5));
        assert_eq!(Reading::new(" 70 ").numeric_state(), Some(70.0));
        assert_eq!(Reading::new(STATE_UNAVAILABLE).numeric_state(), None);
        assert_eq!(Reading::new(STATE_UNKNOWN).numeric_state(), None);
        assert_eq!(Reading::new("warm").numeric_state(), None);
        assert_eq!(Reading::new("NaN").numeric_state(), None);
    }

    #[test]
    fn attribute_accepts_numbers_and_numeric_strings() {
        let reading = Reading::new("heat")
            .with_attribute(ATTR_TEMPERATURE, 70.9)
            .with_attribute(ATTR_CURRENT_TEMPERATURE, "65")
            .with_attribute("friendly_name", "Hall");

        assert_eq!(reading.attribute_f64(ATTR_TEMPERATURE), Some(70.9));
        assert_eq!(reading.attribute_f64(ATTR_CURRENT_TEMPERATURE), Some(65.0));
        assert_eq!(reading.attribute_f64("friendly_name"), None);
        assert_eq!(reading.attribute_f64("missing"), None);
    }

    #[test]
    fn hvac_mode_parses_host_labels() {
        assert_eq!(HvacMode::parse("heat"), Some(HvacMode::Heat));
        assert_eq!(HvacMode::parse("COOL"), Some(HvacMode::Cool));
        assert_eq!(HvacMode::parse("fan_only"), Some(HvacMode::FanOnly));
        assert_eq!(HvacMode::parse("unavailable"), None);
        assert!(HvacMode::Heat.is_supported());
        assert!(HvacMode::Cool.is_supported());
        assert!(!HvacMode::HeatCool.is_supported());
        assert!(!HvacMode::Off.is_supported());
    }

    #[test]
    fn service_call_serializes_without_empty_temperature() {
        let open = ServiceCall::cover(DamperCommand::Open, "cover.hall");
        let json = serde_json::to_value(&open).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "domain": "cover",
                "service": "open_cover",
                "entity_id": "cover.hall",
            })
        );

        let set = ServiceCall::set_temperature("climate.main", 67.0);
        assert_eq!(set.domain, Domain::Climate);
        assert_eq!(set.service.as_str(), "set_temperature");
        assert_eq!(set.temperature, Some(67.0));
    }
}
