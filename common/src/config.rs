use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::schedule::NightWindow;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("zone name must not be empty")]
    EmptyZoneName,
    #[error("zone name {0:?} must not contain '/'")]
    InvalidZoneName(String),
    #[error("no zone declares a central climate entity")]
    NoCentralThermostat,
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    #[serde(default)]
    pub covers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub climate: Option<String>,
    /// Virtual per-zone thermostat whose `temperature` attribute is the zone setpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermostat: Option<String>,
    #[serde(default)]
    pub connectivities: Vec<String>,
    #[serde(default)]
    pub bedroom: bool,
}

impl ZoneConfig {
    pub fn is_valid(&self) -> bool {
        !self.covers.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseConfig {
    #[serde(default, alias = "areas")]
    pub zones: BTreeMap<String, ZoneConfig>,
    pub bed_time: NaiveTime,
    pub wake_time: NaiveTime,
    #[serde(default)]
    pub control_central_thermostat: bool,
}

impl Default for HouseConfig {
    fn default() -> Self {
        Self {
            zones: BTreeMap::new(),
            bed_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            wake_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            control_central_thermostat: false,
        }
    }
}

impl HouseConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.resolve_zone_thermostats();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.zones.keys() {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyZoneName);
            }
            if name.contains('/') {
                return Err(ConfigError::InvalidZoneName(name.clone()));
            }
        }
        if self.central_thermostat().is_none() {
            return Err(ConfigError::NoCentralThermostat);
        }
        Ok(())
    }

    /// Zones whose dampers can actually be driven; every other zone is dropped.
    pub fn filter_to_valid_zones(&self) -> HouseConfig {
        let (valid, invalid): (BTreeMap<_, _>, BTreeMap<_, _>) = self
            .zones
            .iter()
            .map(|(name, zone)| (name.clone(), zone.clone()))
            .partition(|(_, zone)| zone.is_valid());

        if !invalid.is_empty() {
            let names: Vec<&String> = invalid.keys().collect();
            info!("filtered out zones {names:?} (no covers configured)");
        }

        HouseConfig {
            zones: valid,
            ..self.clone()
        }
    }

    /// The central unit: first `climate` declared across zones, in iteration order.
    pub fn central_thermostat(&self) -> Option<&str> {
        self.climate_entity_ids().into_iter().next()
    }

    pub fn climate_entity_ids(&self) -> Vec<&str> {
        self.zones
            .values()
            .filter_map(|zone| zone.climate.as_deref())
            .collect()
    }

    pub fn zone_thermostat_ids(&self) -> Vec<&str> {
        self.zones
            .values()
            .filter_map(|zone| zone.thermostat.as_deref())
            .collect()
    }

    pub fn connectivity_entity_ids(&self) -> Vec<&str> {
        self.zones
            .values()
            .flat_map(|zone| zone.connectivities.iter().map(String::as_str))
            .collect()
    }

    pub fn cover_entity_ids(&self) -> Vec<&str> {
        self.zones
            .values()
            .flat_map(|zone| zone.covers.iter().map(String::as_str))
            .collect()
    }

    pub fn night_window(&self) -> NightWindow {
        NightWindow::new(self.bed_time, self.wake_time)
    }

    /// Records the virtual thermostat of every zone that did not name one.
    pub fn resolve_zone_thermostats(&mut self) {
        for (name, zone) in self.zones.iter_mut() {
            if zone.thermostat.is_none() {
                zone.thermostat = Some(default_zone_thermostat_id(name));
            }
        }
    }
}

pub fn default_zone_thermostat_id(zone: &str) -> String {
    format!("climate.{zone}_thermostat")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub central_setpoint_step: f64,
    pub default_zone_target: f64,
    pub min_zone_target: f64,
    pub max_zone_target: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            central_setpoint_step: 2.0,
            default_zone_target: 72.0,
            min_zone_target: 45.0,
            max_zone_target: 95.0,
        }
    }
}

impl EngineConfig {
    pub fn sanitize(&mut self) {
        if !self.central_setpoint_step.is_finite() {
            self.central_setpoint_step = 2.0;
        }
        self.central_setpoint_step = self.central_setpoint_step.clamp(0.0, 10.0);

        if !self.min_zone_target.is_finite() || !self.max_zone_target.is_finite() {
            self.min_zone_target = 45.0;
            self.max_zone_target = 95.0;
        }
        if self.min_zone_target > self.max_zone_target {
            std::mem::swap(&mut self.min_zone_target, &mut self.max_zone_target);
        }

        if !self.default_zone_target.is_finite() {
            self.default_zone_target = 72.0;
        }
        self.default_zone_target = self
            .default_zone_target
            .clamp(self.min_zone_target, self.max_zone_target);
    }

    pub fn clamp_zone_target(&self, target: f64) -> f64 {
        target.clamp(self.min_zone_target, self.max_zone_target)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub house: HouseConfig,
    pub engine: EngineConfig,
    pub timezone: String,
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            house: HouseConfig::default(),
            engine: EngineConfig::default(),
            timezone: "America/Los_Angeles".to_string(),
            network: NetworkConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.engine.sanitize();
        self.house.resolve_zone_thermostats();
    }
}
