use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    config::HouseConfig,
    ports::{StateChanged, StateLookup},
    types::{Reading, ATTR_CURRENT_TEMPERATURE, ATTR_TEMPERATURE, STATE_UNKNOWN},
};

/// Per-zone virtual thermostat. It owns only the zone setpoint; the current
/// temperature comes from the zone sensor and the mode mirrors the central unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneThermostat {
    pub zone: String,
    pub entity_id: String,
    temperature_sensor: String,
    central_thermostat: String,
    target_temperature: f64,
}

impl ZoneThermostat {
    pub fn new(
        zone: impl Into<String>,
        entity_id: impl Into<String>,
        temperature_sensor: impl Into<String>,
        central_thermostat: impl Into<String>,
        target_temperature: f64,
    ) -> Self {
        Self {
            zone: zone.into(),
            entity_id: entity_id.into(),
            temperature_sensor: temperature_sensor.into(),
            central_thermostat: central_thermostat.into(),
            target_temperature,
        }
    }

    pub fn target_temperature(&self) -> f64 {
        self.target_temperature
    }

    pub fn set_target_temperature(&mut self, temperature: f64) -> bool {
        if !temperature.is_finite() || self.target_temperature == temperature {
            return false;
        }
        self.target_temperature = temperature;
        true
    }

    pub fn restore_target_temperature(&mut self, saved: Option<f64>) {
        if let Some(temperature) = saved {
            self.set_target_temperature(temperature);
        }
    }

    pub fn current_temperature(&self, states: &impl StateLookup) -> Option<f64> {
        states.get(&self.temperature_sensor)?.numeric_state()
    }

    pub fn hvac_mode(&self, states: &impl StateLookup) -> Option<String> {
        states.get(&self.central_thermostat).map(|reading| reading.state)
    }

    pub fn reading(&self, states: &impl StateLookup) -> Reading {
        let state = self
            .hvac_mode(states)
            .unwrap_or_else(|| STATE_UNKNOWN.to_string());
        let reading = Reading::new(state).with_attribute(ATTR_TEMPERATURE, self.target_temperature);
        match self.current_temperature(states) {
            Some(current) => reading.with_attribute(ATTR_CURRENT_TEMPERATURE, current),
            None => reading,
        }
    }

    /// Sensor updates only count when they carry a usable number.
    pub fn is_refresh_event(&self, event: &StateChanged) -> bool {
        if event.entity_id == self.central_thermostat {
            return true;
        }
        event.entity_id == self.temperature_sensor
            && event
                .new_state
                .as_ref()
                .and_then(Reading::numeric_state)
                .is_some()
    }
}

/// One virtual thermostat per valid zone that has a temperature sensor.
pub fn build_zone_thermostats(
    house: &HouseConfig,
    default_target: f64,
    saved_targets: &BTreeMap<String, f64>,
) -> Vec<ZoneThermostat> {
    let Some(central) = house.central_thermostat() else {
        return Vec::new();
    };

    let valid = house.filter_to_valid_zones();
    valid
        .zones
        .iter()
        .filter_map(|(name, zone)| {
            let sensor = zone.temperature.as_deref()?;
            let entity_id = zone.thermostat.as_deref()?;
            let mut thermostat =
                ZoneThermostat::new(name, entity_id, sensor, central, default_target);
            thermostat.restore_target_temperature(saved_targets.get(name).copied());
            Some(thermostat)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::ZoneConfig, ports::StateStore};

    fn thermostat() -> ZoneThermostat {
        ZoneThermostat::new(
            "basement",
            "climate.basement_thermostat",
            "sensor.basement_temperature",
            "climate.living_room_thermostat",
            72.0,
        )
    }

    #[test]
    fn reads_sensor_and_central_mode() {
        let mut states = StateStore::new();
        states.set("climate.living_room_thermostat", Reading::new("heat"));
        states.set("sensor.basement_temperature", Reading::new("68.5"));
        let thermostat = thermostat();

        assert_eq!(thermostat.target_temperature(), 72.0);
        assert_eq!(thermostat.current_temperature(&states), Some(68.5));
        assert_eq!(thermostat.hvac_mode(&states).as_deref(), Some("heat"));

        states.set("climate.living_room_thermostat", Reading::new("cool"));
        states.set("sensor.basement_temperature", Reading::new("69.0"));
        let reading = thermostat.reading(&states);
        assert_eq!(reading.state, "cool");
        assert_eq!(reading.attribute_f64(ATTR_TEMPERATURE), Some(72.0));
        assert_eq!(reading.attribute_f64(ATTR_CURRENT_TEMPERATURE), Some(69.0));
    }

    #[test]
    fn missing_entities_leave_reading_partial() {
        let states = StateStore::new();
        let thermostat = thermostat();

        assert_eq!(thermostat.current_temperature(&states), None);
        assert_eq!(thermostat.hvac_mode(&states), None);

        let reading = thermostat.reading(&states);
        assert_eq!(reading.state, STATE_UNKNOWN);
        assert_eq!(reading.attribute_f64(ATTR_TEMPERATURE), Some(72.0));
        assert!(!reading.attributes.contains_key(ATTR_CURRENT_TEMPERATURE));
    }

    #[test]
    fn set_and_restore_target() {
        let mut thermostat = thermostat();

        assert!(thermostat.set_target_temperature(75.0));
        assert!(!thermostat.set_target_temperature(75.0));
        assert!(!thermostat.set_target_temperature(f64::NAN));
        assert_eq!(thermostat.target_temperature(), 75.0);

        thermostat.restore_target_temperature(Some(68.0));
        assert_eq!(thermostat.target_temperature(), 68.0);
        thermostat.restore_target_temperature(None);
        assert_eq!(thermostat.target_temperature(), 68.0);
    }

    #[test]
    fn refreshes_on_valid_sensor_or_central_change() {
        let thermostat = thermostat();
        let event = |entity_id: &str, state: &str| StateChanged {
            entity_id: entity_id.to_string(),
            old_state: None,
            new_state: Some(Reading::new(state)),
        };

        assert!(thermostat.is_refresh_event(&event("sensor.basement_temperature", "67.2")));
        assert!(!thermostat.is_refresh_event(&event("sensor.basement_temperature", "unavailable")));
        assert!(thermostat.is_refresh_event(&event("climate.living_room_thermostat", "off")));
        assert!(!thermostat.is_refresh_event(&event("sensor.kitchen_temperature", "70")));
    }

    #[test]
    fn builds_for_valid_zones_with_sensors() {
        let mut house = HouseConfig::default();
        house.zones.insert(
            "basement".to_string(),
            ZoneConfig {
                covers: vec!["cover.basement".to_string()],
                temperature: Some("sensor.basement_temperature".to_string()),
                climate: Some("climate.living_room_thermostat".to_string()),
                ..ZoneConfig::default()
            },
        );
        house.zones.insert(
            "closet".to_string(),
            ZoneConfig {
                covers: vec!["cover.closet".to_string()],
                ..ZoneConfig::default()
            },
        );
        house.zones.insert(
            "garage".to_string(),
            ZoneConfig {
                temperature: Some("sensor.garage_temperature".to_string()),
                ..ZoneConfig::default()
            },
        );
        house.resolve_zone_thermostats();

        let saved = BTreeMap::from([("basement".to_string(), 66.0)]);
        let thermostats = build_zone_thermostats(&house, 72.0, &saved);

        assert_eq!(thermostats.len(), 1);
        assert_eq!(thermostats[0].entity_id, "climate.basement_thermostat");
        assert_eq!(thermostats[0].target_temperature(), 66.0);
    }
}
