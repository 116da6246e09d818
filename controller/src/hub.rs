use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveTime;
use tracing::{debug, info};

use zoning_common::{
    build_zone_thermostats, CommandDispatch, Evaluation, EventTrigger, Reading, RuntimeConfig,
    StateChanged, StateLookup, StateStore, ZoneThermostat, ZoningEngine,
};

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    State {
        entity_id: String,
        reading: Option<Reading>,
    },
    SetTarget {
        zone: String,
        temperature: f64,
    },
    Evaluate,
    Reconfigure,
}

#[derive(Debug, Default)]
pub struct HubOutcome {
    pub evaluations: Vec<Evaluation>,
    pub targets_changed: bool,
    pub thermostats_changed: bool,
}

/// Single owner of host state, virtual thermostats and the event trigger.
/// Every message is handled to completion before the next one.
#[derive(Debug)]
pub struct ZoningHub {
    states: StateStore,
    thermostats: Vec<ZoneThermostat>,
    trigger: EventTrigger,
    last_evaluation: Option<Evaluation>,
}

impl ZoningHub {
    pub fn new(runtime: &RuntimeConfig, saved_targets: &BTreeMap<String, f64>) -> Self {
        let mut hub = Self {
            states: StateStore::new(),
            thermostats: build_zone_thermostats(
                &runtime.house,
                runtime.engine.default_zone_target,
                saved_targets,
            ),
            trigger: EventTrigger::subscribe(ZoningEngine::new(runtime.engine.clone())),
            last_evaluation: None,
        };
        for index in 0..hub.thermostats.len() {
            hub.publish_thermostat(index);
        }
        hub
    }

    pub fn handle(
        &mut self,
        message: HubMessage,
        runtime: &RuntimeConfig,
        dispatch: &impl CommandDispatch,
        now: NaiveTime,
    ) -> HubOutcome {
        let mut outcome = HubOutcome::default();

        match message {
            HubMessage::State { entity_id, reading } => {
                if self.owns(&entity_id) {
                    debug!("ignoring external state for virtual thermostat {entity_id}");
                    return outcome;
                }
                let change = match reading {
                    Some(reading) => self.states.set(entity_id, reading),
                    None => self.states.remove(&entity_id),
                };
                if let Some(change) = change {
                    let derived = self.refresh_thermostats(&change);
                    outcome.thermostats_changed = !derived.is_empty();
                    self.trigger.enqueue(change);
                    for thermostat_change in derived {
                        self.trigger.enqueue(thermostat_change);
                    }
                }
            }
            HubMessage::SetTarget { zone, temperature } => {
                let temperature = runtime.engine.clamp_zone_target(temperature);
                let Some(index) = self.thermostats.iter().position(|t| t.zone == zone) else {
                    debug!("no virtual thermostat for zone '{zone}'");
                    return outcome;
                };
                if self.thermostats[index].set_target_temperature(temperature) {
                    info!("zone '{zone}' target set to {temperature}");
                    outcome.targets_changed = true;
                    if let Some(change) = self.publish_thermostat(index) {
                        outcome.thermostats_changed = true;
                        self.trigger.enqueue(change);
                    }
                }
            }
            HubMessage::Evaluate => {
                let evaluation =
                    self.trigger
                        .engine()
                        .adjust_house(&runtime.house, &self.states, dispatch, now);
                outcome.evaluations.push(evaluation);
            }
            HubMessage::Reconfigure => {
                outcome.thermostats_changed = self.reconfigure(runtime);
            }
        }

        outcome.evaluations.extend(self.trigger.run_pending(
            &runtime.house,
            &self.states,
            dispatch,
            now,
        ));
        if let Some(last) = outcome.evaluations.last() {
            self.last_evaluation = Some(last.clone());
        }
        outcome
    }

    pub fn unsubscribe(&mut self) {
        self.trigger.unsubscribe();
    }

    pub fn is_subscribed(&self) -> bool {
        self.trigger.is_subscribed()
    }

    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.last_evaluation.as_ref()
    }

    pub fn thermostats(&self) -> &[ZoneThermostat] {
        &self.thermostats
    }

    pub fn has_zone(&self, zone: &str) -> bool {
        self.thermostats.iter().any(|thermostat| thermostat.zone == zone)
    }

    pub fn states(&self) -> &StateStore {
        &self.states
    }

    pub fn zone_targets(&self) -> BTreeMap<String, f64> {
        self.thermostats
            .iter()
            .map(|thermostat| (thermostat.zone.clone(), thermostat.target_temperature()))
            .collect()
    }

    pub fn thermostat_readings(&self) -> Vec<(String, Reading)> {
        self.thermostats
            .iter()
            .filter_map(|thermostat| {
                self.states
                    .get(&thermostat.entity_id)
                    .map(|reading| (thermostat.entity_id.clone(), reading))
            })
            .collect()
    }

    fn owns(&self, entity_id: &str) -> bool {
        self.thermostats
            .iter()
            .any(|thermostat| thermostat.entity_id == entity_id)
    }

    fn refresh_thermostats(&mut self, change: &StateChanged) -> Vec<StateChanged> {
        let mut derived = Vec::new();
        for index in 0..self.thermostats.len() {
            if !self.thermostats[index].is_refresh_event(change) {
                continue;
            }
            derived.extend(self.publish_thermostat(index));
        }
        derived
    }

    fn publish_thermostat(&mut self, index: usize) -> Option<StateChanged> {
        let thermostat = &self.thermostats[index];
        let reading = thermostat.reading(&self.states);
        let entity_id = thermostat.entity_id.clone();
        self.states.set(entity_id, reading)
    }

    fn reconfigure(&mut self, runtime: &RuntimeConfig) -> bool {
        self.trigger
            .set_engine(ZoningEngine::new(runtime.engine.clone()));

        let targets = self.zone_targets();
        let previous: BTreeSet<String> = self
            .thermostats
            .iter()
            .map(|thermostat| thermostat.entity_id.clone())
            .collect();
        self.thermostats = build_zone_thermostats(
            &runtime.house,
            runtime.engine.default_zone_target,
            &targets,
        );

        let mut changed = false;
        for entity_id in previous {
            if !self.owns(&entity_id) && self.states.remove(&entity_id).is_some() {
                changed = true;
            }
        }
        for index in 0..self.thermostats.len() {
            if let Some(change) = self.publish_thermostat(index) {
                changed = true;
                self.trigger.enqueue(change);
            }
        }
        info!(
            "reconfigured with {} zone thermostats",
            self.thermostats.len()
        );
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zoning_common::{
        DamperCommand, HouseConfig, RecordingDispatch, ServiceCall, ZoneConfig,
    };

    fn runtime() -> RuntimeConfig {
        let mut house = HouseConfig::default();
        house.zones.insert(
            "office".to_string(),
            ZoneConfig {
                covers: vec!["cover.office".to_string()],
                temperature: Some("sensor.office".to_string()),
                climate: Some("climate.central".to_string()),
                ..ZoneConfig::default()
            },
        );
        let mut runtime = RuntimeConfig {
            house,
            ..RuntimeConfig::default()
        };
        runtime.sanitize();
        runtime
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn state(entity_id: &str, reading: Reading) -> HubMessage {
        HubMessage::State {
            entity_id: entity_id.to_string(),
            reading: Some(reading),
        }
    }

    fn central(mode: &str, current: f64) -> Reading {
        Reading::new(mode).with_attribute("current_temperature", current)
    }

    #[test]
    fn publishes_virtual_thermostat_with_default_target() {
        let hub = ZoningHub::new(&runtime(), &BTreeMap::new());

        let readings = hub.thermostat_readings();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].0, "climate.office_thermostat");
        assert_eq!(readings[0].1.attribute_f64("temperature"), Some(72.0));
        assert_eq!(readings[0].1.state, "unknown");
    }

    #[test]
    fn sensor_change_reaches_trigger_through_virtual_thermostat() {
        let runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());

        let outcome = hub.handle(state("climate.central", central("heat", 65.0)), &runtime, &dispatch, noon());
        assert_eq!(outcome.evaluations.len(), 2);
        dispatch.take();

        let outcome = hub.handle(state("sensor.office", Reading::new("60")), &runtime, &dispatch, noon());

        assert!(outcome.thermostats_changed);
        assert_eq!(outcome.evaluations.len(), 1);
        assert_eq!(
            dispatch.calls(),
            vec![ServiceCall::cover(DamperCommand::Open, "cover.office")]
        );
        assert!(hub.last_evaluation().is_some());
    }

    #[test]
    fn unavailable_sensor_does_not_refresh_thermostat() {
        let runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());

        let outcome = hub.handle(state("sensor.office", Reading::new("unavailable")), &runtime, &dispatch, noon());

        assert!(!outcome.thermostats_changed);
        assert!(outcome.evaluations.is_empty());
    }

    #[test]
    fn set_target_clamps_and_triggers_run() {
        let runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());
        hub.handle(state("climate.central", central("heat", 65.0)), &runtime, &dispatch, noon());
        hub.handle(state("sensor.office", Reading::new("70")), &runtime, &dispatch, noon());
        dispatch.take();

        let outcome = hub.handle(
            HubMessage::SetTarget {
                zone: "office".to_string(),
                temperature: 140.0,
            },
            &runtime,
            &dispatch,
            noon(),
        );

        assert!(outcome.targets_changed);
        assert_eq!(hub.zone_targets()["office"], 95.0);
        assert_eq!(
            dispatch.calls(),
            vec![ServiceCall::cover(DamperCommand::Open, "cover.office")]
        );
    }

    #[test]
    fn external_writes_to_virtual_thermostats_are_ignored() {
        let runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());

        let outcome = hub.handle(
            state(
                "climate.office_thermostat",
                Reading::new("heat").with_attribute("temperature", 50.0),
            ),
            &runtime,
            &dispatch,
            noon(),
        );

        assert!(outcome.evaluations.is_empty());
        assert_eq!(hub.zone_targets()["office"], 72.0);
    }

    #[test]
    fn unsubscribed_hub_only_runs_forced_evaluations() {
        let runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());
        hub.unsubscribe();

        let outcome = hub.handle(state("climate.central", central("heat", 65.0)), &runtime, &dispatch, noon());
        assert!(outcome.evaluations.is_empty());
        assert!(!hub.is_subscribed());

        let outcome = hub.handle(HubMessage::Evaluate, &runtime, &dispatch, noon());
        assert_eq!(outcome.evaluations.len(), 1);
    }

    #[test]
    fn reconfigure_drops_thermostats_of_removed_zones() {
        let mut runtime = runtime();
        let dispatch = RecordingDispatch::new();
        let mut hub = ZoningHub::new(&runtime, &BTreeMap::new());
        hub.handle(
            HubMessage::SetTarget {
                zone: "office".to_string(),
                temperature: 68.0,
            },
            &runtime,
            &dispatch,
            noon(),
        );

        runtime.house.zones.insert(
            "den".to_string(),
            ZoneConfig {
                covers: vec!["cover.den".to_string()],
                temperature: Some("sensor.den".to_string()),
                ..ZoneConfig::default()
            },
        );
        runtime.sanitize();
        let outcome = hub.handle(HubMessage::Reconfigure, &runtime, &dispatch, noon());
        assert!(outcome.thermostats_changed);
        assert_eq!(hub.zone_targets()["office"], 68.0);
        assert_eq!(hub.zone_targets()["den"], 72.0);

        runtime.house.zones.remove("den");
        hub.handle(HubMessage::Reconfigure, &runtime, &dispatch, noon());
        assert!(!hub.has_zone("den"));
        assert!(hub.states().get("climate.den_thermostat").is_none());
    }
}
