use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    config::{EngineConfig, HouseConfig, ZoneConfig},
    ports::{CommandDispatch, StateLookup},
    types::{
        Action, DamperCommand, HvacMode, ServiceCall, ATTR_CURRENT_TEMPERATURE, ATTR_TEMPERATURE,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    #[error("no central thermostat configured")]
    NoCentralThermostat,
    #[error("central thermostat {0} has no current temperature")]
    CentralUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoThermostat,
    NoSetpoint,
    NoTemperatureSensor,
    SensorUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ZoneOutcome {
    Damper {
        command: DamperCommand,
        covers: Vec<String>,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneDecision {
    pub zone: String,
    pub is_bedroom: bool,
    pub target: Option<f64>,
    pub actual: Option<f64>,
    pub outcome: ZoneOutcome,
}

impl ZoneDecision {
    pub fn command(&self) -> Option<DamperCommand> {
        match self.outcome {
            ZoneOutcome::Damper { command, .. } => Some(command),
            ZoneOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HousePlan {
    pub central_thermostat: String,
    pub hvac_mode: Option<HvacMode>,
    pub central_temperature: f64,
    pub night_mode: bool,
    pub is_night: bool,
    pub control_central_thermostat: bool,
    pub house_action: Action,
    pub zones: Vec<ZoneDecision>,
    pub central_setpoint: Option<f64>,
    pub commands: Vec<ServiceCall>,
}

impl HousePlan {
    pub fn zone(&self, name: &str) -> Option<&ZoneDecision> {
        self.zones.iter().find(|decision| decision.zone == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Evaluation {
    Completed(HousePlan),
    Aborted { reason: AbortReason },
}

impl Evaluation {
    pub fn plan(&self) -> Option<&HousePlan> {
        match self {
            Self::Completed(plan) => Some(plan),
            Self::Aborted { .. } => None,
        }
    }

    pub fn commands(&self) -> &[ServiceCall] {
        self.plan()
            .map(|plan| plan.commands.as_slice())
            .unwrap_or_default()
    }
}

/// Temperatures are truncated toward zero before comparing, so a 70.9 target acts as 70.
pub fn determine_action(
    target_temperature: Option<f64>,
    actual_temperature: Option<f64>,
    hvac_mode: Option<HvacMode>,
) -> Action {
    let (Some(target), Some(actual), Some(mode)) =
        (target_temperature, actual_temperature, hvac_mode)
    else {
        return Action::Active;
    };

    let target = target as i64;
    let actual = actual as i64;
    match mode {
        HvacMode::Heat if actual >= target => Action::Idle,
        HvacMode::Cool if actual <= target => Action::Idle,
        _ => Action::Active,
    }
}

pub fn aggregate_action(actions: impl IntoIterator<Item = Action>) -> Action {
    if actions.into_iter().any(|action| action == Action::Active) {
        Action::Active
    } else {
        Action::Idle
    }
}

pub fn is_night_mode_capable(zones: &BTreeMap<String, ZoneConfig>) -> bool {
    zones.values().any(|zone| zone.bedroom)
}

/// Zones whose needs drive the house-wide verdict: only bedrooms during the
/// night window, everything otherwise.
pub fn load_zones(
    zones: &BTreeMap<String, ZoneConfig>,
    night_mode: bool,
    is_night: bool,
) -> Vec<(&str, &ZoneConfig)> {
    let bedrooms_only = night_mode && is_night;
    zones
        .iter()
        .filter(|(_, zone)| !bedrooms_only || zone.bedroom)
        .map(|(name, zone)| (name.as_str(), zone))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamperInputs {
    pub target_temperature: Option<f64>,
    pub actual_temperature: Option<f64>,
    pub hvac_mode: Option<HvacMode>,
    pub house_action: Action,
    pub night_mode: bool,
    pub is_night: bool,
    pub is_bedroom: bool,
    pub control_central_thermostat: bool,
}

pub fn determine_damper_command(inputs: &DamperInputs) -> DamperCommand {
    if inputs.night_mode && inputs.is_night {
        return if inputs.is_bedroom {
            DamperCommand::Open
        } else {
            DamperCommand::Close
        };
    }

    // A satisfied house closes every damper once the central unit is ours to throttle.
    let action = if inputs.house_action == Action::Idle && inputs.control_central_thermostat {
        Action::Idle
    } else {
        determine_action(
            inputs.target_temperature,
            inputs.actual_temperature,
            inputs.hvac_mode,
        )
    };

    match action {
        Action::Active => DamperCommand::Open,
        Action::Idle => DamperCommand::Close,
    }
}

pub fn determine_central_setpoint(
    actual_temperature: f64,
    hvac_mode: Option<HvacMode>,
    house_action: Action,
    step: f64,
) -> f64 {
    match (hvac_mode, house_action) {
        (Some(HvacMode::Heat), Action::Active) => actual_temperature + step,
        (Some(HvacMode::Cool), Action::Active) => actual_temperature - step,
        _ => actual_temperature,
    }
}

pub fn zone_target_temperature(states: &impl StateLookup, zone: &ZoneConfig) -> Option<f64> {
    let thermostat = zone.thermostat.as_deref()?;
    states.get(thermostat)?.attribute_f64(ATTR_TEMPERATURE)
}

pub fn zone_actual_temperature(states: &impl StateLookup, zone: &ZoneConfig) -> Option<f64> {
    let sensor = zone.temperature.as_deref()?;
    states.get(sensor)?.numeric_state()
}

#[derive(Debug, Clone, Default)]
pub struct ZoningEngine {
    pub config: EngineConfig,
}

impl ZoningEngine {
    pub fn new(mut config: EngineConfig) -> Self {
        config.sanitize();
        Self { config }
    }

    /// Runs the full decision pipeline against fresh readings without side effects.
    pub fn evaluate(
        &self,
        house: &HouseConfig,
        states: &impl StateLookup,
        now: NaiveTime,
    ) -> Evaluation {
        let Some(central_id) = house.central_thermostat() else {
            warn!("no central thermostat configured, skipping house adjustment");
            return Evaluation::Aborted {
                reason: AbortReason::NoCentralThermostat,
            };
        };

        let central = states.get(central_id);
        let Some(central_temperature) = central
            .as_ref()
            .and_then(|reading| reading.attribute_f64(ATTR_CURRENT_TEMPERATURE))
        else {
            warn!("central thermostat {central_id} has no current temperature, skipping house adjustment");
            return Evaluation::Aborted {
                reason: AbortReason::CentralUnavailable(central_id.to_string()),
            };
        };
        let hvac_mode = central.as_ref().and_then(|reading| reading.hvac_mode());
        debug!(
            "central thermostat {central_id}: hvac_mode={hvac_mode:?}, current_temp={central_temperature}"
        );

        let valid = house.filter_to_valid_zones();
        let night_mode = is_night_mode_capable(&valid.zones);
        let is_night = valid.night_window().contains(now);
        let control_central_thermostat = valid.control_central_thermostat;
        debug!(
            "night settings: night_mode={night_mode}, is_night={is_night}, control_central_thermostat={control_central_thermostat}"
        );

        let house_action = aggregate_action(
            load_zones(&valid.zones, night_mode, is_night)
                .into_iter()
                .map(|(_, zone)| {
                    determine_action(
                        zone_target_temperature(states, zone),
                        zone_actual_temperature(states, zone),
                        hvac_mode,
                    )
                }),
        );

        let mut zones = Vec::with_capacity(valid.zones.len());
        let mut commands = Vec::new();

        for (name, zone) in &valid.zones {
            let target = zone_target_temperature(states, zone);
            let actual = zone_actual_temperature(states, zone);

            let outcome = match skip_reason(states, zone) {
                Some(reason) => {
                    debug!("zone '{name}' skipped: {reason:?}");
                    ZoneOutcome::Skipped { reason }
                }
                None => {
                    let command = determine_damper_command(&DamperInputs {
                        target_temperature: target,
                        actual_temperature: actual,
                        hvac_mode,
                        house_action,
                        night_mode,
                        is_night,
                        is_bedroom: zone.bedroom,
                        control_central_thermostat,
                    });
                    debug!(
                        "zone '{name}': target_temp={target:?}, actual_temp={actual:?}, is_bedroom={}, house_action={}, {} covers {:?}",
                        zone.bedroom,
                        house_action.as_str(),
                        command.as_str(),
                        zone.covers,
                    );
                    commands.extend(
                        zone.covers
                            .iter()
                            .map(|cover| ServiceCall::cover(command, cover.as_str())),
                    );
                    ZoneOutcome::Damper {
                        command,
                        covers: zone.covers.clone(),
                    }
                }
            };

            zones.push(ZoneDecision {
                zone: name.clone(),
                is_bedroom: zone.bedroom,
                target,
                actual,
                outcome,
            });
        }

        let central_setpoint = control_central_thermostat.then(|| {
            let setpoint = determine_central_setpoint(
                central_temperature,
                hvac_mode,
                house_action,
                self.config.central_setpoint_step,
            );
            debug!(
                "adjusting central thermostat {central_id}: house_action={}, new_target_temp={setpoint}",
                house_action.as_str()
            );
            commands.push(ServiceCall::set_temperature(central_id, setpoint));
            setpoint
        });

        Evaluation::Completed(HousePlan {
            central_thermostat: central_id.to_string(),
            hvac_mode,
            central_temperature,
            night_mode,
            is_night,
            control_central_thermostat,
            house_action,
            zones,
            central_setpoint,
            commands,
        })
    }

    /// Evaluates and then dispatches every command in plan order.
    pub fn adjust_house(
        &self,
        house: &HouseConfig,
        states: &impl StateLookup,
        dispatch: &impl CommandDispatch,
        now: NaiveTime,
    ) -> Evaluation {
        let evaluation = self.evaluate(house, states, now);
        for call in evaluation.commands() {
            dispatch.dispatch(call);
        }
        evaluation
    }
}

fn skip_reason(states: &impl StateLookup, zone: &ZoneConfig) -> Option<SkipReason> {
    let Some(thermostat) = zone.thermostat.as_deref().and_then(|id| states.get(id)) else {
        return Some(SkipReason::NoThermostat);
    };
    if thermostat.attribute_f64(ATTR_TEMPERATURE).is_none() {
        return Some(SkipReason::NoSetpoint);
    }
    let Some(sensor) = zone.temperature.as_deref() else {
        return Some(SkipReason::NoTemperatureSensor);
    };
    if states
        .get(sensor)
        .and_then(|reading| reading.numeric_state())
        .is_none()
    {
        return Some(SkipReason::SensorUnavailable);
    }
    None
}
