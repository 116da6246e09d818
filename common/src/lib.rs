pub mod config;
pub mod ports;
pub mod schedule;
pub mod topics;
pub mod trigger;
pub mod types;
pub mod zone_thermostat;
pub mod zoning;

pub use config::{ConfigError, EngineConfig, HouseConfig, NetworkConfig, RuntimeConfig, ZoneConfig};
pub use ports::{CommandDispatch, RecordingDispatch, StateChanged, StateLookup, StateStore};
pub use schedule::NightWindow;
pub use topics::*;
pub use trigger::{classify_event, EventTrigger, TriggerKind, TriggerState};
pub use types::{Action, DamperCommand, Domain, HvacMode, Reading, Service, ServiceCall};
pub use zone_thermostat::{build_zone_thermostats, ZoneThermostat};
pub use zoning::{
    AbortReason, Evaluation, HousePlan, SkipReason, ZoneDecision, ZoneOutcome, ZoningEngine,
};
