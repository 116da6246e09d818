use std::collections::VecDeque;

use chrono::NaiveTime;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::HouseConfig,
    ports::{CommandDispatch, StateChanged, StateLookup},
    types::{STATE_OFF, STATE_ON},
    zoning::{Evaluation, ZoningEngine},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Thermostat,
    Connectivity,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thermostat => "thermostat",
            Self::Connectivity => "connectivity sensor",
        }
    }
}

/// Decides whether a state change should re-run the house adjustment.
pub fn classify_event(house: &HouseConfig, event: &StateChanged) -> Option<TriggerKind> {
    let entity_id = event.entity_id.as_str();
    let valid = house.filter_to_valid_zones();

    let is_thermostat_change = house.climate_entity_ids().contains(&entity_id)
        || valid.zone_thermostat_ids().contains(&entity_id);
    if is_thermostat_change {
        return Some(TriggerKind::Thermostat);
    }

    let came_online = matches!(
        (&event.old_state, &event.new_state),
        (Some(old), Some(new)) if old.state == STATE_OFF && new.state == STATE_ON
    );
    if came_online && valid.connectivity_entity_ids().contains(&entity_id) {
        return Some(TriggerKind::Connectivity);
    }

    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Idle,
    Evaluating,
}

/// Subscription to the host's state-change feed. Events are queued and each
/// matching one runs the pipeline to completion before the next is looked at.
#[derive(Debug, Clone)]
pub struct EventTrigger {
    engine: ZoningEngine,
    state: TriggerState,
    pending: VecDeque<StateChanged>,
    subscribed: bool,
}

impl EventTrigger {
    pub fn subscribe(engine: ZoningEngine) -> Self {
        Self {
            engine,
            state: TriggerState::Idle,
            pending: VecDeque::new(),
            subscribed: true,
        }
    }

    pub fn engine(&self) -> &ZoningEngine {
        &self.engine
    }

    pub fn set_engine(&mut self, engine: ZoningEngine) {
        self.engine = engine;
    }

    pub fn state(&self) -> TriggerState {
        self.state
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn unsubscribe(&mut self) {
        self.subscribed = false;
        self.pending.clear();
    }

    pub fn enqueue(&mut self, event: StateChanged) {
        if self.subscribed {
            self.pending.push_back(event);
        }
    }

    pub fn handle(
        &mut self,
        event: StateChanged,
        house: &HouseConfig,
        states: &impl StateLookup,
        dispatch: &impl CommandDispatch,
        now: NaiveTime,
    ) -> Vec<Evaluation> {
        self.enqueue(event);
        self.run_pending(house, states, dispatch, now)
    }

    /// Drains the queue in arrival order. Events that match nothing are dropped.
    pub fn run_pending(
        &mut self,
        house: &HouseConfig,
        states: &impl StateLookup,
        dispatch: &impl CommandDispatch,
        now: NaiveTime,
    ) -> Vec<Evaluation> {
        let mut evaluations = Vec::new();
        if self.state == TriggerState::Evaluating {
            return evaluations;
        }

        while let Some(event) = self.pending.pop_front() {
            let Some(kind) = classify_event(house, &event) else {
                continue;
            };
            debug!(
                "triggered by {} change: entity_id={}, old_state={}, new_state={}",
                kind.as_str(),
                event.entity_id,
                event.old_state_label(),
                event.new_state_label(),
            );

            self.state = TriggerState::Evaluating;
            evaluations.push(self.engine.adjust_house(house, states, dispatch, now));
            self.state = TriggerState::Idle;
        }

        evaluations
    }
}
