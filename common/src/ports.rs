//! Seams to the host platform: state lookup, command dispatch and the
//! state-change notifications that feed the event trigger.

use std::{cell::RefCell, collections::HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{Reading, ServiceCall};

/// Read-only view of the host's entity states.
pub trait StateLookup {
    fn get(&self, entity_id: &str) -> Option<Reading>;
}

impl<T: StateLookup + ?Sized> StateLookup for &T {
    fn get(&self, entity_id: &str) -> Option<Reading> {
        (**self).get(entity_id)
    }
}

/// Fire-and-forget command sink. Implementations must not block on delivery.
pub trait CommandDispatch {
    fn dispatch(&self, call: &ServiceCall);
}

impl<T: CommandDispatch + ?Sized> CommandDispatch for &T {
    fn dispatch(&self, call: &ServiceCall) {
        (**self).dispatch(call)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChanged {
    pub entity_id: String,
    pub old_state: Option<Reading>,
    pub new_state: Option<Reading>,
}

impl StateChanged {
    pub fn old_state_label(&self) -> &str {
        self.old_state
            .as_ref()
            .map(|reading| reading.state.as_str())
            .unwrap_or(crate::types::STATE_UNKNOWN)
    }

    pub fn new_state_label(&self) -> &str {
        self.new_state
            .as_ref()
            .map(|reading| reading.state.as_str())
            .unwrap_or(crate::types::STATE_UNKNOWN)
    }
}

/// In-memory entity registry. Writes report a [`StateChanged`] only when the
/// stored reading actually differs.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    states: HashMap<String, Reading>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, entity_id: impl Into<String>, reading: Reading) -> Option<StateChanged> {
        let entity_id = entity_id.into();
        let old_state = self.states.insert(entity_id.clone(), reading.clone());
        if old_state.as_ref() == Some(&reading) {
            return None;
        }
        Some(StateChanged {
            entity_id,
            old_state,
            new_state: Some(reading),
        })
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<StateChanged> {
        let old_state = self.states.remove(entity_id)?;
        Some(StateChanged {
            entity_id: entity_id.to_string(),
            old_state: Some(old_state),
            new_state: None,
        })
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl StateLookup for StateStore {
    fn get(&self, entity_id: &str) -> Option<Reading> {
        self.states.get(entity_id).cloned()
    }
}

/// Dispatch sink that keeps every call in order.
#[derive(Debug, Default)]
pub struct RecordingDispatch {
    calls: RefCell<Vec<ServiceCall>>,
}

impl RecordingDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.borrow().clone()
    }

    pub fn take(&self) -> Vec<ServiceCall> {
        self.calls.take()
    }
}

impl CommandDispatch for RecordingDispatch {
    fn dispatch(&self, call: &ServiceCall) {
        self.calls.borrow_mut().push(call.clone());
    }
}
