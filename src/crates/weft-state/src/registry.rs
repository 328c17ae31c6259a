//! The per-agent registry of replicated states.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::document::StateDocument;
use crate::error::{Result, StateError};
use crate::worker::StateWorkerHandle;

/// One registered state: its observable document and the worker handle.
#[derive(Clone)]
pub struct RegisteredState {
    pub document: Arc<StateDocument>,
    pub handle: StateWorkerHandle,
}

#[derive(Default)]
pub struct StateRegistry {
    states: RwLock<HashMap<String, RegisteredState>>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, state: RegisteredState) {
        self.states
            .write()
            .insert(state.document.name().to_string(), state);
    }

    pub fn get(&self, name: &str) -> Result<RegisteredState> {
        self.states
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StateError::UnknownState(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.states.read().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<RegisteredState> {
        self.states.read().values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}
