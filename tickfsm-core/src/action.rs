//! Native post-transition actions.
//!
//! An action is an opaque callback run when a transition fires. Actions are
//! identified by name so that a machine can be persisted and its actions
//! rebound after loading.

use crate::error::{ActionFailure, CoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A side effect invoked with no arguments.
pub trait Action: Send + Sync {
    fn invoke(&self) -> Result<(), ActionFailure>;
}

impl<F> Action for F
where
    F: Fn() -> Result<(), ActionFailure> + Send + Sync,
{
    fn invoke(&self) -> Result<(), ActionFailure> {
        self()
    }
}

/// A named handle to an action. The handler is absent after deserialization
/// until it is rebound.
#[derive(Clone)]
pub struct NamedAction {
    name: String,
    handler: Option<Arc<dyn Action>>,
}

impl NamedAction {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Result<(), ActionFailure> + Send + Sync + 'static,
    {
        Self::from_action(name, Arc::new(action))
    }

    pub fn from_action(name: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            name: name.into(),
            handler: Some(action),
        }
    }

    /// A reference to an action that will be bound later.
    pub fn unbound(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        self.handler.is_some()
    }

    pub fn bind(&mut self, handler: Arc<dyn Action>) {
        self.handler = Some(handler);
    }

    /// Runs the handler. Failures are reported, never swallowed.
    pub fn invoke(&self) -> Result<(), CoreError> {
        let handler = self
            .handler
            .as_ref()
            .ok_or_else(|| CoreError::UnboundAction {
                name: self.name.clone(),
            })?;

        handler.invoke().map_err(|source| CoreError::Action {
            name: self.name.clone(),
            source,
        })
    }
}

impl fmt::Debug for NamedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedAction")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl PartialEq for NamedAction {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Serialize for NamedAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for NamedAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(NamedAction::unbound)
    }
}

/// Handlers by name, used to bind actions of loaded or declared machines.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn() -> Result<(), ActionFailure> + Send + Sync + 'static,
    {
        self.register_action(name, Arc::new(action))
    }

    pub fn register_action(&mut self, name: impl Into<String>, action: Arc<dyn Action>) -> &mut Self {
        self.handlers.insert(name.into(), action);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ActionRegistry").field("actions", &names).finish()
    }
}
