//! State identifiers and the set of active states.
//!
//! States are non-exclusive: any number of them can be active at once. Each
//! active state remembers when it was entered.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Opaque identifier of a named state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(pub u32);

impl StateId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Explicit `name <-> id` mapping built when a machine is defined.
///
/// Ids are dense and assigned in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateRegistry {
    names: Vec<String>,
    ids: HashMap<String, StateId>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from an ordered list of names.
    pub fn from_names<I, S>(names: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for name in names {
            let name = name.into();
            if registry.contains(&name) {
                return Err(CoreError::InvalidDefinition {
                    reason: format!("duplicate state '{}'", name),
                });
            }
            registry.register(name)?;
        }
        Ok(registry)
    }

    /// Registers a state name, returning the existing id if already known.
    pub fn register(&mut self, name: impl Into<String>) -> Result<StateId, CoreError> {
        let name = name.into();
        if let Some(id) = self.ids.get(&name) {
            return Ok(*id);
        }
        validate_state_name(&name)?;

        let id = StateId(self.names.len() as u32);
        self.names.push(name.clone());
        self.ids.insert(name, id);
        Ok(id)
    }

    /// Resolves a name to its id.
    pub fn id(&self, name: &str) -> Result<StateId, CoreError> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownState {
                name: name.to_string(),
            })
    }

    /// Resolves an id back to its name.
    pub fn name(&self, id: StateId) -> Option<&str> {
        self.names.get(id.0 as usize).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn contains_id(&self, id: StateId) -> bool {
        (id.0 as usize) < self.names.len()
    }

    /// Fails with `UnknownStateId` if the id was not issued by this registry.
    pub fn check(&self, id: StateId) -> Result<StateId, CoreError> {
        if self.contains_id(id) {
            Ok(id)
        } else {
            Err(CoreError::UnknownStateId { id: id.0 })
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

fn validate_state_name(name: &str) -> Result<(), CoreError> {
    let bad = name.is_empty()
        || name.starts_with('!')
        || name.chars().any(|c| c.is_whitespace() || matches!(c, '[' | ']'));
    if bad {
        return Err(CoreError::InvalidDefinition {
            reason: format!("invalid state name '{}'", name),
        });
    }
    Ok(())
}

impl Serialize for StateRegistry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.names.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StateRegistry {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        StateRegistry::from_names(names).map_err(serde::de::Error::custom)
    }
}

/// The currently active states with their activation timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveStates(BTreeMap<StateId, DateTime<Utc>>);

impl ActiveStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: StateId) -> bool {
        self.0.contains_key(&id)
    }

    /// Activates a state. An already active state keeps its original
    /// timestamp; returns whether the state was newly entered.
    pub fn enter(&mut self, id: StateId, at: DateTime<Utc>) -> bool {
        if self.0.contains_key(&id) {
            return false;
        }
        self.0.insert(id, at);
        true
    }

    /// Deactivates a state; returns whether it was active.
    pub fn leave(&mut self, id: StateId) -> bool {
        self.0.remove(&id).is_some()
    }

    /// When the state was entered, if it is active.
    pub fn since(&self, id: StateId) -> Option<DateTime<Utc>> {
        self.0.get(&id).copied()
    }

    /// The active ids, without timestamps.
    pub fn ids(&self) -> BTreeSet<StateId> {
        self.0.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StateId, DateTime<Utc>)> + '_ {
        self.0.iter().map(|(id, at)| (*id, *at))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
