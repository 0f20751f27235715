//! Point-in-time machine snapshots.
//!
//! A snapshot captures everything needed to resume a machine: the state
//! registry, active states with their timestamps, attributes, transitions,
//! ticks with their `last_fire` bookkeeping and engine settings. Native
//! actions are recorded by name only and must be rebound after restoring.

use crate::attributes::Attributes;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::machine::Machine;
use crate::state::{ActiveStates, StateRegistry};
use crate::tick::Tick;
use crate::transition::Transition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable image of a [`Machine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    /// Format version.
    pub version: u32,

    /// When the snapshot was taken, by the machine's clock.
    pub taken_at: DateTime<Utc>,

    pub states: StateRegistry,
    pub active: ActiveStates,
    pub attributes: Attributes,

    #[serde(default)]
    pub transitions: Vec<Transition>,

    #[serde(default)]
    pub ticks: Vec<Tick>,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl MachineSnapshot {
    /// Captures a machine.
    pub fn from_machine(machine: &Machine) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at: machine.now(),
            states: machine.registry.clone(),
            active: machine.active.clone(),
            attributes: machine.attributes.clone(),
            transitions: machine.transitions.clone(),
            ticks: machine.ticks.clone(),
            engine: machine.config.clone(),
        }
    }

    /// Restores a machine reading the system clock.
    pub fn to_machine(&self) -> Result<Machine, CoreError> {
        self.to_machine_with_clock(Arc::new(SystemClock))
    }

    /// Restores a machine reading the given clock.
    ///
    /// Every state id referenced by the snapshot is checked against its
    /// registry.
    pub fn to_machine_with_clock(&self, clock: Arc<dyn Clock>) -> Result<Machine, CoreError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(CoreError::InvalidDefinition {
                reason: format!("unsupported snapshot version {}", self.version),
            });
        }

        for (id, _) in self.active.iter() {
            self.states.check(id)?;
        }

        let mut machine = Machine::new(self.states.clone(), self.attributes.clone())
            .with_clock(clock)
            .with_config(self.engine.clone());
        machine.active = self.active.clone();

        for transition in &self.transitions {
            machine.add_transition(transition.clone())?;
        }
        for tick in &self.ticks {
            machine.push_tick(tick.clone())?;
        }
        Ok(machine)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl Machine {
    /// Captures the machine's current state.
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot::from_machine(self)
    }

    /// Restores a machine from a snapshot, reading the system clock.
    pub fn from_snapshot(snapshot: &MachineSnapshot) -> Result<Self, CoreError> {
        snapshot.to_machine()
    }
}
