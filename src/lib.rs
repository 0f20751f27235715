//! # tickfsm
//!
//! Non-exclusive state machines driven by textual conditions and timed ticks.
//!
//! The engine lives in [`tickfsm_core`] and persistence in
//! [`tickfsm_storage`]. This crate re-exports both and adds host-side
//! configuration and the polling activation loop.

pub mod config;
pub mod error;
pub mod runner;

pub use config::{Config, ConfigError, StorageConfig};
pub use error::Error;
pub use runner::{Runner, ThreadSleep, Wait};

pub use tickfsm_core::{
    Action, ActionFailure, ActionRegistry, ActiveStates, Attributes, Clock, Condition, CoreError,
    EngineConfig, Machine, MachineBuilder, MachineDefinition, MachineSnapshot, ManualClock,
    NamedAction, Operation, PostTransition, StateId, StateRegistry, SystemClock, Tick, Transition,
    TurnReport, Value,
};
pub use tickfsm_storage::{MachineStore, SaveMeta, StorageError};
