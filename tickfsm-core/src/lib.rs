//! # tickfsm-core
//!
//! Non-exclusive state machine engine.
//!
//! This crate provides:
//! - Named states, any number of which can be active at once
//! - Attribute tables and a small expression language over them
//! - Transitions guarded by textual conditions, with post operations
//! - Periodic ticks that update attributes while a state is active
//! - Turns that evaluate all of the above, optionally to a fixed point

pub mod action;
pub mod attributes;
pub mod clock;
pub mod condition;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod expr;
pub mod machine;
pub mod post_transition;
pub mod snapshot;
pub mod state;
pub mod tick;
pub mod transition;
pub mod value;

pub use action::{Action, ActionRegistry, NamedAction};
pub use attributes::Attributes;
pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Condition, EvalContext};
pub use config::EngineConfig;
pub use definition::{MachineDefinition, TickDef, TransitionDef};
pub use engine::{FiredTransition, TurnReport};
pub use error::{ActionFailure, CoreError};
pub use expr::Expr;
pub use machine::{Machine, MachineBuilder};
pub use post_transition::{Operation, PostTransition};
pub use snapshot::{MachineSnapshot, SNAPSHOT_VERSION};
pub use state::{ActiveStates, StateId, StateRegistry};
pub use tick::Tick;
pub use transition::Transition;
pub use value::Value;
