//! Declarative machine definitions.
//!
//! Machines can be described in JSON or YAML, referring to states by name:
//!
//! ```json
//! {
//!   "states": ["ALIVE", "ASLEEP", "AWAKE", "HUNGRY"],
//!   "initial": ["ALIVE", "ASLEEP"],
//!   "attributes": {"hunger": 0, "sleepiness": 100},
//!   "transitions": [
//!     {"from": "ASLEEP", "to": "AWAKE", "when": "{sleepiness} <= 0"},
//!     {"to": "HUNGRY", "when": ["{hunger} >= 50", "[AWAKE]"],
//!      "then": [{"action": "growl"}, {"assign": "<hunger> = {hunger} - 10"}]}
//!   ],
//!   "ticks": [
//!     {"state": "ASLEEP", "expression": "<sleepiness> = {sleepiness} - 15", "interval_secs": 1}
//!   ]
//! }
//! ```
//!
//! Validation resolves every state name against the declared list and checks
//! that assignments target declared attributes and parse, so a definition
//! that builds can only fail at runtime through evaluation.

use crate::attributes::Attributes;
use crate::clock::{Clock, SystemClock};
use crate::condition::{split_clause, Condition};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::expr::{self, Expr};
use crate::machine::Machine;
use crate::post_transition::{Assignment, Operation, PostTransition};
use crate::state::{StateId, StateRegistry};
use crate::tick::Tick;
use crate::transition::Transition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A transition described by state names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Condition clauses. Accepts a single string or a list.
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub when: Vec<String>,

    /// Post-transition operations, each a single-key map such as
    /// `{assign: "<x> = 1"}` in both JSON and YAML.
    #[serde(
        default,
        with = "serde_yaml::with::singleton_map_recursive",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub then: Vec<Operation>,
}

/// A tick described by state name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickDef {
    pub state: String,
    pub expression: String,
    pub interval_secs: u64,
}

/// A machine described by state names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineDefinition {
    /// All states, in id order.
    pub states: Vec<String>,

    /// States active when the machine is built. Accepts a single string or a list.
    #[serde(default, deserialize_with = "one_or_many")]
    pub initial: Vec<String>,

    #[serde(default)]
    pub attributes: Attributes,

    #[serde(default)]
    pub transitions: Vec<TransitionDef>,

    #[serde(default)]
    pub ticks: Vec<TickDef>,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct OneOrMany;

    impl<'de> Visitor<'de> for OneOrMany {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or array of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut items = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                items.push(s);
            }
            Ok(items)
        }
    }

    deserializer.deserialize_any(OneOrMany)
}

impl MachineDefinition {
    /// Parses and validates a definition from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let def: Self = serde_json::from_value(json.clone())?;
        def.validate()?;
        Ok(def)
    }

    /// Parses and validates a definition from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let def: Self = serde_json::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, CoreError> {
        let def: Self = serde_yaml::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_yaml(&self) -> Result<String, CoreError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Checks the definition, returning the state registry it declares.
    pub fn validate(&self) -> Result<StateRegistry, CoreError> {
        if self.states.is_empty() {
            return Err(invalid("no states declared"));
        }
        let registry = StateRegistry::from_names(self.states.iter().cloned())?;

        for name in &self.initial {
            lookup(&registry, name, "initial state")?;
        }

        for (index, t) in self.transitions.iter().enumerate() {
            if let Some(from) = &t.from {
                lookup(&registry, from, "transition source")?;
            }
            if let Some(to) = &t.to {
                lookup(&registry, to, "transition target")?;
            }
            for clause in &t.when {
                self.check_clause(&registry, clause)
                    .map_err(|e| invalid(format!("transition {}: {}", index, e)))?;
            }
            for op in &t.then {
                if let Operation::Assign(text) = op {
                    self.check_assignment(text)
                        .map_err(|e| invalid(format!("transition {}: {}", index, e)))?;
                }
            }
        }

        for (index, tick) in self.ticks.iter().enumerate() {
            lookup(&registry, &tick.state, "tick state")?;
            if tick.interval_secs == 0 {
                return Err(invalid(format!("tick {}: interval must be positive", index)));
            }
            self.check_assignment(&tick.expression)
                .map_err(|e| invalid(format!("tick {}: {}", index, e)))?;
        }

        Ok(registry)
    }

    fn check_clause(&self, registry: &StateRegistry, clause: &str) -> Result<(), CoreError> {
        let parts = split_clause(clause)?;
        for test in &parts.state_tests {
            registry.id(test.name)?;
        }
        if expr::has_placeholder(&parts.expression) {
            Expr::parse(&expr::substitute(&parts.expression, &self.attributes)?)?;
        }
        Ok(())
    }

    fn check_assignment(&self, text: &str) -> Result<(), CoreError> {
        let assignment = Assignment::parse(text)?;
        self.attributes.require(assignment.target)?;
        Expr::parse(&expr::substitute(assignment.expression, &self.attributes)?)?;
        Ok(())
    }

    /// Builds a machine reading the system clock.
    pub fn build(&self) -> Result<Machine, CoreError> {
        self.build_with_clock(Arc::new(SystemClock))
    }

    /// Builds a machine reading the given clock. Ticks start counting and
    /// initial states are entered at the clock's current time.
    pub fn build_with_clock(&self, clock: Arc<dyn Clock>) -> Result<Machine, CoreError> {
        let registry = self.validate()?;
        let mut machine = Machine::new(registry, self.attributes.clone())
            .with_clock(clock)
            .with_config(self.engine.clone());

        for name in &self.initial {
            let id = machine.state_id(name)?;
            machine.enter(id)?;
        }

        for t in &self.transitions {
            let from = t.from.as_deref().map(|n| machine.state_id(n)).transpose()?;
            let to = t.to.as_deref().map(|n| machine.state_id(n)).transpose()?;

            let mut transition =
                Transition::new(from, to).when(Condition::new(t.when.iter().cloned()));
            if !t.then.is_empty() {
                let post = t
                    .then
                    .iter()
                    .cloned()
                    .fold(PostTransition::new(), PostTransition::push);
                transition = transition.then(post);
            }
            machine.add_transition(transition)?;
        }

        let now = machine.now();
        for tick in &self.ticks {
            let state = machine.state_id(&tick.state)?;
            machine.push_tick(Tick::new(
                state,
                tick.expression.clone(),
                tick.interval_secs,
                now,
            )?)?;
        }

        tracing::debug!(
            states = self.states.len(),
            transitions = self.transitions.len(),
            ticks = self.ticks.len(),
            "machine built from definition"
        );
        Ok(machine)
    }
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDefinition {
        reason: reason.into(),
    }
}

fn lookup(registry: &StateRegistry, name: &str, role: &str) -> Result<StateId, CoreError> {
    registry
        .id(name)
        .map_err(|_| invalid(format!("{} '{}' not in states list", role, name)))
}
