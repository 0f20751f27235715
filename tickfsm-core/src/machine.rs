//! Machine instances.
//!
//! A [`Machine`] owns everything one state machine needs at runtime: the
//! state registry, attribute store, active state set, transition table, tick
//! registry, engine settings and the clock it reads time from. Cloning a
//! machine copies all of it by value.

use crate::action::ActionRegistry;
use crate::attributes::Attributes;
use crate::clock::{Clock, SystemClock};
use crate::condition::{Condition, EvalContext};
use crate::config::EngineConfig;
use crate::error::CoreError;
use crate::post_transition::Operation;
use crate::state::{ActiveStates, StateId, StateRegistry};
use crate::tick::Tick;
use crate::transition::Transition;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// A running state machine.
#[derive(Debug, Clone)]
pub struct Machine {
    pub(crate) registry: StateRegistry,
    pub(crate) attributes: Attributes,
    pub(crate) active: ActiveStates,
    pub(crate) transitions: Vec<Transition>,
    pub(crate) ticks: Vec<Tick>,
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Machine {
    /// Starts building a machine.
    pub fn builder() -> MachineBuilder {
        MachineBuilder::default()
    }

    /// Creates a machine with no active states, reading the system clock.
    pub fn new(registry: StateRegistry, attributes: Attributes) -> Self {
        Self {
            registry,
            attributes,
            active: ActiveStates::new(),
            transitions: Vec::new(),
            ticks: Vec::new(),
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock. Existing timestamps are kept.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Current time according to the machine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Delay between turns when driven by a polling loop.
    pub fn tick_rate(&self) -> Duration {
        self.config.tick_rate()
    }

    // =========================================================================
    // States
    // =========================================================================

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// Resolves a state name to its id.
    pub fn state_id(&self, name: &str) -> Result<StateId, CoreError> {
        self.registry.id(name)
    }

    pub fn state_name(&self, id: StateId) -> Option<&str> {
        self.registry.name(id)
    }

    /// Whether `id` is currently active.
    pub fn is(&self, id: StateId) -> bool {
        self.active.contains(id)
    }

    /// Whether `id` is currently inactive.
    pub fn is_not(&self, id: StateId) -> bool {
        !self.is(id)
    }

    /// Whether the named state is currently active.
    pub fn is_named(&self, name: &str) -> Result<bool, CoreError> {
        Ok(self.is(self.state_id(name)?))
    }

    pub fn active_states(&self) -> &ActiveStates {
        &self.active
    }

    /// Names of the active states, in id order.
    pub fn active_names(&self) -> Vec<&str> {
        self.active
            .iter()
            .filter_map(|(id, _)| self.registry.name(id))
            .collect()
    }

    /// When `id` last became active.
    pub fn active_since(&self, id: StateId) -> Option<DateTime<Utc>> {
        self.active.since(id)
    }

    /// Activates a state at the current clock time.
    ///
    /// Returns `false` if it was already active; its timestamp is kept.
    pub fn enter(&mut self, id: StateId) -> Result<bool, CoreError> {
        self.registry.check(id)?;
        let now = self.now();
        Ok(self.active.enter(id, now))
    }

    /// Deactivates a state. Returns `false` if it was not active.
    pub fn leave(&mut self, id: StateId) -> Result<bool, CoreError> {
        self.registry.check(id)?;
        Ok(self.active.leave(id))
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Overwrites an existing attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<Value, CoreError> {
        self.attributes.set(name, value)
    }

    // =========================================================================
    // Transitions and ticks
    // =========================================================================

    /// Appends a transition, returning its position in the table.
    pub fn add_transition(&mut self, transition: Transition) -> Result<usize, CoreError> {
        if let Some(from) = transition.from {
            self.registry.check(from)?;
        }
        if let Some(to) = transition.to {
            self.registry.check(to)?;
        }

        self.transitions.push(transition);
        Ok(self.transitions.len() - 1)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Registers a tick whose first interval starts now.
    pub fn add_tick(
        &mut self,
        state: StateId,
        expression: impl Into<String>,
        interval_secs: u64,
    ) -> Result<usize, CoreError> {
        let tick = Tick::new(state, expression, interval_secs, self.now())?;
        self.push_tick(tick)
    }

    /// Registers a tick with its bookkeeping as given.
    pub fn push_tick(&mut self, tick: Tick) -> Result<usize, CoreError> {
        self.registry.check(tick.state)?;
        // Re-checks the interval of ticks that did not come through `Tick::new`.
        let tick = Tick::new(tick.state, tick.expression, tick.interval_secs, tick.last_fire)?;
        self.ticks.push(tick);
        Ok(self.ticks.len() - 1)
    }

    pub fn ticks(&self) -> &[Tick] {
        &self.ticks
    }

    /// Scores a condition against the current states and attributes.
    pub fn conditions_met(&self, condition: &Condition) -> Result<bool, CoreError> {
        condition.is_met(&self.eval_context())
    }

    pub(crate) fn eval_context(&self) -> EvalContext<'_> {
        EvalContext {
            registry: &self.registry,
            active: &self.active,
            attributes: &self.attributes,
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    /// Attaches handlers to every named action found in the transition table.
    ///
    /// Returns the number of actions bound.
    pub fn bind_actions(&mut self, registry: &ActionRegistry) -> usize {
        self.transitions
            .iter_mut()
            .filter_map(|t| t.post.as_mut())
            .map(|post| post.bind_actions(registry))
            .sum()
    }

    /// Names of actions with no handler attached.
    pub fn unbound_actions(&self) -> Vec<&str> {
        self.transitions
            .iter()
            .filter_map(|t| t.post.as_ref())
            .flat_map(|post| post.unbound_actions())
            .collect()
    }

    /// Names of every action referenced by the transition table.
    pub fn action_names(&self) -> Vec<&str> {
        self.transitions
            .iter()
            .filter_map(|t| t.post.as_ref())
            .flat_map(|post| post.operations())
            .filter_map(|op| match op {
                Operation::Action(action) => Some(action.name()),
                Operation::Assign(_) => None,
            })
            .collect()
    }
}

/// Builder for [`Machine`].
#[derive(Debug, Default)]
pub struct MachineBuilder {
    states: Vec<String>,
    initial: Vec<String>,
    attributes: Attributes,
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl MachineBuilder {
    /// Declares a state. Ids follow declaration order.
    pub fn state(mut self, name: impl Into<String>) -> Self {
        self.states.push(name.into());
        self
    }

    pub fn states<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states.extend(names.into_iter().map(Into::into));
        self
    }

    /// Marks a declared state as active from the start.
    pub fn initial(mut self, name: impl Into<String>) -> Self {
        self.initial.push(name.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name, value);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_cycles(mut self, limit: u32) -> Self {
        self.config.max_cycles = Some(limit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the machine, activating the initial states at the clock's time.
    pub fn build(self) -> Result<Machine, CoreError> {
        let registry = StateRegistry::from_names(self.states)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let mut machine = Machine::new(registry, self.attributes)
            .with_clock(clock)
            .with_config(self.config);

        for name in &self.initial {
            let id = machine.state_id(name)?;
            machine.enter(id)?;
        }
        Ok(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::post_transition::PostTransition;
    use chrono::TimeZone;

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn human(clock: &ManualClock) -> Machine {
        Machine::builder()
            .states(["ALIVE", "AWAKE", "ASLEEP", "HUNGRY"])
            .initial("ALIVE")
            .initial("AWAKE")
            .attribute("hunger", 0)
            .attribute("sleepiness", 0)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_activates_initial_states() {
        let clock = clock();
        let machine = human(&clock);

        assert_eq!(machine.active_names(), vec!["ALIVE", "AWAKE"]);
        assert!(machine.is_named("ALIVE").unwrap());
        assert!(!machine.is_named("ASLEEP").unwrap());
        assert_eq!(
            machine.active_since(machine.state_id("AWAKE").unwrap()),
            Some(clock.now())
        );
    }

    #[test]
    fn test_builder_rejects_unknown_initial_state() {
        let err = Machine::builder()
            .state("A")
            .initial("B")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownState { name } if name == "B"));
    }

    #[test]
    fn test_builder_rejects_duplicate_states() {
        let err = Machine::builder().states(["A", "A"]).build().unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_enter_keeps_original_timestamp() {
        let clock = clock();
        let mut machine = human(&clock);
        let alive = machine.state_id("ALIVE").unwrap();
        let entered = machine.active_since(alive);

        clock.advance_secs(30);
        assert!(!machine.enter(alive).unwrap());
        assert_eq!(machine.active_since(alive), entered);

        assert!(machine.leave(alive).unwrap());
        assert!(machine.is_not(alive));
        assert!(machine.enter(alive).unwrap());
        assert_eq!(machine.active_since(alive), Some(clock.now()));
    }

    #[test]
    fn test_add_transition_checks_state_ids() {
        let clock = clock();
        let mut machine = human(&clock);

        let err = machine
            .add_transition(Transition::between(StateId(0), StateId(42)))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownStateId { id: 42 }));
        assert!(machine.transitions().is_empty());

        assert_eq!(
            machine
                .add_transition(Transition::new(None, Some(StateId(3))))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_add_tick_starts_at_clock_time() {
        let clock = clock();
        let mut machine = human(&clock);
        clock.advance_secs(7);

        let awake = machine.state_id("AWAKE").unwrap();
        machine
            .add_tick(awake, "<sleepiness> = {sleepiness} + 1", 60)
            .unwrap();

        assert_eq!(machine.ticks()[0].last_fire, clock.now());
        assert!(machine.add_tick(StateId(99), "<hunger> = 1", 1).is_err());
    }

    #[test]
    fn test_conditions_met() {
        let clock = clock();
        let machine = human(&clock);

        assert!(machine
            .conditions_met(&Condition::new(["[ALIVE]", "[!ASLEEP]"]))
            .unwrap());
        assert!(!machine
            .conditions_met(&Condition::new(["{hunger} >= 50"]))
            .unwrap());
        assert!(machine.conditions_met(&Condition::always()).unwrap());
    }

    #[test]
    fn test_clone_is_independent() {
        let clock = clock();
        let original = human(&clock);
        let mut copy = original.clone();

        copy.set_attribute("hunger", 80).unwrap();
        copy.leave(copy.state_id("AWAKE").unwrap()).unwrap();

        assert_eq!(original.attribute("hunger"), Some(&Value::Int(0)));
        assert!(original.is_named("AWAKE").unwrap());
        assert_eq!(copy.attribute("hunger"), Some(&Value::Int(80)));
    }

    #[test]
    fn test_bind_and_list_actions() {
        let clock = clock();
        let mut machine = human(&clock);
        let post = PostTransition::new()
            .push(Operation::Action(crate::action::NamedAction::unbound("eat")))
            .assign("<hunger> = 0");
        machine
            .add_transition(Transition::new(None, None).then(post))
            .unwrap();

        assert_eq!(machine.action_names(), vec!["eat"]);
        assert_eq!(machine.unbound_actions(), vec!["eat"]);

        let mut registry = ActionRegistry::new();
        registry.register("eat", || Ok(()));
        assert_eq!(machine.bind_actions(&registry), 1);
        assert!(machine.unbound_actions().is_empty());
    }

    #[test]
    fn test_machine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Machine>();
    }
}
