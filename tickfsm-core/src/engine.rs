//! Turn engine.
//!
//! A turn runs every due tick, then walks the transition table in
//! registration order. Each transition whose source is active (or unset) and
//! whose condition holds leaves its source, enters its target and runs its
//! post operations. Later transitions see the effects of earlier ones within
//! the same pass.
//!
//! A recursive turn repeats the whole cycle until the set of active state ids
//! stops changing. Errors abort the turn where they occur; nothing is rolled
//! back, so callers that need atomicity clone the machine first.

use crate::error::CoreError;
use crate::machine::Machine;
use crate::state::StateId;
use chrono::{DateTime, Utc};

/// A transition that fired during a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTransition {
    /// Position in the transition table.
    pub index: usize,
    pub from: Option<StateId>,
    pub to: Option<StateId>,
}

/// Outcome of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Cycles run, including the final one that confirmed stability.
    pub cycles: u32,
    /// Transitions fired, in firing order across all cycles.
    pub fired: Vec<FiredTransition>,
    /// Total tick applications across all cycles.
    pub tick_firings: u64,
    /// Whether the last cycle left the active set unchanged.
    pub stable: bool,
}

impl TurnReport {
    pub fn transitions_fired(&self) -> usize {
        self.fired.len()
    }

    /// Whether the turn changed nothing observable through transitions or ticks.
    pub fn is_idle(&self) -> bool {
        self.fired.is_empty() && self.tick_firings == 0
    }
}

impl Machine {
    /// Runs a turn at the machine clock's current time.
    pub fn turn(&mut self, recurse: bool) -> Result<TurnReport, CoreError> {
        let now = self.now();
        self.turn_at(now, recurse)
    }

    /// Runs a turn as if the current time were `now`.
    ///
    /// With `recurse`, cycles repeat until the active set is stable or the
    /// configured `max_cycles` is reached, which fails with
    /// [`CoreError::CycleLimitExceeded`].
    pub fn turn_at(&mut self, now: DateTime<Utc>, recurse: bool) -> Result<TurnReport, CoreError> {
        let mut report = TurnReport::default();

        loop {
            let before = self.active.ids();
            report.cycles += 1;

            report.tick_firings += self.run_ticks(now)?;
            self.run_transitions(now, &mut report)?;

            if self.active.ids() == before {
                report.stable = true;
                break;
            }
            if !recurse {
                break;
            }
            if let Some(limit) = self.config.max_cycles {
                if report.cycles >= limit {
                    tracing::warn!(limit, "recursive turn did not stabilize");
                    return Err(CoreError::CycleLimitExceeded { limit });
                }
            }
        }

        tracing::trace!(
            cycles = report.cycles,
            fired = report.fired.len(),
            tick_firings = report.tick_firings,
            "turn complete"
        );
        Ok(report)
    }

    fn run_ticks(&mut self, now: DateTime<Utc>) -> Result<u64, CoreError> {
        let mut firings = 0;
        for tick in &mut self.ticks {
            firings += tick.fire(now, &self.active, &mut self.attributes)?;
        }
        Ok(firings)
    }

    fn run_transitions(
        &mut self,
        now: DateTime<Utc>,
        report: &mut TurnReport,
    ) -> Result<(), CoreError> {
        for (index, transition) in self.transitions.iter().enumerate() {
            if !transition.is_eligible(|id| self.active.contains(id)) {
                continue;
            }

            if !transition.condition.is_met(&self.eval_context())? {
                continue;
            }

            if let Some(from) = transition.from {
                self.active.leave(from);
            }
            if let Some(to) = transition.to {
                self.active.enter(to, now);
            }

            tracing::debug!(
                index,
                from = transition.from.and_then(|id| self.registry.name(id)),
                to = transition.to.and_then(|id| self.registry.name(id)),
                "transition fired"
            );
            report.fired.push(FiredTransition {
                index,
                from: transition.from,
                to: transition.to,
            });

            if let Some(post) = &transition.post {
                post.execute(&mut self.attributes)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionRegistry, NamedAction};
    use crate::clock::{Clock, ManualClock};
    use crate::condition::Condition;
    use crate::config::EngineConfig;
    use crate::post_transition::{Operation, PostTransition};
    use crate::transition::Transition;
    use crate::value::Value;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const STATES: [&str; 10] = [
        "NONE", "ALIVE", "DEAD", "ASLEEP", "AWAKE", "HUNGRY", "THIRSTY", "BORED", "EATING",
        "EXHAUSTED",
    ];

    fn clock() -> ManualClock {
        ManualClock::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn human(clock: &ManualClock) -> Machine {
        Machine::builder()
            .states(STATES)
            .initial("ALIVE")
            .initial("ASLEEP")
            .initial("BORED")
            .attribute("hunger", 0)
            .attribute("thirst", 0)
            .attribute("sleepiness", 100)
            .attribute("happiness", 50)
            .attribute("boredom", 10)
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap()
    }

    fn id(machine: &Machine, name: &str) -> StateId {
        machine.state_id(name).unwrap()
    }

    fn wake_up(machine: &Machine, condition: Condition) -> Transition {
        Transition::between(id(machine, "ASLEEP"), id(machine, "AWAKE")).when(condition)
    }

    #[test]
    fn test_turn_without_rules_is_noop() {
        let clock = clock();
        let mut machine = human(&clock);
        let attributes = machine.attributes().clone();
        let active = machine.active_states().clone();

        clock.advance_secs(10);
        let report = machine.turn(true).unwrap();

        assert!(report.is_idle());
        assert!(report.stable);
        assert_eq!(report.cycles, 1);
        assert_eq!(machine.attributes(), &attributes);
        assert_eq!(machine.active_states(), &active);
    }

    #[test]
    fn test_transition_with_post_assignment() {
        let clock = clock();
        let mut machine = human(&clock);
        let t = wake_up(&machine, Condition::new(["[ALIVE]"]))
            .then(PostTransition::new().assign("<sleepiness> = 0"));
        machine.add_transition(t).unwrap();

        let report = machine.turn(false).unwrap();

        assert_eq!(report.transitions_fired(), 1);
        assert!(!machine.is_named("ASLEEP").unwrap());
        assert!(machine.is_named("AWAKE").unwrap());
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_entered_state_gets_turn_timestamp() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::always()))
            .unwrap();

        let at = clock.now() + chrono::Duration::seconds(90);
        machine.turn_at(at, false).unwrap();

        assert_eq!(machine.active_since(id(&machine, "AWAKE")), Some(at));
    }

    #[test]
    fn test_unsourced_transition_considered_every_turn() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::new(["[ALIVE]"])))
            .unwrap();
        machine
            .add_transition(Transition::new(None, Some(id(&machine, "HUNGRY"))).when(
                Condition::new(["{hunger} >= 50", "[ALIVE]", "[AWAKE]"]),
            ))
            .unwrap();

        machine.set_attribute("hunger", 50).unwrap();
        machine.turn(true).unwrap();

        assert!(machine.is_named("HUNGRY").unwrap());
    }

    #[test]
    fn test_unsourced_counter_fires_each_turn() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(
                Transition::new(None, None)
                    .then(PostTransition::new().assign("<boredom> = {boredom} + 1")),
            )
            .unwrap();

        for _ in 0..3 {
            machine.turn(false).unwrap();
        }
        assert_eq!(machine.attribute("boredom"), Some(&Value::Int(13)));
    }

    #[test]
    fn test_negated_condition_blocks_transition() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::new(["[!ALIVE]"])))
            .unwrap();

        let report = machine.turn(false).unwrap();

        assert_eq!(report.transitions_fired(), 0);
        assert!(machine.is_named("ASLEEP").unwrap());
        assert!(machine.is_not(id(&machine, "AWAKE")));
    }

    #[test]
    fn test_inactive_source_is_skipped() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(Transition::between(
                id(&machine, "AWAKE"),
                id(&machine, "EXHAUSTED"),
            ))
            .unwrap();

        machine.turn(true).unwrap();
        assert!(!machine.is_named("EXHAUSTED").unwrap());
    }

    #[test]
    fn test_later_transitions_see_earlier_changes() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::always()))
            .unwrap();
        machine
            .add_transition(Transition::between(
                id(&machine, "AWAKE"),
                id(&machine, "EATING"),
            ))
            .unwrap();

        let report = machine.turn(false).unwrap();

        assert_eq!(report.transitions_fired(), 2);
        assert_eq!(machine.active_names(), vec!["ALIVE", "BORED", "EATING"]);
    }

    #[test]
    fn test_recursive_turn_reaches_fixed_point() {
        let clock = clock();
        let mut machine = human(&clock);
        // AWAKE -> EATING registered first, so a single pass only reaches AWAKE.
        machine
            .add_transition(
                Transition::between(id(&machine, "AWAKE"), id(&machine, "EATING"))
                    .when(Condition::new(["[ALIVE]"])),
            )
            .unwrap();
        machine
            .add_transition(wake_up(&machine, Condition::new(["[ALIVE]"])))
            .unwrap();

        let mut single = machine.clone();
        single.turn(false).unwrap();
        assert!(single.is_named("AWAKE").unwrap());
        assert!(!single.is_named("EATING").unwrap());

        let report = machine.turn(true).unwrap();
        assert!(machine.is_named("EATING").unwrap());
        assert!(!machine.is_named("AWAKE").unwrap());
        assert_eq!(report.cycles, 3);
        assert!(report.stable);
    }

    #[test]
    fn test_self_loop_is_stable() {
        let clock = clock();
        let mut machine = human(&clock);
        let bored = id(&machine, "BORED");
        machine
            .add_transition(Transition::between(bored, bored))
            .unwrap();

        let report = machine.turn(true).unwrap();

        assert_eq!(report.cycles, 1);
        assert!(machine.is(bored));
        assert_eq!(machine.active_since(bored), Some(clock.now()));
    }

    #[test]
    fn test_rotation_hits_cycle_limit() {
        let clock = clock();
        let mut machine = human(&clock).with_config(EngineConfig::default().with_max_cycles(8));
        let (asleep, awake, eating) = (
            id(&machine, "ASLEEP"),
            id(&machine, "AWAKE"),
            id(&machine, "EATING"),
        );
        // Registered against the direction of travel, so the active set keeps
        // rotating and never settles.
        for (from, to) in [(eating, asleep), (awake, eating), (asleep, awake)] {
            machine.add_transition(Transition::between(from, to)).unwrap();
        }

        let err = machine.turn(true).unwrap_err();
        assert!(matches!(err, CoreError::CycleLimitExceeded { limit: 8 }));
        assert_eq!(err.error_code(), "CYCLE_LIMIT");
    }

    #[test]
    fn test_cycle_limit_allows_settling_turns() {
        let clock = clock();
        let mut machine = human(&clock).with_config(EngineConfig::default().with_max_cycles(3));
        machine
            .add_transition(wake_up(&machine, Condition::always()))
            .unwrap();

        let report = machine.turn(true).unwrap();
        assert_eq!(report.cycles, 2);
    }

    #[test]
    fn test_non_recursive_turn_reports_unstable() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::always()))
            .unwrap();

        let report = machine.turn(false).unwrap();
        assert_eq!(report.cycles, 1);
        assert!(!report.stable);
    }

    #[test]
    fn test_tick_drains_attribute_until_transition() {
        let clock = clock();
        let mut machine = human(&clock);
        let asleep = id(&machine, "ASLEEP");
        machine
            .add_tick(asleep, "<sleepiness> = {sleepiness} - 15", 1)
            .unwrap();
        machine
            .add_transition(wake_up(&machine, Condition::new(["{sleepiness} <= 0"])))
            .unwrap();

        clock.advance_secs(7);
        let report = machine.turn(false).unwrap();

        assert_eq!(report.tick_firings, 7);
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(-5)));
        assert!(!machine.is(asleep));
        assert!(machine.is_named("AWAKE").unwrap());

        // The tick's state is gone, so further time changes nothing.
        clock.advance_secs(5);
        machine.turn(false).unwrap();
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(-5)));
    }

    #[test]
    fn test_ticks_accumulate_across_turns() {
        let clock = clock();
        let mut machine = human(&clock);
        let asleep = id(&machine, "ASLEEP");
        machine
            .add_tick(asleep, "<sleepiness> = {sleepiness} - 15", 1)
            .unwrap();

        clock.advance_secs(1);
        machine.turn(false).unwrap();
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(85)));

        clock.advance_secs(2);
        let mut resumed = machine.clone();
        resumed.turn(false).unwrap();
        assert_eq!(resumed.attribute("sleepiness"), Some(&Value::Int(55)));

        resumed
            .add_transition(wake_up(&resumed, Condition::new(["{sleepiness} <= 0"])))
            .unwrap();
        resumed
            .add_tick(asleep, "<sleepiness> = {sleepiness} - 40", 1)
            .unwrap();

        clock.advance_secs(1);
        resumed.turn(false).unwrap();

        assert_eq!(resumed.attribute("sleepiness"), Some(&Value::Int(0)));
        assert!(resumed.is_named("AWAKE").unwrap());
        assert!(!resumed.is(asleep));
    }

    #[test]
    fn test_recursive_turn_does_not_refire_ticks() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_tick(id(&machine, "BORED"), "<boredom> = {boredom} + 1", 1)
            .unwrap();
        machine
            .add_transition(wake_up(&machine, Condition::always()))
            .unwrap();

        clock.advance_secs(2);
        let report = machine.turn(true).unwrap();

        assert_eq!(report.cycles, 2);
        assert_eq!(report.tick_firings, 2);
        assert_eq!(machine.attribute("boredom"), Some(&Value::Int(12)));
    }

    #[test]
    fn test_native_action_runs_before_assignment() {
        let clock = clock();
        let mut machine = human(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let post = PostTransition::new()
            .action("yawn", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .assign("<sleepiness> = 0");
        machine
            .add_transition(wake_up(&machine, Condition::new(["[ALIVE]"])).then(post))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        machine.turn(false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_unbound_action_fails_until_bound() {
        let clock = clock();
        let mut machine = human(&clock);
        let post = PostTransition::new().push(Operation::Action(NamedAction::unbound("yawn")));
        machine
            .add_transition(wake_up(&machine, Condition::always()).then(post))
            .unwrap();

        let mut attempt = machine.clone();
        let err = attempt.turn(false).unwrap_err();
        assert!(matches!(err, CoreError::UnboundAction { name } if name == "yawn"));

        let mut registry = ActionRegistry::new();
        registry.register("yawn", || Ok(()));
        machine.bind_actions(&registry);
        assert_eq!(machine.turn(false).unwrap().transitions_fired(), 1);
    }

    #[test]
    fn test_failed_turn_keeps_partial_mutation() {
        let clock = clock();
        let mut machine = human(&clock);
        let post = PostTransition::new()
            .assign("<sleepiness> = 0")
            .assign("<thirst> = {missing} + 1");
        machine
            .add_transition(wake_up(&machine, Condition::always()).then(post))
            .unwrap();

        let backup = machine.clone();
        let err = machine.turn(false).unwrap_err();

        assert!(matches!(
            err.root_cause(),
            CoreError::UnknownAttribute { name } if name == "missing"
        ));
        // State change and first assignment already happened.
        assert!(machine.is_named("AWAKE").unwrap());
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(0)));

        // Restoring the clone is how callers get atomicity.
        machine = backup;
        assert!(machine.is_named("ASLEEP").unwrap());
        assert_eq!(machine.attribute("sleepiness"), Some(&Value::Int(100)));
    }

    #[test]
    fn test_condition_error_propagates() {
        let clock = clock();
        let mut machine = human(&clock);
        machine
            .add_transition(wake_up(&machine, Condition::new(["[NOWHERE]"])))
            .unwrap();

        let err = machine.turn(false).unwrap_err();
        assert!(matches!(err, CoreError::UnknownState { name } if name == "NOWHERE"));
    }

    #[test]
    fn test_clone_turns_independently() {
        let clock = clock();
        let mut original = human(&clock);
        original.set_attribute("hunger", 25).unwrap();
        original
            .add_transition(wake_up(&original, Condition::always()))
            .unwrap();

        let mut bob = original.clone();
        assert_eq!(bob.attribute("hunger"), Some(&Value::Int(25)));

        bob.turn(false).unwrap();
        assert!(bob.is_named("AWAKE").unwrap());
        assert!(original.is_named("ASLEEP").unwrap());
    }
}
