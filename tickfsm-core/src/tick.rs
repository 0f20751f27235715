//! Periodic attribute updates bound to a state.
//!
//! A tick applies its assignment once per whole elapsed interval while its
//! state is active. Missed intervals are all applied in sequence, each one
//! reading the value written by the previous one.

use crate::attributes::Attributes;
use crate::error::CoreError;
use crate::post_transition::apply_assignment;
use crate::state::{ActiveStates, StateId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A periodic rule bound to a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// State that must be active for the tick to fire.
    pub state: StateId,
    /// Assignment applied on every firing, e.g. `<hunger> = {hunger} + 1`.
    pub expression: String,
    /// Seconds between firings.
    pub interval_secs: u64,
    /// Start of the interval currently being counted.
    pub last_fire: DateTime<Utc>,
}

impl Tick {
    /// Creates a tick whose first interval starts at `now`.
    pub fn new(
        state: StateId,
        expression: impl Into<String>,
        interval_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, CoreError> {
        if interval_secs == 0 {
            return Err(CoreError::InvalidDefinition {
                reason: "tick interval must be at least one second".to_string(),
            });
        }
        // Keeps `advance` within the range chrono durations accept.
        if interval_secs > i64::MAX as u64 / 1000 {
            return Err(CoreError::InvalidDefinition {
                reason: format!("tick interval {}s is too large", interval_secs),
            });
        }

        Ok(Self {
            state,
            expression: expression.into(),
            interval_secs,
            last_fire: now,
        })
    }

    /// Whole intervals elapsed between `last_fire` and `now`.
    pub fn due_firings(&self, now: DateTime<Utc>) -> u64 {
        let elapsed = (now - self.last_fire).num_seconds();
        if elapsed <= 0 {
            return 0;
        }
        elapsed as u64 / self.interval_secs
    }

    /// Applies every due firing and advances `last_fire` by the intervals
    /// consumed, keeping any partial interval for the next call.
    ///
    /// Returns the number of firings applied. On error, firings applied so
    /// far are kept and `last_fire` advances past them only.
    pub fn fire(
        &mut self,
        now: DateTime<Utc>,
        active: &ActiveStates,
        attributes: &mut Attributes,
    ) -> Result<u64, CoreError> {
        if !active.contains(self.state) {
            return Ok(0);
        }

        let due = self.due_firings(now);
        for applied in 0..due {
            if let Err(e) = apply_assignment(&self.expression, attributes) {
                self.advance(applied);
                return Err(e);
            }
        }
        self.advance(due);

        if due > 0 {
            tracing::debug!(
                state = self.state.as_u32(),
                expression = %self.expression,
                firings = due,
                "tick fired"
            );
        }
        Ok(due)
    }

    fn advance(&mut self, firings: u64) {
        let secs = firings.saturating_mul(self.interval_secs);
        let secs = i64::try_from(secs).unwrap_or(i64::MAX / 1000);
        self.last_fire += Duration::seconds(secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn asleep() -> ActiveStates {
        let mut active = ActiveStates::new();
        active.enter(StateId(1), at(0));
        active
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Tick::new(StateId(1), "<x> = 1", 0, at(0)).is_err());
    }

    #[test]
    fn test_due_firings_counts_whole_intervals() {
        let tick = Tick::new(StateId(1), "<x> = 1", 2, at(0)).unwrap();
        assert_eq!(tick.due_firings(at(1)), 0);
        assert_eq!(tick.due_firings(at(2)), 1);
        assert_eq!(tick.due_firings(at(7)), 3);
        assert_eq!(tick.due_firings(at(-5)), 0);
    }

    #[test]
    fn test_missed_intervals_compound() {
        let mut attrs: Attributes = [("sleepiness", 100)].into_iter().collect();
        let mut tick =
            Tick::new(StateId(1), "<sleepiness> = {sleepiness} - 15", 1, at(0)).unwrap();

        let fired = tick.fire(at(3), &asleep(), &mut attrs).unwrap();

        assert_eq!(fired, 3);
        assert_eq!(attrs.get("sleepiness"), Some(&Value::Int(55)));
        assert_eq!(tick.last_fire, at(3));
    }

    #[test]
    fn test_compounding_is_not_a_snapshot() {
        let mut attrs: Attributes = [("population", 10)].into_iter().collect();
        let mut tick =
            Tick::new(StateId(1), "<population> = {population} * 2", 1, at(0)).unwrap();

        tick.fire(at(3), &asleep(), &mut attrs).unwrap();
        // 10 -> 20 -> 40 -> 80, not 10 * 2 three times from the same base.
        assert_eq!(attrs.get("population"), Some(&Value::Int(80)));
    }

    #[test]
    fn test_partial_interval_is_carried_over() {
        let mut attrs: Attributes = [("hunger", 0)].into_iter().collect();
        let mut tick = Tick::new(StateId(1), "<hunger> = {hunger} + 1", 2, at(0)).unwrap();

        assert_eq!(tick.fire(at(3), &asleep(), &mut attrs).unwrap(), 1);
        assert_eq!(tick.last_fire, at(2));

        assert_eq!(tick.fire(at(4), &asleep(), &mut attrs).unwrap(), 1);
        assert_eq!(attrs.get("hunger"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_inactive_state_is_skipped() {
        let mut attrs: Attributes = [("hunger", 0)].into_iter().collect();
        let mut tick = Tick::new(StateId(5), "<hunger> = {hunger} + 1", 1, at(0)).unwrap();

        assert_eq!(tick.fire(at(10), &asleep(), &mut attrs).unwrap(), 0);
        assert_eq!(tick.last_fire, at(0));
        assert_eq!(attrs.get("hunger"), Some(&Value::Int(0)));
    }

    #[test]
    fn test_same_instant_does_not_fire_twice() {
        let mut attrs: Attributes = [("hunger", 0)].into_iter().collect();
        let mut tick = Tick::new(StateId(1), "<hunger> = {hunger} + 1", 1, at(0)).unwrap();

        tick.fire(at(2), &asleep(), &mut attrs).unwrap();
        assert_eq!(tick.fire(at(2), &asleep(), &mut attrs).unwrap(), 0);
        assert_eq!(attrs.get("hunger"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_failure_keeps_applied_firings() {
        // x: 2 -> 1 -> 0, then the third firing divides by zero.
        let mut attrs: Attributes = [("x", 2)].into_iter().collect();
        let mut tick = Tick::new(StateId(1), "<x> = {x} - 1 + 0 / {x}", 1, at(0)).unwrap();

        let err = tick.fire(at(5), &asleep(), &mut attrs).unwrap_err();

        assert!(matches!(err.root_cause(), CoreError::ExpressionEvaluation { .. }));
        assert_eq!(attrs.get("x"), Some(&Value::Int(0)));
        assert_eq!(tick.last_fire, at(2));
    }
}
