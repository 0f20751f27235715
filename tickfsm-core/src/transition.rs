//! Transition rules.

use crate::condition::Condition;
use crate::post_transition::PostTransition;
use crate::state::StateId;
use serde::{Deserialize, Serialize};

/// A rule that leaves `from`, enters `to` and runs post operations once its
/// condition holds.
///
/// Without a `from` state the transition is considered on every turn. Without
/// a `to` state nothing is entered and the transition acts purely through its
/// post operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<StateId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<StateId>,

    #[serde(default)]
    pub condition: Condition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<PostTransition>,
}

impl Transition {
    pub fn new(from: Option<StateId>, to: Option<StateId>) -> Self {
        Self {
            from,
            to,
            ..Self::default()
        }
    }

    /// A transition between two states.
    pub fn between(from: StateId, to: StateId) -> Self {
        Self::new(Some(from), Some(to))
    }

    /// Replaces the condition.
    pub fn when(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    /// Sets the post-transition operations.
    pub fn then(mut self, post: PostTransition) -> Self {
        self.post = Some(post);
        self
    }

    /// Whether the transition may be considered given `from`'s membership.
    pub fn is_eligible(&self, is_active: impl Fn(StateId) -> bool) -> bool {
        self.from.map_or(true, is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsourced_transition_is_always_eligible() {
        let t = Transition::new(None, Some(StateId(1)));
        assert!(t.is_eligible(|_| false));
    }

    #[test]
    fn test_sourced_transition_needs_active_source() {
        let t = Transition::between(StateId(0), StateId(1));
        assert!(t.is_eligible(|id| id == StateId(0)));
        assert!(!t.is_eligible(|id| id == StateId(1)));
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let t = Transition::new(None, Some(StateId(3))).when(Condition::new(["{hunger} >= 50"]));
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"to": 3, "condition": ["{hunger} >= 50"]})
        );

        let parsed: Transition = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, t);
    }
}
