//! Post-transition operations.
//!
//! Operations run in order once a transition fires. An operation is either a
//! native action or a textual assignment of the form `<attr> = expr`, whose
//! right-hand side may reference other attributes through `{name}`
//! placeholders. Ticks reuse the same assignment form.

use crate::action::{ActionRegistry, NamedAction};
use crate::attributes::Attributes;
use crate::error::{ActionFailure, CoreError};
use crate::expr;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single post-transition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// `<attr> = expr`
    Assign(String),
    /// Named native callback.
    Action(NamedAction),
}

/// Ordered list of operations attached to a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostTransition {
    operations: Vec<Operation>,
}

impl PostTransition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an assignment operation.
    pub fn assign(mut self, assignment: impl Into<String>) -> Self {
        self.operations.push(Operation::Assign(assignment.into()));
        self
    }

    /// Appends a native action.
    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Result<(), ActionFailure> + Send + Sync + 'static,
    {
        self.operations
            .push(Operation::Action(NamedAction::new(name, action)));
        self
    }

    /// Appends an already constructed operation.
    pub fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Runs every operation in order against the attribute store.
    ///
    /// Stops at the first failure; operations already applied stay applied.
    pub fn execute(&self, attributes: &mut Attributes) -> Result<(), CoreError> {
        for operation in &self.operations {
            match operation {
                Operation::Assign(text) => {
                    apply_assignment(text, attributes)?;
                }
                Operation::Action(action) => action.invoke()?,
            }
        }
        Ok(())
    }

    /// Binds every action with a matching handler; returns how many were bound.
    pub fn bind_actions(&mut self, registry: &ActionRegistry) -> usize {
        let mut bound = 0;
        for operation in &mut self.operations {
            if let Operation::Action(action) = operation {
                if let Some(handler) = registry.get(action.name()) {
                    action.bind(handler);
                    bound += 1;
                }
            }
        }
        bound
    }

    /// Names of actions still lacking a handler.
    pub fn unbound_actions(&self) -> impl Iterator<Item = &str> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Action(action) if !action.is_bound() => Some(action.name()),
            _ => None,
        })
    }
}

/// A parsed `<target> = expression` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub target: &'a str,
    pub expression: &'a str,
}

impl<'a> Assignment<'a> {
    pub fn parse(text: &'a str) -> Result<Self, CoreError> {
        let body = text.trim_start();
        let body = body
            .strip_prefix('<')
            .ok_or_else(|| CoreError::syntax(text, "assignment must start with '<attr>'"))?;

        let close = body
            .find('>')
            .ok_or_else(|| CoreError::syntax(text, "unterminated '<' assignment target"))?;
        let target = body[..close].trim();
        if target.is_empty() {
            return Err(CoreError::syntax(text, "empty assignment target"));
        }

        let expression = body[close + 1..]
            .trim_start()
            .strip_prefix('=')
            .ok_or_else(|| CoreError::syntax(text, "expected '=' after assignment target"))?;

        Ok(Self { target, expression })
    }
}

/// Applies a single assignment, returning the value written.
///
/// All failures are reported as [`CoreError::PostTransition`] wrapping the
/// underlying cause.
pub fn apply_assignment(text: &str, attributes: &mut Attributes) -> Result<Value, CoreError> {
    assign(text, attributes).map_err(|source| CoreError::PostTransition {
        operation: text.to_string(),
        source: Box::new(source),
    })
}

fn assign(text: &str, attributes: &mut Attributes) -> Result<Value, CoreError> {
    let assignment = Assignment::parse(text)?;
    attributes.require(assignment.target)?;

    let value = expr::evaluate(assignment.expression, attributes)?;
    attributes.set(assignment.target, value.clone())?;
    tracing::trace!(target_attr = assignment.target, value = %value, "assigned");

    Ok(value)
}
