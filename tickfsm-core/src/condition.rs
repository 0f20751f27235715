//! Transition conditions.
//!
//! A condition is an ordered list of clauses. Each clause is free text that
//! may hold state-membership tests (`[ALIVE]`, `[!ASLEEP]`) and an expression
//! with `{attr}` placeholders (`{hunger} >= 50`).
//!
//! Scoring is literal: every satisfied bracket test adds one to a counter, a
//! clause with placeholders adds one more when its expression is truthy, and
//! the condition holds only when the counter equals the number of clauses. A
//! single clause mixing a bracket test and an expression therefore contributes
//! up to two, which is deliberately kept rather than reinterpreted as a plain
//! AND of clauses.

use crate::attributes::Attributes;
use crate::error::CoreError;
use crate::expr;
use crate::state::{ActiveStates, StateRegistry};
use serde::{Deserialize, Serialize};

/// Conjunctive set of clauses guarding a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    clauses: Vec<String>,
}

impl Condition {
    pub fn new<I, S>(clauses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            clauses: clauses.into_iter().map(Into::into).collect(),
        }
    }

    /// A condition with no clauses; always satisfied.
    pub fn always() -> Self {
        Self::default()
    }

    /// Appends a clause.
    pub fn and(mut self, clause: impl Into<String>) -> Self {
        self.clauses.push(clause.into());
        self
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Scores every clause and reports whether the total equals the clause count.
    pub fn is_met(&self, ctx: &EvalContext<'_>) -> Result<bool, CoreError> {
        let mut met = 0usize;
        for clause in &self.clauses {
            met += score_clause(clause, ctx)?;
        }

        let satisfied = met == self.clauses.len();
        tracing::trace!(
            clauses = self.clauses.len(),
            met,
            satisfied,
            "condition scored"
        );
        Ok(satisfied)
    }
}

/// Read-only view a condition is evaluated against.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub registry: &'a StateRegistry,
    pub active: &'a ActiveStates,
    pub attributes: &'a Attributes,
}

/// A `[NAME]` or `[!NAME]` test found in a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTest<'a> {
    pub name: &'a str,
    pub negated: bool,
}

/// A clause split into its bracket tests and the text left for the evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClauseParts<'a> {
    pub state_tests: Vec<StateTest<'a>>,
    pub expression: String,
}

/// Splits bracket groups out of a clause.
pub fn split_clause(clause: &str) -> Result<ClauseParts<'_>, CoreError> {
    let mut state_tests = Vec::new();
    let mut expression = String::with_capacity(clause.len());
    let mut rest = clause;

    while let Some(open) = rest.find('[') {
        expression.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find(']')
            .ok_or_else(|| CoreError::syntax(clause, "unterminated '[' state test"))?;

        let inner = after[..close].trim();
        let (negated, name) = match inner.strip_prefix('!') {
            Some(name) => (true, name.trim()),
            None => (false, inner),
        };
        state_tests.push(StateTest { name, negated });
        rest = &after[close + 1..];
    }
    expression.push_str(rest);

    Ok(ClauseParts {
        state_tests,
        expression,
    })
}

fn score_clause(clause: &str, ctx: &EvalContext<'_>) -> Result<usize, CoreError> {
    let parts = split_clause(clause)?;
    let mut score = 0;

    for test in &parts.state_tests {
        let id = ctx.registry.id(test.name)?;
        if ctx.active.contains(id) != test.negated {
            score += 1;
        }
    }

    if expr::has_placeholder(&parts.expression)
        && expr::evaluate(&parts.expression, ctx.attributes)?.is_truthy()
    {
        score += 1;
    }

    Ok(score)
}
