//! Core error types.

use thiserror::Error;

/// Boxed error returned by native post-transition actions.
pub type ActionFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown attribute: {name}")]
    UnknownAttribute { name: String },

    #[error("unknown state: {name}")]
    UnknownState { name: String },

    #[error("unknown state id: {id}")]
    UnknownStateId { id: u32 },

    #[error("expression syntax error in '{expression}': {reason}")]
    ExpressionSyntax { expression: String, reason: String },

    #[error("expression evaluation failed in '{expression}': {reason}")]
    ExpressionEvaluation { expression: String, reason: String },

    #[error("post-transition operation '{operation}' failed: {source}")]
    PostTransition {
        operation: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("action '{name}' failed: {source}")]
    Action {
        name: String,
        #[source]
        source: ActionFailure,
    },

    #[error("action '{name}' is not bound to a handler")]
    UnboundAction { name: String },

    #[error("turn did not stabilize within {limit} cycles")]
    CycleLimitExceeded { limit: u32 },

    #[error("invalid machine definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    pub(crate) fn syntax(expression: &str, reason: impl Into<String>) -> Self {
        CoreError::ExpressionSyntax {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn evaluation(expression: &str, reason: impl Into<String>) -> Self {
        CoreError::ExpressionEvaluation {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the innermost error, unwrapping post-transition context.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::PostTransition { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Returns a stable error code for logs and host applications.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnknownAttribute { .. } => "UNKNOWN_ATTRIBUTE",
            CoreError::UnknownState { .. } => "UNKNOWN_STATE",
            CoreError::UnknownStateId { .. } => "UNKNOWN_STATE",
            CoreError::ExpressionSyntax { .. } => "EXPRESSION_SYNTAX",
            CoreError::ExpressionEvaluation { .. } => "EXPRESSION_EVALUATION",
            CoreError::PostTransition { .. } => "POST_TRANSITION",
            CoreError::Action { .. } => "ACTION_FAILED",
            CoreError::UnboundAction { .. } => "ACTION_UNBOUND",
            CoreError::CycleLimitExceeded { .. } => "CYCLE_LIMIT",
            CoreError::InvalidDefinition { .. } => "BAD_DEFINITION",
            CoreError::Json(_) => "BAD_DEFINITION",
            CoreError::Yaml(_) => "BAD_DEFINITION",
        }
    }
}
