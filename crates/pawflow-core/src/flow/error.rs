//! Engine error taxonomy.
//!
//! Every failure surfaced while executing a job is an `EngineError`. The
//! retry controller uses [`EngineError::is_retryable`] to decide between
//! rescheduling the job and failing the run.

use pawflow_types::error::RepositoryError;
use pawflow_types::plan::PlanTier;

use super::duration::DurationError;
use super::expression::ExpressionError;
use super::mail::MailError;

/// Errors raised by the execution engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The flow definition is malformed (missing step, bad duration, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The tenant's plan does not permit the action.
    #[error("action '{action}' is not available on the {plan} plan")]
    PlanLimit { action: String, plan: PlanTier },

    /// No handler is registered for the action type.
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// The step kind is not one the engine knows.
    #[error("unknown step kind '{kind}' for step '{step_id}'")]
    UnknownStep { step_id: String, kind: String },

    /// A temporary failure; the job should be retried.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("mail delivery failed: {0}")]
    Mail(#[from] MailError),
}

impl EngineError {
    /// Whether the failing job should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transient(_) | EngineError::Repository(_) | EngineError::Mail(_)
        )
    }

    /// Stable kind label written to logs and run errors.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::PlanLimit { .. } => "plan_limit",
            EngineError::UnsupportedAction(_) => "unsupported_action",
            EngineError::UnknownStep { .. } => "unknown_step",
            EngineError::Transient(_) => "transient",
            EngineError::Repository(_) => "repository",
            EngineError::Mail(_) => "mail",
        }
    }
}

impl From<DurationError> for EngineError {
    fn from(e: DurationError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}

impl From<ExpressionError> for EngineError {
    fn from(e: ExpressionError) -> Self {
        EngineError::Configuration(e.to_string())
    }
}
