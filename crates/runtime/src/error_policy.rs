//! Error handling policy.
//!
//! The policy decides what step errors mean for the run. It is consulted
//! before any other criterion; when it forbids, nothing else gets a say.

use std::fmt;
use std::sync::Arc;

use agentry_core::state::AgentState;
use agentry_core::step::StepError;
use agentry_core::Decision;
use agentry_core::StopReason;

/// How the run reacts to errors on the step just completed.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Any step error ends the run as failed.
    #[default]
    StopOnAnyError,

    /// Tolerate tool failures up to a bounded number of consecutive
    /// failing steps per tool; anything that is not a tool error still
    /// ends the run. The count is derived from step history, so it
    /// resets naturally when a step succeeds.
    RetryToolErrors { max_consecutive: usize },

    /// A user-supplied decision function over the whole state.
    Custom {
        name: String,
        decide: Arc<dyn Fn(&AgentState) -> Decision + Send + Sync>,
    },
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::StopOnAnyError => write!(f, "StopOnAnyError"),
            ErrorPolicy::RetryToolErrors { max_consecutive } => {
                write!(f, "RetryToolErrors({max_consecutive})")
            }
            ErrorPolicy::Custom { name, .. } => write!(f, "Custom({name})"),
        }
    }
}

impl ErrorPolicy {
    pub fn retry_tool_errors(max_consecutive: usize) -> Self {
        ErrorPolicy::RetryToolErrors { max_consecutive }
    }

    pub fn custom(
        name: impl Into<String>,
        decide: impl Fn(&AgentState) -> Decision + Send + Sync + 'static,
    ) -> Self {
        ErrorPolicy::Custom {
            name: name.into(),
            decide: Arc::new(decide),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ErrorPolicy::StopOnAnyError => "stop_on_any_error",
            ErrorPolicy::RetryToolErrors { .. } => "retry_tool_errors",
            ErrorPolicy::Custom { name, .. } => name,
        }
    }

    /// Judge the step most recently appended to history.
    ///
    /// The built-in policies return `AllowStop` when the step carries no
    /// errors; a custom policy always sees the state and decides freely.
    pub fn evaluate(&self, state: &AgentState) -> Decision {
        match self {
            ErrorPolicy::Custom { decide, .. } => decide(state),
            ErrorPolicy::StopOnAnyError => match state.last_step() {
                Some(step) if step.has_errors() => {
                    Decision::ForbidContinuation(StopReason::ErrorForbade)
                }
                _ => Decision::AllowStop,
            },
            ErrorPolicy::RetryToolErrors { max_consecutive } => {
                let Some(step) = state.last_step() else {
                    return Decision::AllowStop;
                };
                if !step.has_errors() {
                    return Decision::AllowStop;
                }
                // Only tool failures are retryable; a model or hook
                // error on the same step still ends the run.
                if step.errors.iter().any(|e| !matches!(e, StepError::Tool { .. })) {
                    return Decision::ForbidContinuation(StopReason::ErrorForbade);
                }
                let worst_streak = step
                    .failed_tools()
                    .iter()
                    .map(|tool| state.trailing_tool_failures(tool))
                    .max()
                    .unwrap_or(0);
                if worst_streak > *max_consecutive {
                    Decision::ForbidContinuation(StopReason::ErrorForbade)
                } else {
                    Decision::RequestContinuation
                }
            }
        }
    }
}
