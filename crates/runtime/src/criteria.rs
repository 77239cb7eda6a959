//! Continuation criteria and their evaluator.
//!
//! After each step the loop asks an ordered set of criteria whether
//! another step may run. The error policy is consulted first and
//! short-circuits everything else when it forbids. Built-in limit
//! criteria come next, then user criteria in registration order; the
//! first forbidding decision wins. The loop continues only if at least
//! one consulted criterion actively requested continuation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use agentry_core::error::CriterionError;
use agentry_core::state::AgentState;
use agentry_core::{ContinuationOutcome, CriterionEvaluation, Decision, StopReason};
use tracing::warn;

use crate::config::LoopLimits;
use crate::error_policy::ErrorPolicy;

/// A pluggable judgment over the agent state.
///
/// Evaluation must be pure with respect to the state: criteria derive
/// everything they need from the snapshot and keep no counters of their
/// own, so replaying a state always yields the same decision.
pub trait ContinuationCriterion: Send + Sync {
    /// Name used in the evaluation trace.
    fn name(&self) -> &str;

    fn evaluate(&self, state: &AgentState) -> Result<Decision, CriterionError>;
}

/// Forbids continuation once the step count reaches the limit.
/// A zero limit disables the criterion.
pub struct StepsLimit(pub u32);

impl ContinuationCriterion for StepsLimit {
    fn name(&self) -> &str {
        "steps_limit"
    }

    fn evaluate(&self, state: &AgentState) -> Result<Decision, CriterionError> {
        if self.0 > 0 && state.step_count() >= self.0 as usize {
            Ok(Decision::ForbidContinuation(StopReason::StepsLimitReached))
        } else {
            Ok(Decision::AllowStop)
        }
    }
}

/// Forbids continuation once accumulated usage exceeds the budget.
/// A zero budget disables the criterion.
pub struct TokenBudget(pub u64);

impl ContinuationCriterion for TokenBudget {
    fn name(&self) -> &str {
        "token_budget"
    }

    fn evaluate(&self, state: &AgentState) -> Result<Decision, CriterionError> {
        if self.0 > 0 && state.usage.total_tokens >= self.0 {
            Ok(Decision::ForbidContinuation(StopReason::TokenBudgetExceeded))
        } else {
            Ok(Decision::AllowStop)
        }
    }
}

/// Forbids continuation once accumulated execution time exceeds the
/// limit. Reads the state's summed step durations, so time spent paused
/// between `next_step` calls never counts. Zero disables the criterion.
pub struct ExecutionTimeout(pub std::time::Duration);

impl ContinuationCriterion for ExecutionTimeout {
    fn name(&self) -> &str {
        "execution_timeout"
    }

    fn evaluate(&self, state: &AgentState) -> Result<Decision, CriterionError> {
        if !self.0.is_zero() && state.execution_time >= self.0 {
            Ok(Decision::ForbidContinuation(StopReason::TimeoutReached))
        } else {
            Ok(Decision::AllowStop)
        }
    }
}

/// Adapter turning a closure into a named criterion.
pub struct FnCriterion {
    name: String,
    decide: Arc<dyn Fn(&AgentState) -> Decision + Send + Sync>,
}

impl FnCriterion {
    pub fn new(
        name: impl Into<String>,
        decide: impl Fn(&AgentState) -> Decision + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            decide: Arc::new(decide),
        }
    }
}

impl ContinuationCriterion for FnCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, state: &AgentState) -> Result<Decision, CriterionError> {
        Ok((self.decide)(state))
    }
}

/// The ordered evaluator the loop consults after each step.
pub struct ContinuationCriteria {
    error_policy: ErrorPolicy,
    built_in: Vec<Arc<dyn ContinuationCriterion>>,
    user: Vec<Arc<dyn ContinuationCriterion>>,
}

impl Default for ContinuationCriteria {
    fn default() -> Self {
        Self::with_limits(&LoopLimits::default())
    }
}

impl ContinuationCriteria {
    /// Build the default stack for the given limits: steps, tokens,
    /// timeout, in that order.
    pub fn with_limits(limits: &LoopLimits) -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            built_in: built_in_for(limits),
            user: Vec::new(),
        }
    }

    pub fn set_limits(&mut self, limits: &LoopLimits) {
        self.built_in = built_in_for(limits);
    }

    pub fn set_error_policy(&mut self, policy: ErrorPolicy) {
        self.error_policy = policy;
    }

    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.error_policy
    }

    /// Append a user criterion. Runs after the built-ins, in
    /// registration order.
    pub fn push(&mut self, criterion: Arc<dyn ContinuationCriterion>) {
        self.user.push(criterion);
    }

    /// Evaluate all criteria against the state and combine the verdicts.
    ///
    /// Never fails: a criterion that errors or panics is converted into
    /// a forbidding decision with the failure message in the trace.
    pub fn evaluate(&self, state: &AgentState) -> ContinuationOutcome {
        let mut evaluations = Vec::new();
        let mut requested = false;

        let policy_decision = self.error_policy.evaluate(state);
        evaluations.push(CriterionEvaluation::new(
            self.error_policy.name(),
            policy_decision.clone(),
        ));
        match policy_decision {
            Decision::ForbidContinuation(_) => {
                return ContinuationOutcome::halt(StopReason::ErrorForbade, evaluations);
            }
            Decision::RequestContinuation => requested = true,
            Decision::AllowStop => {}
        }

        for criterion in self.built_in.iter().chain(self.user.iter()) {
            let (decision, detail) = evaluate_guarded(criterion.as_ref(), state);
            let mut entry = CriterionEvaluation::new(criterion.name(), decision.clone());
            if let Some(detail) = detail {
                entry = entry.with_reason(detail);
            }
            evaluations.push(entry);
            match decision {
                Decision::ForbidContinuation(reason) => {
                    return ContinuationOutcome::halt(reason, evaluations);
                }
                Decision::RequestContinuation => requested = true,
                Decision::AllowStop => {}
            }
        }

        if requested {
            ContinuationOutcome::proceed(evaluations)
        } else {
            // Nobody asked for more work: the run is done.
            ContinuationOutcome::halt(StopReason::Completed, evaluations)
        }
    }
}

fn built_in_for(limits: &LoopLimits) -> Vec<Arc<dyn ContinuationCriterion>> {
    vec![
        Arc::new(StepsLimit(limits.max_steps)),
        Arc::new(TokenBudget(limits.max_tokens)),
        Arc::new(ExecutionTimeout(limits.timeout().unwrap_or_default())),
    ]
}

/// Run one criterion, recovering from errors and panics locally.
fn evaluate_guarded(
    criterion: &dyn ContinuationCriterion,
    state: &AgentState,
) -> (Decision, Option<String>) {
    match catch_unwind(AssertUnwindSafe(|| criterion.evaluate(state))) {
        Ok(Ok(decision)) => (decision, None),
        Ok(Err(err)) => {
            warn!(criterion = criterion.name(), error = %err, "Criterion failed");
            (
                Decision::ForbidContinuation(StopReason::ErrorForbade),
                Some(err.to_string()),
            )
        }
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "criterion panicked".to_string());
            warn!(criterion = criterion.name(), detail, "Criterion panicked");
            (
                Decision::ForbidContinuation(StopReason::ErrorForbade),
                Some(detail),
            )
        }
    }
}
