//! Continuation decision data.
//!
//! A continuation criterion maps an agent state to a [`Decision`]; the
//! runtime combines an ordered set of decisions into one
//! [`ContinuationOutcome`] with a resolved stop reason. These are the
//! data shapes; the evaluator lives in `agentry-runtime`.

use serde::{Deserialize, Serialize};

use crate::stop::{StopReason, StopSignal};

/// A single criterion's verdict on whether another step may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// This criterion wants the loop to keep going.
    RequestContinuation,
    /// This criterion has no objection, but does not ask for more work.
    AllowStop,
    /// This criterion forbids another step, for the given reason.
    ForbidContinuation(StopReason),
}

impl Decision {
    pub fn is_forbid(&self) -> bool {
        matches!(self, Decision::ForbidContinuation(_))
    }
}

/// One entry in the evaluation trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionEvaluation {
    /// Name of the criterion that produced this decision
    pub criterion: String,

    /// The decision it returned
    pub decision: Decision,

    /// Optional human-readable detail (e.g. a caught criterion error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CriterionEvaluation {
    pub fn new(criterion: impl Into<String>, decision: Decision) -> Self {
        Self {
            criterion: criterion.into(),
            decision,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// The combined result of evaluating all criteria once.
///
/// Produced fresh on each evaluation and recorded on the state; never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationOutcome {
    pub should_continue: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Ordered evaluation trace, one entry per consulted criterion
    pub evaluations: Vec<CriterionEvaluation>,
}

impl ContinuationOutcome {
    /// An outcome that lets the loop run another step.
    pub fn proceed(evaluations: Vec<CriterionEvaluation>) -> Self {
        Self {
            should_continue: true,
            stop_reason: None,
            evaluations,
        }
    }

    /// An outcome that ends the run for the given reason.
    pub fn halt(reason: StopReason, evaluations: Vec<CriterionEvaluation>) -> Self {
        Self {
            should_continue: false,
            stop_reason: Some(reason),
            evaluations,
        }
    }

    /// The outcome recorded when a collaborator raised an explicit stop
    /// signal: no criteria run, the resolved reason reflects the signal.
    pub fn from_signal(signal: &StopSignal) -> Self {
        let evaluation = CriterionEvaluation::new(
            "stop_signal",
            Decision::ForbidContinuation(signal.reason.clone()),
        )
        .with_reason(format!("{}: {}", signal.source, signal.message));
        Self {
            should_continue: false,
            stop_reason: Some(signal.reason.clone()),
            evaluations: vec![evaluation],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proceed_has_no_stop_reason() {
        let outcome = ContinuationOutcome::proceed(vec![]);
        assert!(outcome.should_continue);
        assert!(outcome.stop_reason.is_none());
    }

    #[test]
    fn halt_records_reason() {
        let outcome = ContinuationOutcome::halt(StopReason::StepsLimitReached, vec![]);
        assert!(!outcome.should_continue);
        assert_eq!(outcome.stop_reason, Some(StopReason::StepsLimitReached));
    }

    #[test]
    fn from_signal_keeps_source_and_message() {
        let signal = StopSignal::completed("stop now", "X");
        let outcome = ContinuationOutcome::from_signal(&signal);
        assert!(!outcome.should_continue);
        assert_eq!(outcome.stop_reason, Some(StopReason::Completed));
        assert_eq!(outcome.evaluations.len(), 1);
        let reason = outcome.evaluations[0].reason.as_deref().unwrap();
        assert!(reason.contains("X"));
        assert!(reason.contains("stop now"));
    }
}
