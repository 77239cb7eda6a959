//! Stop signals and stop reasons.
//!
//! A [`StopSignal`] is a deliberate, explicit request to end a run. Any
//! collaborator (driver, tool, hook) may raise one; the loop treats it
//! as control-flow data, never as a fault. The signal's declared reason
//! decides the terminal status: `Completed` finishes the run as done,
//! anything else interrupts it as `Stopped`.

use serde::{Deserialize, Serialize};

/// Why a run stopped (or why continuation was forbidden).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Nothing left to do; normal, non-error termination.
    Completed,
    /// A collaborator explicitly requested termination.
    StopRequested,
    /// The steps-limit criterion forbade continuation.
    StepsLimitReached,
    /// The token-budget criterion forbade continuation.
    TokenBudgetExceeded,
    /// The wall-clock timeout criterion forbade continuation.
    TimeoutReached,
    /// The error policy (or a failed criterion) forbade continuation.
    ErrorForbade,
    /// A user-supplied criterion forbade continuation.
    Custom(String),
}

impl StopReason {
    /// Whether this reason terminates the run as successfully done.
    pub fn is_success(&self) -> bool {
        matches!(self, StopReason::Completed)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Completed => write!(f, "completed"),
            StopReason::StopRequested => write!(f, "stop_requested"),
            StopReason::StepsLimitReached => write!(f, "steps_limit_reached"),
            StopReason::TokenBudgetExceeded => write!(f, "token_budget_exceeded"),
            StopReason::TimeoutReached => write!(f, "timeout_reached"),
            StopReason::ErrorForbade => write!(f, "error_forbade"),
            StopReason::Custom(s) => write!(f, "custom({s})"),
        }
    }
}

/// An explicit request to end the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopSignal {
    /// Declared reason; decides `Completed` vs `Stopped` terminal status.
    pub reason: StopReason,

    /// Human-readable explanation.
    pub message: String,

    /// Which component requested the stop.
    pub source: String,
}

impl StopSignal {
    pub fn new(
        reason: StopReason,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            reason,
            message: message.into(),
            source: source.into(),
        }
    }

    /// A signal declaring the task done.
    pub fn completed(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(StopReason::Completed, message, source)
    }

    /// A signal interrupting the run without declaring it done.
    pub fn requested(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self::new(StopReason::StopRequested, message, source)
    }
}
