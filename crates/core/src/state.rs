//! Immutable agent state.
//!
//! [`AgentState`] is a snapshot of the conversation plus execution
//! bookkeeping. Every mutator consumes `self` and returns a new value;
//! the loop threads a sequence of these values through a run, so two
//! concurrent sessions can never share state by reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::continuation::ContinuationOutcome;
use crate::message::Message;
use crate::step::AgentStep;
use crate::stop::{StopReason, StopSignal};
use crate::usage::Usage;

/// Execution status. `InProgress` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// The loop may run another step
    InProgress,
    /// The run finished as done
    Completed,
    /// The run terminated on a failure
    Failed,
    /// The run was deliberately interrupted
    Stopped,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::InProgress)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::InProgress => write!(f, "in_progress"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
            AgentStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Immutable snapshot of a run.
///
/// Created empty (apart from the seed messages) at run start; every
/// loop iteration produces a new value. The structural invariant is
/// `step_history.len() == continuation_history.len()` whenever the loop
/// hands a state back to a caller; a mismatch is a programmer error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Ordered conversation turns
    pub messages: Vec<Message>,

    /// Completed steps, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_history: Vec<AgentStep>,

    /// The step currently being built, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<AgentStep>,

    /// One recorded continuation outcome per completed step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub continuation_history: Vec<ContinuationOutcome>,

    /// Accumulated token usage, failed steps included
    #[serde(default)]
    pub usage: Usage,

    pub status: AgentStatus,

    /// When the current step's driver work began
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_started_at: Option<DateTime<Utc>>,

    /// When the run began
    pub execution_started_at: DateTime<Utc>,

    /// Running sum of per-step durations. Pauses between `next_step`
    /// calls do not count.
    #[serde(default)]
    pub execution_time: Duration,

    /// Set only on terminal states
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Set when the run terminated via an explicit stop signal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<StopSignal>,

    /// Terminal failure detail, when status is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentState {
    /// Create a fresh in-progress state seeded with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            step_history: Vec::new(),
            current_step: None,
            continuation_history: Vec::new(),
            usage: Usage::default(),
            status: AgentStatus::InProgress,
            step_started_at: None,
            execution_started_at: Utc::now(),
            execution_time: Duration::ZERO,
            stop_reason: None,
            stop_signal: None,
            error: None,
        }
    }

    /// Append one message to the conversation.
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the conversation (used when a hook mutates the context).
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Stamp the per-step start time. Called after any upstream state
    /// work and before the driver is invoked, so step duration measures
    /// only driver and tool work.
    pub fn mark_step_started(mut self) -> Self {
        self.step_started_at = Some(Utc::now());
        self
    }

    /// Park a step as the one currently being built.
    pub fn with_current_step(mut self, step: AgentStep) -> Self {
        self.current_step = Some(step);
        self
    }

    /// Append a completed step: merges its usage (failed steps too) and
    /// accumulates its duration into `execution_time`.
    pub fn with_step(mut self, mut step: AgentStep) -> Self {
        step.finish();
        if let Some(started) = self.step_started_at.take() {
            step.started_at = started;
        }
        self.usage.merge(&step.usage);
        self.execution_time += step.duration();
        self.current_step = None;
        self.step_history.push(step);
        self
    }

    /// Record the continuation outcome for the step just appended.
    pub fn with_continuation(mut self, outcome: ContinuationOutcome) -> Self {
        self.continuation_history.push(outcome);
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_stop_reason(mut self, reason: StopReason) -> Self {
        self.stop_reason = Some(reason);
        self
    }

    /// Attach an explicit stop signal; also sets the stop reason.
    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_reason = Some(signal.reason.clone());
        self.stop_signal = Some(signal);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn step_count(&self) -> usize {
        self.step_history.len()
    }

    pub fn last_step(&self) -> Option<&AgentStep> {
        self.step_history.last()
    }

    pub fn last_continuation(&self) -> Option<&ContinuationOutcome> {
        self.continuation_history.last()
    }

    /// Whether step history and recorded outcomes line up. The loop
    /// asserts this before deciding on a next step; a `false` here is a
    /// caller bug, never a runtime condition.
    pub fn is_consistent(&self) -> bool {
        self.step_history.len() == self.continuation_history.len()
    }

    /// Length of the trailing run of steps in which the named tool
    /// failed. Stops counting at the first step where the tool
    /// succeeded or was not invoked.
    pub fn trailing_tool_failures(&self, tool: &str) -> usize {
        self.step_history
            .iter()
            .rev()
            .take_while(|step| step.tool_failed(tool))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::AgentStep;
    use crate::tool::{ToolCall, ToolResult};

    fn step_with_tool(name: &str, ok: bool) -> AgentStep {
        let mut step = AgentStep::new(vec![]);
        let now = Utc::now();
        let result = if ok {
            Ok(ToolResult {
                call_id: "c".into(),
                output: "ok".into(),
                data: None,
            })
        } else {
            Err("boom".into())
        };
        step.tool_executions.push(crate::step::ToolExecution {
            call: ToolCall {
                id: "c".into(),
                name: name.into(),
                arguments: serde_json::json!({}),
            },
            result,
            started_at: now,
            ended_at: now,
        });
        step
    }

    #[test]
    fn new_state_is_in_progress_and_consistent() {
        let state = AgentState::new(vec![Message::user("hi")]);
        assert_eq!(state.status, AgentStatus::InProgress);
        assert!(state.is_consistent());
        assert_eq!(state.step_count(), 0);
    }

    #[test]
    fn mutators_return_new_values() {
        let state = AgentState::new(vec![]);
        let state = state.with_message(Message::user("one"));
        let state = state.with_message(Message::assistant("two"));
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn with_step_merges_usage_even_for_failed_steps() {
        let mut step = AgentStep::new(vec![]);
        step.usage = Usage::new(100, 20);
        step.errors.push(crate::step::StepError::Model {
            message: "provider timeout".into(),
        });

        let state = AgentState::new(vec![]).with_step(step);
        assert_eq!(state.usage.input_tokens, 100);
        assert_eq!(state.usage.total_tokens, 120);
    }

    #[test]
    fn with_step_uses_pre_driver_start_stamp() {
        let state = AgentState::new(vec![]).mark_step_started();
        let stamped = state.step_started_at.unwrap();
        let state = state.with_step(AgentStep::new(vec![]));
        assert_eq!(state.step_history[0].started_at, stamped);
        assert!(state.step_started_at.is_none());
    }

    #[test]
    fn execution_time_sums_step_durations_not_wall_time() {
        let now = Utc::now();
        let mut first = AgentStep::new(vec![]);
        first.started_at = now - chrono::Duration::seconds(5);
        first.ended_at = Some(now);
        let mut second = AgentStep::new(vec![]);
        second.started_at = now - chrono::Duration::seconds(3);
        second.ended_at = Some(now);

        // both steps land instantly in wall time, yet the accumulated
        // execution time is the sum of their recorded durations
        let state = AgentState::new(vec![]).with_step(first);
        assert_eq!(state.execution_time, Duration::from_secs(5));
        let state = state.with_step(second);
        assert_eq!(state.execution_time, Duration::from_secs(8));
    }

    #[test]
    fn trailing_tool_failures_counts_only_the_trailing_run() {
        let state = AgentState::new(vec![])
            .with_step(step_with_tool("search", false))
            .with_step(step_with_tool("search", true))
            .with_step(step_with_tool("search", false))
            .with_step(step_with_tool("search", false));
        assert_eq!(state.trailing_tool_failures("search"), 2);
        assert_eq!(state.trailing_tool_failures("other"), 0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Failed.is_terminal());
        assert!(AgentStatus::Stopped.is_terminal());
        assert!(!AgentStatus::InProgress.is_terminal());
    }
}
