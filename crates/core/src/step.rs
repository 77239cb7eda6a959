//! Step and tool-execution records.
//!
//! An [`AgentStep`] is one completed loop iteration: the message view
//! the driver consumed and produced, the tool calls it requested, the
//! executions that ran them, and any failures captured along the way.
//! Steps are created by a driver (or synthesized by the loop when the
//! driver faults) and appended exactly once to the state's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::message::Message;
use crate::stop::StopSignal;
use crate::tool::{ToolCall, ToolResult};
use crate::usage::Usage;

/// A failure captured on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepError {
    /// A model-level failure (driver fault, malformed output).
    Model { message: String },
    /// A tool execution failed.
    Tool { tool: String, message: String },
    /// An interceptor aborted or blocked processing.
    Hook { hook: String, reason: String },
}

impl StepError {
    pub fn is_tool_error(&self) -> bool {
        matches!(self, StepError::Tool { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::Model { message } => message,
            StepError::Tool { message, .. } => message,
            StepError::Hook { reason, .. } => reason,
        }
    }
}

/// The record of one tool invocation's outcome.
///
/// Created only when a call is actually run. A blocked call never
/// produces a `ToolExecution`; it surfaces as a distinct blocked signal
/// from the executor instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    /// The call that was run
    pub call: ToolCall,

    /// Success value or failure detail
    pub result: Result<ToolResult, String>,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl ToolExecution {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// Empty string on success, the failure's message otherwise.
    pub fn error_message(&self) -> &str {
        match &self.result {
            Ok(_) => "",
            Err(message) => message,
        }
    }

    /// The output fed back to the model: result output on success,
    /// the error message on failure.
    pub fn output(&self) -> &str {
        match &self.result {
            Ok(result) => &result.output,
            Err(message) => message,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at).to_std().unwrap_or_default()
    }
}

/// One completed iteration of the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    /// Unique step ID
    pub id: String,

    /// The conversation view the driver consumed
    pub input_messages: Vec<Message>,

    /// The messages the driver produced
    pub output_messages: Vec<Message>,

    /// Tool calls requested by this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Results of running each requested call, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_executions: Vec<ToolExecution>,

    /// Failures attached to this step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StepError>,

    /// Tokens spent by this step
    #[serde(default)]
    pub usage: Usage,

    /// Stop signal attached when this step terminated the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<StopSignal>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl AgentStep {
    /// Create a step over the given input view.
    pub fn new(input_messages: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_messages,
            output_messages: Vec::new(),
            tool_calls: Vec::new(),
            tool_executions: Vec::new(),
            errors: Vec::new(),
            usage: Usage::default(),
            stop_signal: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Stamp the end timestamp if not already set.
    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Tool calls requested but not yet matched by an execution.
    pub fn unresolved_tool_calls(&self) -> Vec<&ToolCall> {
        self.tool_calls
            .iter()
            .filter(|call| !self.tool_executions.iter().any(|e| e.call.id == call.id))
            .collect()
    }

    pub fn has_unresolved_tool_calls(&self) -> bool {
        !self.unresolved_tool_calls().is_empty()
    }

    /// Names of tools whose executions failed in this step.
    pub fn failed_tools(&self) -> Vec<&str> {
        self.tool_executions
            .iter()
            .filter(|e| !e.succeeded())
            .map(|e| e.call.name.as_str())
            .collect()
    }

    /// Whether an execution of the named tool failed in this step.
    pub fn tool_failed(&self, tool: &str) -> bool {
        self.tool_executions
            .iter()
            .any(|e| e.call.name == tool && !e.succeeded())
    }

    /// Step duration; zero until the step is finished.
    pub fn duration(&self) -> Duration {
        self.ended_at
            .map(|end| (end - self.started_at).to_std().unwrap_or_default())
            .unwrap_or_default()
    }
}
