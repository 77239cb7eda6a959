//! Execution events, the loop's observable lifecycle stream.
//!
//! The loop publishes one event per lifecycle milestone; consumers
//! subscribe to react without coupling to the loop. Per cycle, when
//! applicable, the order is: `StepStarted`, tool events per call,
//! `StepCompleted`, `ContinuationEvaluated`, and exactly one of the
//! three terminal events at the very end of a run. Formatting and
//! transport are a consumer's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::continuation::CriterionEvaluation;
use crate::stop::{StopReason, StopSignal};
use crate::usage::Usage;

/// All events emitted by the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
    /// A step is about to be produced by the driver
    StepStarted {
        step_index: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool call is about to execute
    ToolCallStarted {
        call_id: String,
        tool: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool call finished (successfully or not)
    ToolCallCompleted {
        call_id: String,
        tool: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An interceptor blocked a tool call before it ran
    ToolCallBlocked {
        call_id: String,
        tool: String,
        hook: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A step was appended to history
    StepCompleted {
        step_index: usize,
        tool_calls: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },

    /// The continuation criteria were evaluated
    ContinuationEvaluated {
        should_continue: bool,
        stop_reason: Option<StopReason>,
        evaluations: Vec<CriterionEvaluation>,
        timestamp: DateTime<Utc>,
    },

    /// Terminal: the run finished as done
    ExecutionCompleted {
        steps: usize,
        usage: Usage,
        stop_signal: Option<StopSignal>,
        timestamp: DateTime<Utc>,
    },

    /// Terminal: the run failed
    ExecutionFailed {
        steps: usize,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Terminal: the run was deliberately interrupted
    ExecutionStopped {
        steps: usize,
        reason: StopReason,
        message: String,
        source: String,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionEvent::ExecutionCompleted { .. }
                | ExecutionEvent::ExecutionFailed { .. }
                | ExecutionEvent::ExecutionStopped { .. }
        )
    }
}

/// A broadcast-based event bus.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Publishing
/// with no subscribers is fine and is silently ignored.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ExecutionEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ExecutionEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ExecutionEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
