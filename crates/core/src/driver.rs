//! Driver trait: the pluggable strategy producing the next step.
//!
//! A driver takes the current state, the available tools, and a handle
//! to the loop's tool executor, and returns the next [`AgentStep`], or
//! interrupts the run. The two interrupt channels are deliberately
//! separate: an explicit stop is control-flow data the loop handles as a
//! normal termination, while a fault is a genuine error the loop records
//! as a failed step.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::DriverError;
use crate::state::AgentState;
use crate::step::{AgentStep, ToolExecution};
use crate::stop::StopSignal;
use crate::tool::{ToolCall, ToolRegistry};

/// Why a driver did not return a step.
#[derive(Debug, Clone, Error)]
pub enum DriverInterrupt {
    /// A deliberate, non-erroneous termination request.
    #[error("stop requested by {}: {}", .0.source, .0.message)]
    Stop(StopSignal),

    /// A genuine driver failure.
    #[error(transparent)]
    Fault(#[from] DriverError),
}

/// What became of one requested tool call.
#[derive(Debug)]
pub enum ToolOutcome {
    /// The call ran; success or failure is recorded on the execution.
    Executed(ToolExecution),

    /// An interceptor refused the call before it ran.
    Blocked { hook: String, reason: String },
}

/// The loop's tool-running handle, as seen by a driver.
///
/// Every call routed through this handle passes the interceptor gate
/// and emits the tool lifecycle events. A driver must never invoke a
/// tool behind it.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run_call(&self, step_index: usize, call: &ToolCall) -> ToolOutcome;
}

/// The driver contract consumed by the loop.
///
/// A driver may resolve tool calls itself through the executor handle,
/// or leave them unresolved on the returned step; the loop routes any
/// unresolved calls through the same executor.
#[async_trait]
pub trait Driver: Send + Sync {
    /// A human-readable name for this driver.
    fn name(&self) -> &str;

    /// Produce the next step from the current state.
    async fn run(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
        executor: &dyn ToolRunner,
    ) -> Result<AgentStep, DriverInterrupt>;
}
