//! Tool executor.
//!
//! Resolves a requested call against the registry, gates it through the
//! interceptor chain, runs it, and reports the outcome as data. Tool
//! failures never propagate as errors; a blocked call produces no
//! execution record at all.

use std::sync::Arc;

use agentry_core::driver::ToolRunner;
use agentry_core::event::{EventBus, ExecutionEvent};
use agentry_core::interceptor::{InterceptorChain, ToolCallContext};
use agentry_core::step::ToolExecution;
use agentry_core::tool::{ToolCall, ToolRegistry};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

pub use agentry_core::driver::ToolOutcome;

/// Runs tool calls on behalf of the loop.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    interceptors: InterceptorChain,
    event_bus: Arc<EventBus>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        interceptors: InterceptorChain,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            interceptors,
            event_bus,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub(crate) fn registry_handle(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    pub(crate) fn set_interceptors(&mut self, interceptors: InterceptorChain) {
        self.interceptors = interceptors;
    }

    /// Execute one call. Interceptors run first and may rewrite the
    /// call's arguments; any refusal blocks it.
    pub async fn execute(&self, step_index: usize, call: &ToolCall) -> ToolOutcome {
        let ctx = ToolCallContext {
            call: call.clone(),
            step_index,
        };
        let call = match self.interceptors.run_before_tool_call(ctx).await {
            Ok(ctx) => ctx.call,
            Err(err) => {
                warn!(
                    tool = %call.name,
                    hook = err.hook(),
                    reason = err.reason(),
                    "Tool call blocked"
                );
                self.event_bus.publish(ExecutionEvent::ToolCallBlocked {
                    call_id: call.id.clone(),
                    tool: call.name.clone(),
                    hook: err.hook().to_string(),
                    reason: err.reason().to_string(),
                    timestamp: Utc::now(),
                });
                return ToolOutcome::Blocked {
                    hook: err.hook().to_string(),
                    reason: err.reason().to_string(),
                };
            }
        };

        self.event_bus.publish(ExecutionEvent::ToolCallStarted {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            timestamp: Utc::now(),
        });

        let started_at = Utc::now();
        let clock = std::time::Instant::now();
        let result = match self.registry.resolve(&call.name) {
            Ok(tool) => match tool.invoke(call.arguments.clone()).await {
                Ok(mut result) => {
                    result.call_id = call.id.clone();
                    Ok(result)
                }
                Err(err) => Err(err.to_string()),
            },
            Err(err) => Err(err.to_string()),
        };
        let ended_at = Utc::now();
        let duration_ms = clock.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => debug!(tool = %call.name, duration_ms, "Tool call completed"),
            Err(err) => warn!(tool = %call.name, error = %err, "Tool call failed"),
        }
        self.event_bus.publish(ExecutionEvent::ToolCallCompleted {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            success: result.is_ok(),
            duration_ms,
            timestamp: Utc::now(),
        });

        ToolOutcome::Executed(ToolExecution {
            call,
            result,
            started_at,
            ended_at,
        })
    }
}

#[async_trait]
impl ToolRunner for ToolExecutor {
    async fn run_call(&self, step_index: usize, call: &ToolCall) -> ToolOutcome {
        self.execute(step_index, call).await
    }
}
