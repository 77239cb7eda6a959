//! The agent execution loop.
//!
//! [`AgentLoop`] orchestrates one run: it asks the driver for the next
//! step, routes unresolved tool calls through the executor, runs the
//! interceptor chain at its trigger points, evaluates the continuation
//! criteria, and finalizes the state with a terminal status. The state
//! is threaded through as an immutable value; callers may drive the
//! loop one step at a time via [`AgentLoop::next_step`] or let
//! [`AgentLoop::run`] iterate to a terminal status.

use std::sync::Arc;

use agentry_core::driver::{Driver, DriverInterrupt};
use agentry_core::error::DriverError;
use agentry_core::event::{EventBus, ExecutionEvent};
use agentry_core::interceptor::{
    AfterStepContext, BeforeStepContext, Interceptor, InterceptorChain,
};
use agentry_core::message::Message;
use agentry_core::state::{AgentState, AgentStatus};
use agentry_core::step::{AgentStep, StepError};
use agentry_core::stop::{StopReason, StopSignal};
use agentry_core::tool::ToolRegistry;
use agentry_core::{ContinuationOutcome, CriterionEvaluation, Decision};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::LoopLimits;
use crate::criteria::{ContinuationCriteria, ContinuationCriterion};
use crate::error_policy::ErrorPolicy;
use crate::executor::{ToolExecutor, ToolOutcome};

/// The loop orchestrator. Construction is builder-style; a configured
/// loop is immutable and can serve many runs.
pub struct AgentLoop {
    driver: Arc<dyn Driver>,
    executor: ToolExecutor,
    interceptors: InterceptorChain,
    criteria: ContinuationCriteria,
    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    pub fn new(driver: Arc<dyn Driver>, tools: Arc<ToolRegistry>) -> Self {
        let event_bus = Arc::new(EventBus::default());
        let interceptors = InterceptorChain::new();
        Self {
            executor: ToolExecutor::new(tools, interceptors.clone(), Arc::clone(&event_bus)),
            driver,
            interceptors,
            criteria: ContinuationCriteria::default(),
            event_bus,
        }
    }

    /// Replace the event bus (e.g. to share one across loops).
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Arc::clone(&event_bus);
        self.executor = ToolExecutor::new(
            self.executor.registry_handle(),
            self.interceptors.clone(),
            event_bus,
        );
        self
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.criteria.set_limits(&limits);
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.criteria.set_error_policy(policy);
        self
    }

    /// Append a user continuation criterion. Runs after the built-in
    /// limits, in registration order.
    pub fn with_criterion(mut self, criterion: Arc<dyn ContinuationCriterion>) -> Self {
        self.criteria.push(criterion);
        self
    }

    /// Append an interceptor. Order of registration is order of
    /// execution at every trigger point.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self.executor.set_interceptors(self.interceptors.clone());
        self
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<ExecutionEvent>> {
        self.event_bus.subscribe()
    }

    /// Run to a terminal status, starting from the given seed messages.
    pub async fn run(&self, messages: Vec<Message>) -> AgentState {
        let mut state = AgentState::new(messages);
        info!(driver = self.driver.name(), "Agent run starting");
        while self.has_next_step(&state) {
            state = self.next_step(state).await;
        }
        info!(
            status = %state.status,
            steps = state.step_count(),
            tokens = state.usage.total_tokens,
            "Agent run finished"
        );
        state
    }

    /// Whether the loop may run another step from this state.
    ///
    /// Panics if the state's step and continuation histories have
    /// diverged; that is a caller bug, not a runtime condition.
    pub fn has_next_step(&self, state: &AgentState) -> bool {
        assert!(
            state.is_consistent(),
            "agent state corrupted: {} steps recorded but {} continuation outcomes",
            state.step_history.len(),
            state.continuation_history.len()
        );
        if state.status.is_terminal() {
            return false;
        }
        state
            .last_continuation()
            .map(|outcome| outcome.should_continue)
            .unwrap_or(true)
    }

    /// Execute exactly one loop iteration and return the new state.
    pub async fn next_step(&self, state: AgentState) -> AgentState {
        let step_index = state.step_count();

        // BeforeStep hooks run before any step exists; an abort here
        // fails the run without recording a step.
        let ctx = BeforeStepContext {
            messages: state.messages.clone(),
            step_index,
        };
        let ctx = match self.interceptors.run_before_step(ctx).await {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(hook = err.hook(), step = step_index, "Hook aborted before step");
                let state = state
                    .with_error(err.to_string())
                    .with_stop_reason(StopReason::ErrorForbade)
                    .with_status(AgentStatus::Failed);
                self.emit_terminal(&state);
                return state;
            }
        };

        let state = state.with_messages(ctx.messages).mark_step_started();
        self.event_bus.publish(ExecutionEvent::StepStarted {
            step_index,
            timestamp: Utc::now(),
        });
        debug!(step = step_index, driver = self.driver.name(), "Step started");

        match self
            .driver
            .run(&state, self.executor.registry(), &self.executor)
            .await
        {
            Ok(step) => self.process_step(state, step, step_index).await,
            Err(DriverInterrupt::Stop(signal)) => self.process_stop(state, signal, step_index),
            Err(DriverInterrupt::Fault(err)) => self.process_fault(state, err, step_index),
        }
    }

    /// Normal path: run unresolved tool calls, fold in hook verdicts,
    /// evaluate continuation, finalize if the run is over.
    async fn process_step(
        &self,
        state: AgentState,
        mut step: AgentStep,
        step_index: usize,
    ) -> AgentState {
        // Park the step while its tool calls resolve; with_step clears
        // the parked copy when the final version lands in history.
        let state = state.with_current_step(step.clone());

        let mut blocked: Option<(String, String)> = None;
        let unresolved: Vec<_> = step
            .unresolved_tool_calls()
            .into_iter()
            .cloned()
            .collect();
        let mut result_messages = Vec::new();
        for call in unresolved {
            match self.executor.execute(step_index, &call).await {
                ToolOutcome::Executed(execution) => {
                    if !execution.succeeded() {
                        step.errors.push(StepError::Tool {
                            tool: execution.call.name.clone(),
                            message: execution.error_message().to_string(),
                        });
                    }
                    result_messages.push(Message::tool_result(
                        execution.call.id.clone(),
                        execution.output(),
                    ));
                    step.tool_executions.push(execution);
                }
                ToolOutcome::Blocked { hook, reason } => {
                    step.errors.push(StepError::Hook {
                        hook: hook.clone(),
                        reason: reason.clone(),
                    });
                    blocked = Some((hook, reason));
                    break;
                }
            }
        }

        let mut state = state;
        for message in &step.output_messages {
            state = state.with_message(message.clone());
        }
        for message in result_messages {
            state = state.with_message(message);
        }

        let completed = step.clone();
        let state = state.with_step(step);
        self.emit_step_completed(&state, step_index);

        // A blocked call is a policy decision, always fatal; the
        // criteria are not consulted.
        if let Some((hook, reason)) = blocked {
            let outcome = ContinuationOutcome::halt(
                StopReason::ErrorForbade,
                vec![CriterionEvaluation::new(
                    "tool_call_blocked",
                    Decision::ForbidContinuation(StopReason::ErrorForbade),
                )
                .with_reason(format!("{hook}: {reason}"))],
            );
            self.emit_continuation(&outcome);
            let state = state
                .with_continuation(outcome)
                .with_stop_reason(StopReason::ErrorForbade)
                .with_error(format!("tool call blocked by hook '{hook}': {reason}"))
                .with_status(AgentStatus::Failed);
            self.emit_terminal(&state);
            return state;
        }

        // AfterStep hooks see the completed step; an abort fails the
        // run, but the step itself stays in history.
        let after = AfterStepContext {
            step: completed,
            step_index,
        };
        if let Err(err) = self.interceptors.run_after_step(after).await {
            warn!(hook = err.hook(), step = step_index, "Hook aborted after step");
            let outcome = ContinuationOutcome::halt(
                StopReason::ErrorForbade,
                vec![CriterionEvaluation::new(
                    "after_step_hook",
                    Decision::ForbidContinuation(StopReason::ErrorForbade),
                )
                .with_reason(err.to_string())],
            );
            self.emit_continuation(&outcome);
            let state = state
                .with_continuation(outcome)
                .with_stop_reason(StopReason::ErrorForbade)
                .with_error(err.to_string())
                .with_status(AgentStatus::Failed);
            self.emit_terminal(&state);
            return state;
        }

        let outcome = self.criteria.evaluate(&state);
        self.emit_continuation(&outcome);
        let should_continue = outcome.should_continue;
        let stop_reason = outcome.stop_reason.clone();
        let state = state.with_continuation(outcome);

        if should_continue {
            debug!(step = step_index, "Continuation requested");
            return state;
        }

        match stop_reason {
            Some(StopReason::ErrorForbade) => {
                let detail = state
                    .last_step()
                    .and_then(|step| step.errors.first())
                    .map(|err| err.message().to_string())
                    .unwrap_or_else(|| "continuation forbidden on error".to_string());
                let state = state
                    .with_stop_reason(StopReason::ErrorForbade)
                    .with_error(detail)
                    .with_status(AgentStatus::Failed);
                self.emit_terminal(&state);
                state
            }
            Some(StopReason::Completed) | None => {
                let state = state
                    .with_stop_reason(StopReason::Completed)
                    .with_status(AgentStatus::Completed);
                self.emit_terminal(&state);
                state
            }
            Some(reason) => {
                let state = state
                    .with_stop_reason(reason)
                    .with_status(AgentStatus::Stopped);
                self.emit_terminal(&state);
                state
            }
        }
    }

    /// Explicit stop path: synthesize a step carrying the signal, skip
    /// the criteria, and finish as the signal's reason dictates.
    fn process_stop(
        &self,
        state: AgentState,
        signal: StopSignal,
        step_index: usize,
    ) -> AgentState {
        info!(
            source = %signal.source,
            reason = %signal.reason,
            "Explicit stop requested"
        );
        let mut step = AgentStep::new(state.messages.clone());
        step.stop_signal = Some(signal.clone());
        let state = state.with_step(step);
        self.emit_step_completed(&state, step_index);

        let outcome = ContinuationOutcome::from_signal(&signal);
        self.emit_continuation(&outcome);
        let status = if signal.reason.is_success() {
            AgentStatus::Completed
        } else {
            AgentStatus::Stopped
        };
        let state = state
            .with_continuation(outcome)
            .with_stop_signal(signal)
            .with_status(status);
        self.emit_terminal(&state);
        state
    }

    /// Driver fault path: record a synthetic failed step so the fault
    /// is visible in history, then fail the run unconditionally. The
    /// criteria still run so the trace shows what they would have said.
    fn process_fault(
        &self,
        state: AgentState,
        err: DriverError,
        step_index: usize,
    ) -> AgentState {
        warn!(error = %err, step = step_index, "Driver fault");
        let mut step = AgentStep::new(state.messages.clone());
        step.errors.push(StepError::Model {
            message: err.to_string(),
        });
        let state = state.with_step(step);
        self.emit_step_completed(&state, step_index);

        let outcome = self.criteria.evaluate(&state);
        self.emit_continuation(&outcome);
        let state = state
            .with_continuation(outcome)
            .with_stop_reason(StopReason::ErrorForbade)
            .with_error(err.to_string())
            .with_status(AgentStatus::Failed);
        self.emit_terminal(&state);
        state
    }

    fn emit_step_completed(&self, state: &AgentState, step_index: usize) {
        let (tool_calls, errors) = state
            .last_step()
            .map(|step| (step.tool_calls.len(), step.errors.len()))
            .unwrap_or((0, 0));
        self.event_bus.publish(ExecutionEvent::StepCompleted {
            step_index,
            tool_calls,
            errors,
            timestamp: Utc::now(),
        });
    }

    fn emit_continuation(&self, outcome: &ContinuationOutcome) {
        self.event_bus
            .publish(ExecutionEvent::ContinuationEvaluated {
                should_continue: outcome.should_continue,
                stop_reason: outcome.stop_reason.clone(),
                evaluations: outcome.evaluations.clone(),
                timestamp: Utc::now(),
            });
    }

    /// Publish the single terminal event matching the state's status.
    fn emit_terminal(&self, state: &AgentState) {
        match state.status {
            AgentStatus::Completed => {
                self.event_bus.publish(ExecutionEvent::ExecutionCompleted {
                    steps: state.step_count(),
                    usage: state.usage,
                    stop_signal: state.stop_signal.clone(),
                    timestamp: Utc::now(),
                });
            }
            AgentStatus::Failed => {
                self.event_bus.publish(ExecutionEvent::ExecutionFailed {
                    steps: state.step_count(),
                    error: state
                        .error
                        .clone()
                        .unwrap_or_else(|| "run failed".to_string()),
                    timestamp: Utc::now(),
                });
            }
            AgentStatus::Stopped => {
                let (message, source) = state
                    .stop_signal
                    .as_ref()
                    .map(|signal| (signal.message.clone(), signal.source.clone()))
                    .unwrap_or_else(|| (String::new(), "continuation_criteria".to_string()));
                self.event_bus.publish(ExecutionEvent::ExecutionStopped {
                    steps: state.step_count(),
                    reason: state
                        .stop_reason
                        .clone()
                        .unwrap_or(StopReason::StopRequested),
                    message,
                    source,
                    timestamp: Utc::now(),
                });
            }
            AgentStatus::InProgress => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{ScriptedDriver, ScriptedStep};
    use crate::test_helpers::{make_tool_call, EchoTool};
    use agentry_core::usage::Usage;

    fn loop_with(driver: ScriptedDriver) -> AgentLoop {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        AgentLoop::new(Arc::new(driver), Arc::new(registry))
    }

    #[tokio::test]
    async fn single_text_step_completes() {
        let agent = loop_with(ScriptedDriver::text("all done"));
        let state = agent.run(vec![Message::user("go")]).await;
        assert_eq!(state.status, AgentStatus::Completed);
        assert_eq!(state.step_count(), 1);
        assert_eq!(state.stop_reason, Some(StopReason::Completed));
        assert!(state.is_consistent());
    }

    #[tokio::test]
    async fn tool_results_feed_back_into_the_conversation() {
        let driver = ScriptedDriver::steps(vec![ScriptedStep::text("checking")
            .with_tool_calls(vec![make_tool_call(
                "call_1",
                "echo",
                serde_json::json!({"text": "pong"}),
            )])
            .with_usage(Usage::new(10, 5))]);
        let agent = loop_with(driver);
        let state = agent.run(vec![Message::user("ping")]).await;

        assert_eq!(state.status, AgentStatus::Completed);
        let step = state.last_step().unwrap();
        assert_eq!(step.tool_executions.len(), 1);
        assert!(step.tool_executions[0].succeeded());
        let tool_message = state
            .messages
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("call_1"))
            .unwrap();
        assert_eq!(tool_message.content, "pong");
    }

    #[tokio::test]
    async fn driver_fault_records_failed_step() {
        let agent = loop_with(ScriptedDriver::new(vec![Err(DriverInterrupt::Fault(
            DriverError::Other("no response".into()),
        ))]));
        let state = agent.run(vec![Message::user("go")]).await;
        assert_eq!(state.status, AgentStatus::Failed);
        assert_eq!(state.step_count(), 1);
        assert!(state.last_step().unwrap().has_errors());
        assert!(state.error.as_deref().unwrap().contains("no response"));
        assert!(state.is_consistent());
    }

    #[tokio::test]
    #[should_panic(expected = "agent state corrupted")]
    async fn diverged_histories_panic() {
        let agent = loop_with(ScriptedDriver::text("x"));
        let state = AgentState::new(vec![]).with_step(AgentStep::new(vec![]));
        // one step, zero continuation outcomes
        agent.has_next_step(&state);
    }
}
