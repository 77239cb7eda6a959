//! End-to-end loop scenarios over scripted drivers.

use std::sync::Arc;

use agentry_core::driver::{Driver, DriverInterrupt, ToolOutcome, ToolRunner};
use agentry_core::interceptor::{Interceptor, InterceptorError, ToolCallContext};
use agentry_core::message::Message;
use agentry_core::state::{AgentState, AgentStatus};
use agentry_core::step::{AgentStep, StepError};
use agentry_core::stop::{StopReason, StopSignal};
use agentry_core::tool::ToolRegistry;
use agentry_core::usage::Usage;
use agentry_core::{Decision, ExecutionEvent};
use agentry_runtime::config::LoopLimits;
use agentry_runtime::drivers::{ScriptedDriver, ScriptedStep};
use agentry_runtime::error_policy::ErrorPolicy;
use agentry_runtime::loop_runner::AgentLoop;
use agentry_runtime::test_helpers::{drain_events, make_tool_call, EchoTool, FailingTool};
use agentry_runtime::FnCriterion;
use async_trait::async_trait;

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    registry.register(Arc::new(FailingTool::new("flaky", "connection refused")));
    Arc::new(registry)
}

fn failing_step(index: usize) -> ScriptedStep {
    ScriptedStep::text("trying")
        .with_tool_calls(vec![make_tool_call(
            &format!("call_{index}"),
            "flaky",
            serde_json::json!({}),
        )])
        .with_usage(Usage::new(10, 5))
}

#[tokio::test]
async fn default_policy_fails_on_first_tool_error() {
    init_tracing();
    let driver = ScriptedDriver::steps(vec![failing_step(0)]);
    let agent = AgentLoop::new(Arc::new(driver), registry());
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Failed);
    assert_eq!(state.step_count(), 1);
    assert_eq!(state.stop_reason, Some(StopReason::ErrorForbade));
    assert!(state.error.as_deref().unwrap().contains("connection refused"));
    // tokens spent by the failed step still count
    assert_eq!(state.usage.total_tokens, 15);
}

#[tokio::test]
async fn retry_policy_tolerates_bounded_consecutive_failures() {
    let driver = ScriptedDriver::steps(vec![
        failing_step(0),
        failing_step(1),
        ScriptedStep::text("recovered").with_usage(Usage::new(10, 5)),
    ]);
    let agent = AgentLoop::new(Arc::new(driver), registry())
        .with_error_policy(ErrorPolicy::retry_tool_errors(3));
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Completed);
    assert_eq!(state.step_count(), 3);
    assert_eq!(state.usage.total_tokens, 45);
}

#[tokio::test]
async fn retry_policy_gives_up_past_the_consecutive_budget() {
    let driver = ScriptedDriver::steps(vec![
        failing_step(0),
        failing_step(1),
        failing_step(2),
        failing_step(3),
    ]);
    let agent = AgentLoop::new(Arc::new(driver), registry())
        .with_error_policy(ErrorPolicy::retry_tool_errors(3));
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Failed);
    assert_eq!(state.step_count(), 4);
    assert_eq!(state.stop_reason, Some(StopReason::ErrorForbade));
    assert!(state.is_consistent());
}

#[tokio::test]
async fn steps_limit_stops_after_exactly_the_configured_count() {
    let driver = ScriptedDriver::steps(vec![
        ScriptedStep::text("one"),
        ScriptedStep::text("two"),
        ScriptedStep::text("three"),
    ]);
    let agent = AgentLoop::new(Arc::new(driver), registry())
        .with_limits(LoopLimits {
            max_steps: 3,
            ..LoopLimits::default()
        })
        .with_criterion(Arc::new(FnCriterion::new("keep_going", |_| {
            Decision::RequestContinuation
        })));
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Stopped);
    assert_eq!(state.step_count(), 3);
    assert_eq!(state.stop_reason, Some(StopReason::StepsLimitReached));

    let stopped: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ExecutionEvent::ExecutionStopped { .. }))
        .collect();
    assert_eq!(stopped.len(), 1);
    match &stopped[0] {
        ExecutionEvent::ExecutionStopped { reason, source, .. } => {
            assert_eq!(*reason, StopReason::StepsLimitReached);
            assert_eq!(source, "continuation_criteria");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn token_budget_stops_once_accumulated_usage_crosses_it() {
    let driver = ScriptedDriver::steps(vec![
        ScriptedStep::text("one").with_usage(Usage::new(40, 10)),
        ScriptedStep::text("two").with_usage(Usage::new(40, 10)),
        ScriptedStep::text("three").with_usage(Usage::new(40, 10)),
    ]);
    let agent = AgentLoop::new(Arc::new(driver), registry())
        .with_limits(LoopLimits {
            max_tokens: 100,
            ..LoopLimits::default()
        })
        .with_criterion(Arc::new(FnCriterion::new("keep_going", |_| {
            Decision::RequestContinuation
        })));
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Stopped);
    assert_eq!(state.step_count(), 2);
    assert_eq!(state.stop_reason, Some(StopReason::TokenBudgetExceeded));
    assert_eq!(state.usage.total_tokens, 100);
}

#[tokio::test]
async fn explicit_stop_completes_with_signal_details() {
    let driver = ScriptedDriver::new(vec![Err(DriverInterrupt::Stop(StopSignal::completed(
        "stop now", "X",
    )))]);
    let agent = AgentLoop::new(Arc::new(driver), registry());
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Completed);
    assert_eq!(state.step_count(), 1);
    assert_eq!(state.stop_reason, Some(StopReason::Completed));
    let signal = state.stop_signal.as_ref().unwrap();
    assert_eq!(signal.source, "X");
    assert_eq!(signal.message, "stop now");
    assert_eq!(
        state.last_step().unwrap().stop_signal.as_ref().unwrap().source,
        "X"
    );

    let completed: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, ExecutionEvent::ExecutionCompleted { .. }))
        .collect();
    assert_eq!(completed.len(), 1);
    match &completed[0] {
        ExecutionEvent::ExecutionCompleted { stop_signal, .. } => {
            let signal = stop_signal.as_ref().unwrap();
            assert_eq!(signal.source, "X");
            assert_eq!(signal.message, "stop now");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn non_success_stop_signal_interrupts_the_run() {
    let driver = ScriptedDriver::new(vec![Err(DriverInterrupt::Stop(StopSignal::requested(
        "operator interrupt",
        "watchdog",
    )))]);
    let agent = AgentLoop::new(Arc::new(driver), registry());
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Stopped);
    assert_eq!(state.stop_reason, Some(StopReason::StopRequested));
    assert!(state.is_consistent());
}

struct ShellBlocker;

#[async_trait]
impl Interceptor for ShellBlocker {
    fn name(&self) -> &str {
        "shell_blocker"
    }

    async fn before_tool_call(
        &self,
        ctx: ToolCallContext,
    ) -> Result<ToolCallContext, InterceptorError> {
        if ctx.call.name == "flaky" {
            return Err(InterceptorError::Blocked {
                hook: "shell_blocker".into(),
                reason: "tool is on the deny list".into(),
            });
        }
        Ok(ctx)
    }
}

#[tokio::test]
async fn blocked_tool_call_fails_the_run_without_an_execution() {
    let driver = ScriptedDriver::steps(vec![failing_step(0)]);
    let agent = AgentLoop::new(Arc::new(driver), registry())
        .with_interceptor(Arc::new(ShellBlocker));
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Failed);
    assert_eq!(state.step_count(), 1);
    let step = state.last_step().unwrap();
    assert!(step.tool_executions.is_empty());
    assert!(state.error.as_deref().unwrap().contains("shell_blocker"));

    let all = drain_events(&mut events);
    let blocked = all
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ToolCallBlocked { .. }))
        .count();
    let started = all
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ToolCallStarted { .. }))
        .count();
    assert_eq!(blocked, 1);
    assert_eq!(started, 0);
}

/// Resolves its own tool call through the executor handle instead of
/// leaving it for the loop.
struct SelfResolvingDriver;

#[async_trait]
impl Driver for SelfResolvingDriver {
    fn name(&self) -> &str {
        "self_resolving"
    }

    async fn run(
        &self,
        state: &AgentState,
        _tools: &ToolRegistry,
        executor: &dyn ToolRunner,
    ) -> Result<AgentStep, DriverInterrupt> {
        let call = make_tool_call("call_1", "echo", serde_json::json!({"text": "direct"}));
        let mut step = AgentStep::new(state.messages.clone());
        match executor.run_call(state.step_count(), &call).await {
            ToolOutcome::Executed(execution) => {
                step.tool_calls.push(call);
                step.tool_executions.push(execution);
            }
            ToolOutcome::Blocked { hook, reason } => {
                // already answered; nothing left for the loop to route
                step.errors.push(StepError::Hook { hook, reason });
            }
        }
        step.output_messages.push(Message::assistant("resolved inline"));
        Ok(step)
    }
}

#[tokio::test]
async fn driver_resolved_calls_flow_through_the_executor() {
    let agent = AgentLoop::new(Arc::new(SelfResolvingDriver), registry());
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Completed);
    let step = state.last_step().unwrap();
    assert_eq!(step.tool_executions.len(), 1);
    assert!(step.tool_executions[0].succeeded());
    assert!(!step.has_unresolved_tool_calls());

    // the call still passed the interceptor gate and emitted the tool
    // lifecycle events, exactly once
    let all = drain_events(&mut events);
    let started = all
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ToolCallStarted { .. }))
        .count();
    let completed = all
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ToolCallCompleted { .. }))
        .count();
    assert_eq!(started, 1);
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn driver_resolved_calls_respect_the_interceptor_gate() {
    struct EchoBlocker;

    #[async_trait]
    impl Interceptor for EchoBlocker {
        fn name(&self) -> &str {
            "echo_blocker"
        }

        async fn before_tool_call(
            &self,
            _ctx: ToolCallContext,
        ) -> Result<ToolCallContext, InterceptorError> {
            Err(InterceptorError::Blocked {
                hook: "echo_blocker".into(),
                reason: "no direct echo".into(),
            })
        }
    }

    let agent = AgentLoop::new(Arc::new(SelfResolvingDriver), registry())
        .with_interceptor(Arc::new(EchoBlocker));
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;

    assert_eq!(state.status, AgentStatus::Failed);
    let step = state.last_step().unwrap();
    assert!(step.tool_executions.is_empty());

    let all = drain_events(&mut events);
    let blocked = all
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::ToolCallBlocked { .. }))
        .count();
    assert_eq!(blocked, 1);
}

#[tokio::test]
async fn event_stream_follows_lifecycle_order() {
    let driver = ScriptedDriver::steps(vec![ScriptedStep::text("checking").with_tool_calls(
        vec![make_tool_call("call_1", "echo", serde_json::json!({"text": "hi"}))],
    )]);
    let agent = AgentLoop::new(Arc::new(driver), registry());
    let mut events = agent.subscribe();
    let state = agent.run(vec![Message::user("go")]).await;
    assert_eq!(state.status, AgentStatus::Completed);

    let kinds: Vec<&'static str> = drain_events(&mut events)
        .iter()
        .map(|e| match e {
            ExecutionEvent::StepStarted { .. } => "step_started",
            ExecutionEvent::ToolCallStarted { .. } => "tool_started",
            ExecutionEvent::ToolCallCompleted { .. } => "tool_completed",
            ExecutionEvent::ToolCallBlocked { .. } => "tool_blocked",
            ExecutionEvent::StepCompleted { .. } => "step_completed",
            ExecutionEvent::ContinuationEvaluated { .. } => "continuation",
            ExecutionEvent::ExecutionCompleted { .. } => "completed",
            ExecutionEvent::ExecutionFailed { .. } => "failed",
            ExecutionEvent::ExecutionStopped { .. } => "stopped",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "step_started",
            "tool_started",
            "tool_completed",
            "step_completed",
            "continuation",
            "completed",
        ]
    );
}

#[tokio::test]
async fn identical_scripts_produce_identical_outcomes() {
    let script = || {
        ScriptedDriver::steps(vec![
            ScriptedStep::text("one").with_usage(Usage::new(10, 5)),
            failing_step(1),
            ScriptedStep::text("done").with_usage(Usage::new(10, 5)),
        ])
    };
    let build = || {
        AgentLoop::new(Arc::new(script()), registry())
            .with_error_policy(ErrorPolicy::retry_tool_errors(2))
            .with_criterion(Arc::new(FnCriterion::new("two_steps_min", |state| {
                if state.step_count() < 2 {
                    Decision::RequestContinuation
                } else {
                    Decision::AllowStop
                }
            })))
    };

    let first = build().run(vec![Message::user("go")]).await;
    let second = build().run(vec![Message::user("go")]).await;

    assert_eq!(first.status, second.status);
    assert_eq!(first.step_count(), second.step_count());
    assert_eq!(first.stop_reason, second.stop_reason);
    assert_eq!(first.usage, second.usage);
    assert_eq!(
        first.continuation_history.len(),
        second.continuation_history.len()
    );
}
