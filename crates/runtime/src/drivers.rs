//! Bundled drivers.
//!
//! [`ToolCallingDriver`] is the production strategy: one model call per
//! step, tool calls left unresolved for the loop to route. [`ReactDriver`]
//! layers a reason-then-act instruction on top of it. [`ScriptedDriver`]
//! replays a fixed sequence of steps and interrupts, for tests and
//! offline replay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use agentry_core::driver::{Driver, DriverInterrupt, ToolRunner};
use agentry_core::error::DriverError;
use agentry_core::message::{Message, MessageToolCall, Role};
use agentry_core::provider::{ModelProvider, ModelRequest, ModelResponse};
use agentry_core::state::AgentState;
use agentry_core::step::AgentStep;
use agentry_core::tool::{ToolCall, ToolRegistry};
use agentry_core::usage::Usage;
use async_trait::async_trait;
use tracing::debug;

/// Build a step from a provider response over the given input view.
///
/// Tool call arguments arrive as raw JSON strings; a malformed string
/// degrades to a null argument value rather than faulting the step.
fn step_from_response(input_messages: Vec<Message>, response: ModelResponse) -> AgentStep {
    let mut step = AgentStep::new(input_messages);
    step.usage = response.usage.unwrap_or_default();
    step.tool_calls = response
        .message
        .tool_calls
        .iter()
        .map(|tc| ToolCall {
            id: tc.id.clone(),
            name: tc.name.clone(),
            arguments: serde_json::from_str(&tc.arguments).unwrap_or_default(),
        })
        .collect();
    step.output_messages.push(response.message);
    step
}

/// One model call per step; tool calls are left for the loop to run.
pub struct ToolCallingDriver {
    provider: Arc<dyn ModelProvider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ToolCallingDriver {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn request(&self, messages: Vec<Message>, tools: &ToolRegistry) -> ModelRequest {
        ModelRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools.definitions(),
        }
    }
}

#[async_trait]
impl Driver for ToolCallingDriver {
    fn name(&self) -> &str {
        "tool_calling"
    }

    async fn run(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
        _executor: &dyn ToolRunner,
    ) -> Result<AgentStep, DriverInterrupt> {
        let request = self.request(state.messages.clone(), tools);
        debug!(model = %self.model, messages = request.messages.len(), "Requesting completion");
        let response = self
            .provider
            .complete(request)
            .await
            .map_err(|e| DriverInterrupt::Fault(DriverError::Provider(e)))?;
        Ok(step_from_response(state.messages.clone(), response))
    }
}

const REACT_INSTRUCTION: &str = "Reason step by step. State your thought, then either call \
     a tool to gather information or give the final answer.";

/// Reason-then-act on top of the tool-calling strategy.
///
/// Prepends a reasoning instruction when the conversation carries no
/// system message of its own; otherwise behaves like
/// [`ToolCallingDriver`].
pub struct ReactDriver {
    inner: ToolCallingDriver,
}

impl ReactDriver {
    pub fn new(provider: Arc<dyn ModelProvider>, model: impl Into<String>) -> Self {
        Self {
            inner: ToolCallingDriver::new(provider, model),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.inner = self.inner.with_temperature(temperature);
        self
    }
}

#[async_trait]
impl Driver for ReactDriver {
    fn name(&self) -> &str {
        "react"
    }

    async fn run(
        &self,
        state: &AgentState,
        tools: &ToolRegistry,
        _executor: &dyn ToolRunner,
    ) -> Result<AgentStep, DriverInterrupt> {
        let mut messages = state.messages.clone();
        if !messages.iter().any(|m| m.role == Role::System) {
            messages.insert(0, Message::system(REACT_INSTRUCTION));
        }
        let request = self.inner.request(messages, tools);
        let response = self
            .inner
            .provider
            .complete(request)
            .await
            .map_err(|e| DriverInterrupt::Fault(DriverError::Provider(e)))?;
        Ok(step_from_response(state.messages.clone(), response))
    }
}

/// One entry in a scripted driver's playback.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl ScriptedStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Replays a fixed script of steps and interrupts.
///
/// Running past the end of the script is a fault, so a test that loops
/// more than it scripted fails loudly instead of spinning.
pub struct ScriptedDriver {
    script: Mutex<VecDeque<Result<ScriptedStep, DriverInterrupt>>>,
}

impl ScriptedDriver {
    pub fn new(script: Vec<Result<ScriptedStep, DriverInterrupt>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    /// A script of plain steps, no interrupts.
    pub fn steps(steps: Vec<ScriptedStep>) -> Self {
        Self::new(steps.into_iter().map(Ok).collect())
    }

    /// A single text-only step.
    pub fn text(content: impl Into<String>) -> Self {
        Self::steps(vec![ScriptedStep::text(content)])
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn run(
        &self,
        state: &AgentState,
        _tools: &ToolRegistry,
        _executor: &dyn ToolRunner,
    ) -> Result<AgentStep, DriverInterrupt> {
        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(_) => {
                return Err(DriverInterrupt::Fault(DriverError::Other(
                    "script lock poisoned".into(),
                )))
            }
        };
        let scripted = match next {
            Some(Ok(scripted)) => scripted,
            Some(Err(interrupt)) => return Err(interrupt),
            None => {
                return Err(DriverInterrupt::Fault(DriverError::Other(
                    "script exhausted".into(),
                )))
            }
        };

        let mut step = AgentStep::new(state.messages.clone());
        let message = if scripted.tool_calls.is_empty() {
            Message::assistant(&scripted.content)
        } else {
            let requests = scripted
                .tool_calls
                .iter()
                .map(|call| MessageToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                })
                .collect();
            Message::assistant_with_tool_calls(&scripted.content, requests)
        };
        step.output_messages.push(message);
        step.tool_calls = scripted.tool_calls;
        step.usage = scripted.usage;
        Ok(step)
    }
}
