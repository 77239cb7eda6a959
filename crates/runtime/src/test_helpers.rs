//! Shared helpers for exercising the loop without a live model.
//!
//! Test-only code; panics here are fine.

use std::sync::Arc;
use std::sync::Mutex;

use agentry_core::error::{ProviderError, ToolError};
use agentry_core::message::{Message, MessageToolCall};
use agentry_core::provider::{ModelProvider, ModelRequest, ModelResponse};
use agentry_core::tool::{Tool, ToolCall, ToolResult};
use agentry_core::usage::Usage;
use async_trait::async_trait;

/// Serves canned responses in order and remembers what it was asked.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The most recent request sent to this provider.
    pub fn last_request(&self) -> Option<ModelRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(ProviderError::Network("mock responses exhausted".into()));
        }
        Ok(responses.remove(0))
    }
}

/// A plain text assistant response.
pub fn make_text_response(text: impl Into<String>) -> ModelResponse {
    ModelResponse {
        message: Message::assistant(text),
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
    }
}

/// An assistant response carrying tool call requests.
pub fn make_tool_call_response(
    tool_calls: Vec<MessageToolCall>,
    content: impl Into<String>,
) -> ModelResponse {
    ModelResponse {
        message: Message::assistant_with_tool_calls(content, tool_calls),
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

/// Echoes its `text` argument back.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input text"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }
    async fn invoke(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Ok(ToolResult {
            call_id: String::new(),
            output: arguments["text"].as_str().unwrap_or("").to_string(),
            data: None,
        })
    }
}

/// Fails every invocation with the configured message.
pub struct FailingTool {
    name: String,
    message: String,
}

impl FailingTool {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn invoke(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: self.message.clone(),
        })
    }
}

/// Drain whatever events are currently buffered on a receiver.
pub fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<Arc<agentry_core::event::ExecutionEvent>>,
) -> Vec<agentry_core::event::ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event.as_ref().clone());
    }
    events
}
