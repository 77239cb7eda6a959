//! Interceptors: lifecycle observers and guards.
//!
//! An interceptor is invoked at defined trigger points (`BeforeStep`,
//! `AfterStep`, `BeforeToolCall`) and may observe, mutate, or abort
//! processing. The chain is an explicit ordered list of handlers; each
//! takes and returns an immutable context value, and the fold
//! short-circuits on the first abort.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::message::Message;
use crate::step::AgentStep;
use crate::tool::ToolCall;

/// An interceptor refused to let processing continue.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum InterceptorError {
    /// Abort the current trigger's processing entirely.
    #[error("hook '{hook}' aborted: {reason}")]
    Abort { hook: String, reason: String },

    /// Block a tool call before it executes. Only meaningful for the
    /// `BeforeToolCall` trigger; the call never runs and no execution
    /// record is produced.
    #[error("hook '{hook}' blocked tool call: {reason}")]
    Blocked { hook: String, reason: String },
}

impl InterceptorError {
    pub fn hook(&self) -> &str {
        match self {
            InterceptorError::Abort { hook, .. } => hook,
            InterceptorError::Blocked { hook, .. } => hook,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            InterceptorError::Abort { reason, .. } => reason,
            InterceptorError::Blocked { reason, .. } => reason,
        }
    }
}

/// Context for the `BeforeStep` trigger. Hooks may rewrite the
/// conversation the driver is about to see.
#[derive(Debug, Clone)]
pub struct BeforeStepContext {
    pub messages: Vec<Message>,
    pub step_index: usize,
}

/// Context for the `AfterStep` trigger.
#[derive(Debug, Clone)]
pub struct AfterStepContext {
    pub step: AgentStep,
    pub step_index: usize,
}

/// Context for the `BeforeToolCall` trigger. Hooks may rewrite the
/// call's arguments or block it outright.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub call: ToolCall,
    pub step_index: usize,
}

/// A lifecycle observer/guard. All handlers default to pass-through.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// A human-readable name, used in blocked/abort reports.
    fn name(&self) -> &str;

    async fn before_step(
        &self,
        ctx: BeforeStepContext,
    ) -> Result<BeforeStepContext, InterceptorError> {
        Ok(ctx)
    }

    async fn after_step(
        &self,
        ctx: AfterStepContext,
    ) -> Result<AfterStepContext, InterceptorError> {
        Ok(ctx)
    }

    async fn before_tool_call(
        &self,
        ctx: ToolCallContext,
    ) -> Result<ToolCallContext, InterceptorError> {
        Ok(ctx)
    }
}

/// An ordered interceptor list folded over a context value.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.push(interceptor);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub async fn run_before_step(
        &self,
        mut ctx: BeforeStepContext,
    ) -> Result<BeforeStepContext, InterceptorError> {
        for interceptor in &self.interceptors {
            ctx = interceptor.before_step(ctx).await?;
        }
        Ok(ctx)
    }

    pub async fn run_after_step(
        &self,
        mut ctx: AfterStepContext,
    ) -> Result<AfterStepContext, InterceptorError> {
        for interceptor in &self.interceptors {
            ctx = interceptor.after_step(ctx).await?;
        }
        Ok(ctx)
    }

    pub async fn run_before_tool_call(
        &self,
        mut ctx: ToolCallContext,
    ) -> Result<ToolCallContext, InterceptorError> {
        for interceptor in &self.interceptors {
            ctx = interceptor.before_tool_call(ctx).await?;
        }
        Ok(ctx)
    }
}
