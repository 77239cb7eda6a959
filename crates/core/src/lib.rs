//! # Agentry Core
//!
//! Domain types, traits, and error definitions for the agentry
//! execution loop. This crate defines the model that the runtime crate
//! implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the loop consumes (driver, tool, interceptor,
//! model provider) is defined as a trait here; implementations live in
//! dependent crates or with the consumer. State is immutable: every
//! mutator returns a new value, so concurrent sessions never share
//! state by reference. Classifiable failures travel as data through
//! state and events; only programmer errors surface as hard faults.

pub mod continuation;
pub mod driver;
pub mod error;
pub mod event;
pub mod interceptor;
pub mod message;
pub mod provider;
pub mod state;
pub mod step;
pub mod stop;
pub mod tool;
pub mod usage;

// Re-export key types at crate root for ergonomics
pub use continuation::{ContinuationOutcome, CriterionEvaluation, Decision};
pub use driver::{Driver, DriverInterrupt, ToolOutcome, ToolRunner};
pub use error::{CriterionError, DriverError, Error, ProviderError, Result, ToolError};
pub use event::{EventBus, ExecutionEvent};
pub use interceptor::{
    AfterStepContext, BeforeStepContext, Interceptor, InterceptorChain, InterceptorError,
    ToolCallContext,
};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{ModelProvider, ModelRequest, ModelResponse};
pub use state::{AgentState, AgentStatus};
pub use step::{AgentStep, StepError, ToolExecution};
pub use stop::{StopReason, StopSignal};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolRegistry, ToolResult};
pub use usage::Usage;
