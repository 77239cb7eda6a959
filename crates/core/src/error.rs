//! Error types for the agentry domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each collaborator
//! (driver, provider, tool, criterion) has its own error enum; the loop
//! captures all of them as data on the state rather than throwing them
//! to the caller. Only structural invariant violations (caller bugs)
//! surface as panics.

use thiserror::Error;

/// The top-level error type for all agentry operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Criterion error: {0}")]
    Criterion(#[from] CriterionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by a model provider backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Genuine faults raised by a driver while producing the next step.
///
/// A deliberate stop request is *not* a `DriverError`; it travels as
/// data through [`crate::driver::DriverInterrupt::Stop`].
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Driver failed: {0}")]
    Other(String),
}

/// Failures raised by tool lookup or invocation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

/// A continuation criterion failed to evaluate.
///
/// These never escape the loop: the evaluator converts them into a
/// forbidding decision and keeps the message in the evaluation trace.
#[derive(Debug, Clone, Error)]
#[error("Criterion '{criterion}' failed: {message}")]
pub struct CriterionError {
    pub criterion: String,
    pub message: String,
}

impl CriterionError {
    pub fn new(criterion: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            criterion: criterion.into(),
            message: message.into(),
        }
    }
}
