//! # Agentry Runtime
//!
//! The execution engine for agentry agents: the loop orchestrator, the
//! bundled drivers, the tool executor, and the continuation machinery.
//! Domain types and traits live in `agentry-core`; this crate supplies
//! the implementations that drive a run from seed messages to a
//! terminal state.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agentry_core::{Message, ToolRegistry};
//! use agentry_runtime::config::LoopLimits;
//! use agentry_runtime::drivers::ScriptedDriver;
//! use agentry_runtime::loop_runner::AgentLoop;
//!
//! # async fn demo() {
//! let agent = AgentLoop::new(
//!     Arc::new(ScriptedDriver::text("done")),
//!     Arc::new(ToolRegistry::new()),
//! )
//! .with_limits(LoopLimits {
//!     max_steps: 10,
//!     ..LoopLimits::default()
//! });
//!
//! let state = agent.run(vec![Message::user("hello")]).await;
//! println!("{}", state.status);
//! # }
//! ```

pub mod config;
pub mod criteria;
pub mod drivers;
pub mod error_policy;
pub mod executor;
pub mod loop_runner;
pub mod test_helpers;

pub use config::LoopLimits;
pub use criteria::{
    ContinuationCriteria, ContinuationCriterion, ExecutionTimeout, FnCriterion, StepsLimit,
    TokenBudget,
};
pub use drivers::{ReactDriver, ScriptedDriver, ScriptedStep, ToolCallingDriver};
pub use error_policy::ErrorPolicy;
pub use executor::{ToolExecutor, ToolOutcome};
pub use loop_runner::AgentLoop;
