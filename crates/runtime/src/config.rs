//! Loop limit configuration.
//!
//! Limits feed the built-in continuation criteria. A zero value means
//! the corresponding limit is disabled.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Built-in guardrails for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopLimits {
    /// Maximum number of steps per run. 0 = unlimited.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Maximum accumulated tokens per run. 0 = unlimited.
    #[serde(default)]
    pub max_tokens: u64,

    /// Maximum accumulated execution time in seconds. Measures summed
    /// step durations, not wall time between calls. 0 = unlimited.
    #[serde(default)]
    pub timeout_secs: u64,
}

fn default_max_steps() -> u32 {
    25
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tokens: 0,
            timeout_secs: 0,
        }
    }
}

impl LoopLimits {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}
