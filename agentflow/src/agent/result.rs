//! Agent run result types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::memory::RagContext;

/// Record of one mediated tool call made during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool_name: String,
    /// Arguments snapshot.
    pub args: Value,
    /// Whether the call succeeded.
    pub success: bool,
    /// Tool output for successful calls.
    pub output: Option<Value>,
    /// Error message for failed calls.
    pub error: Option<String>,
    /// Wall time of the call.
    pub duration: Duration,
    /// Whether the result came from the cache.
    pub cache_hit: bool,
}

/// One entry of the optional run trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Stage label (`middleware`, `handler`, `llm`, `tool`, `memory`).
    pub stage: String,
    /// Event description.
    pub message: String,
    /// Elapsed time since the run started.
    pub elapsed: Duration,
}

/// Why a loop workflow stopped iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// The continuation predicate returned false.
    ConditionFalse,
    /// The iteration cap was reached.
    MaxIterations,
    /// A step or the predicate failed.
    Error,
    /// The context was cancelled.
    Cancelled,
    /// The caller's predicate signalled convergence.
    Converged,
}

impl ExitReason {
    /// The wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConditionFalse => "condition_false",
            Self::MaxIterations => "max_iterations",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Converged => "converged",
        }
    }
}

/// Iteration accounting for loop workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationInfo {
    /// Completed iterations.
    pub total_iterations: usize,
    /// Why the loop stopped.
    pub exit_reason: ExitReason,
}

/// Result of an agent run.
///
/// `success == false` always comes with `error` set; `run` never panics on
/// handler failure and always returns one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Final textual output; may be empty when only non-text modalities
    /// were produced.
    pub content: String,
    /// Whether the run succeeded.
    pub success: bool,
    /// The failure, when `success` is false.
    pub error: Option<AgentError>,
    /// Measured wall time.
    pub duration: Duration,
    /// Total tokens consumed; zero when unknown.
    pub tokens_used: u32,
    /// Ordered tool call records.
    pub tool_calls: Vec<ToolCallRecord>,
    /// Opaque result metadata (`agent_name`, `trace_id`, ...).
    pub metadata: HashMap<String, Value>,
    /// Retrieval context assembled during the run, when memory was used.
    pub memory_context: Option<RagContext>,
    /// Structured trace, populated when `include_trace` was requested.
    pub trace: Option<Vec<TraceEvent>>,
}

impl RunResult {
    /// Successful result with the given content.
    #[must_use]
    pub fn ok(content: impl Into<String>, duration: Duration) -> Self {
        Self {
            content: content.into(),
            success: true,
            error: None,
            duration,
            tokens_used: 0,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            memory_context: None,
            trace: None,
        }
    }

    /// Failed result carrying `error`.
    #[must_use]
    pub fn failure(error: AgentError, duration: Duration) -> Self {
        Self {
            content: String::new(),
            success: false,
            error: Some(error),
            duration,
            tokens_used: 0,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            memory_context: None,
            trace: None,
        }
    }

    /// Convert into the final output, surfacing the stored error on failure.
    pub fn into_output(self) -> Result<String> {
        if self.success {
            Ok(self.content)
        } else {
            Err(self
                .error
                .unwrap_or_else(|| AgentError::internal("failed run carried no error")))
        }
    }
}
