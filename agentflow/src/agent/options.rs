//! Per-call run options.
//!
//! [`RunOptions`] overlays the agent's immutable configuration for a single
//! call: a field overrides its config counterpart iff it is set.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

/// How the per-call tool restriction applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    /// All configured tools are available.
    #[default]
    Auto,
    /// Only the tools named in `RunOptions::tools` are available.
    Specific,
    /// Tools are disabled for this call.
    None,
}

/// Per-call memory overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryOverrides {
    /// Override the enabled flag.
    pub enabled: Option<bool>,
    /// Scope personal-memory queries to the call's session.
    pub session_scoped: Option<bool>,
}

/// Per-call overrides for [`Agent::run_with_options`](super::Agent::run_with_options).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Temperature override; absence means no override.
    pub temperature: Option<f32>,
    /// Max-tokens override; absence means no override.
    pub max_tokens: Option<u32>,
    /// Timeout override; absence means no override.
    pub timeout: Option<Duration>,
    /// Memory partition for this call.
    pub session_id: Option<String>,
    /// Tool restriction, interpreted per `tool_mode`.
    pub tools: Vec<String>,
    /// How `tools` applies.
    pub tool_mode: ToolMode,
    /// Memory overrides.
    pub memory: MemoryOverrides,
    /// User key/value bag carried to the handler context.
    pub vars: HashMap<String, Value>,
    /// Retry budget for the whole handler invocation.
    pub max_retries: u32,
    /// Populate the full result (metadata, memory context).
    pub detailed: bool,
    /// Attach the structured trace to the result.
    pub include_trace: bool,
    /// Attach knowledge-source attribution to result metadata.
    pub include_sources: bool,
}

impl RunOptions {
    /// Create empty options (no overrides).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the output token cap.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Override the run timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bind the call to a memory session.
    #[must_use]
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Restrict the call to the named tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.tools = tools.into_iter().collect();
        self.tool_mode = ToolMode::Specific;
        self
    }

    /// Set the tool mode directly.
    #[must_use]
    pub const fn tool_mode(mut self, mode: ToolMode) -> Self {
        self.tool_mode = mode;
        self
    }

    /// Disable tools for this call.
    #[must_use]
    pub const fn no_tools(mut self) -> Self {
        self.tool_mode = ToolMode::None;
        self
    }

    /// Apply memory overrides.
    #[must_use]
    pub const fn memory(mut self, overrides: MemoryOverrides) -> Self {
        self.memory = overrides;
        self
    }

    /// Add a context variable for the handler.
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Request a detailed result.
    #[must_use]
    pub const fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }

    /// Attach the structured trace to the result.
    #[must_use]
    pub const fn include_trace(mut self) -> Self {
        self.include_trace = true;
        self
    }

    /// Attach source attribution to result metadata.
    #[must_use]
    pub const fn include_sources(mut self) -> Self {
        self.include_sources = true;
        self
    }
}
