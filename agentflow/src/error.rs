//! Error types for the agentflow engine.
//!
//! Every error produced by the core carries a [`ErrorCode`] from a closed
//! taxonomy, a human-readable message, an optional cause chain, and a
//! `details` map that always includes a `suggestion` entry so higher layers
//! can diagnose failures without parsing messages.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Closed set of error codes, grouped by component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid configuration value (range or consistency violation).
    ConfigInvalid,
    /// Configuration input rejected (unknown keys, malformed shape).
    ConfigValidation,

    /// No LLM client is configured for the agent.
    LlmNotConfigured,
    /// The LLM call failed. Retryable only for 5xx-class failures.
    LlmCallFailed,
    /// The LLM call exceeded its deadline.
    LlmTimeout,
    /// The provider rate-limited the call.
    LlmRateLimited,
    /// Authentication with the provider failed.
    LlmAuth,
    /// The provider account quota is exhausted.
    LlmQuotaExceeded,

    /// No tool with the requested name is registered.
    ToolNotFound,
    /// Tool execution failed (includes circuit-open short circuits).
    ToolExecute,
    /// Tool execution exceeded its deadline.
    ToolTimeout,
    /// Tool arguments did not match the parameter schema.
    ToolInvalidArgs,

    /// No memory provider is configured.
    MemoryNotConfigured,
    /// Persisting to memory failed.
    MemoryStore,
    /// Querying memory failed.
    MemoryQuery,
    /// The memory backend connection failed.
    MemoryConnection,

    /// The workflow definition is invalid.
    WorkflowInvalid,
    /// A workflow step failed; the cause carries the step error.
    WorkflowStepFailed,
    /// The workflow exceeded its deadline.
    WorkflowTimeout,
    /// The step dependency graph contains a cycle.
    WorkflowCycleDetected,

    /// An MCP server connection failed.
    McpConnection,

    /// A user-supplied handler failed.
    HandlerFailed,
    /// The operation was cancelled through its context.
    Cancelled,
    /// The operation exceeded its context deadline.
    Timeout,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::ConfigValidation => "CONFIG_VALIDATION",
            Self::LlmNotConfigured => "LLM_NOT_CONFIGURED",
            Self::LlmCallFailed => "LLM_CALL_FAILED",
            Self::LlmTimeout => "LLM_TIMEOUT",
            Self::LlmRateLimited => "LLM_RATE_LIMITED",
            Self::LlmAuth => "LLM_AUTH",
            Self::LlmQuotaExceeded => "LLM_QUOTA_EXCEEDED",
            Self::ToolNotFound => "TOOL_NOT_FOUND",
            Self::ToolExecute => "TOOL_EXECUTE",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolInvalidArgs => "TOOL_INVALID_ARGS",
            Self::MemoryNotConfigured => "MEMORY_NOT_CONFIGURED",
            Self::MemoryStore => "MEMORY_STORE",
            Self::MemoryQuery => "MEMORY_QUERY",
            Self::MemoryConnection => "MEMORY_CONNECTION",
            Self::WorkflowInvalid => "WORKFLOW_INVALID",
            Self::WorkflowStepFailed => "WORKFLOW_STEP_FAILED",
            Self::WorkflowTimeout => "WORKFLOW_TIMEOUT",
            Self::WorkflowCycleDetected => "WORKFLOW_CYCLE_DETECTED",
            Self::McpConnection => "MCP_CONNECTION",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Default suggestion attached to errors carrying this code.
    const fn suggestion(&self) -> &'static str {
        match self {
            Self::ConfigInvalid | Self::ConfigValidation => {
                "Review the agent configuration against the documented fields and ranges"
            }
            Self::LlmNotConfigured => {
                "Attach an LLM client with AgentBuilder::llm_client before running"
            }
            Self::LlmCallFailed => "Check provider status and request parameters",
            Self::LlmTimeout => "Increase the timeout or reduce max_tokens",
            Self::LlmRateLimited => "Back off and retry, or reduce request frequency",
            Self::LlmAuth => "Verify the API key reference and account permissions",
            Self::LlmQuotaExceeded => "Raise the provider quota or switch models",
            Self::ToolNotFound => "Check the tool name against ToolManager::available",
            Self::ToolExecute => "Inspect the tool_name detail and the underlying cause",
            Self::ToolTimeout => "Increase the tool timeout or simplify the call",
            Self::ToolInvalidArgs => "Compare the arguments against the tool parameter schema",
            Self::MemoryNotConfigured => "Enable memory in the agent configuration",
            Self::MemoryStore | Self::MemoryQuery | Self::MemoryConnection => {
                "Verify the memory provider connection and retry"
            }
            Self::WorkflowInvalid => "Check step names, dependencies, and mode requirements",
            Self::WorkflowStepFailed => "Inspect the step_name detail and the wrapped cause",
            Self::WorkflowTimeout => "Increase the workflow timeout or split the pipeline",
            Self::WorkflowCycleDetected => "Remove the cyclic dependency listed in the cycle detail",
            Self::McpConnection => "Verify the MCP server address and that it is running",
            Self::HandlerFailed => "Inspect the wrapped cause returned by the handler",
            Self::Cancelled => "The caller cancelled the context; no retry will help",
            Self::Timeout => "Increase the deadline on the calling context",
            Self::Internal => "This is a bug in the engine; please report it",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured error type for all core operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct AgentError {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Box<AgentError>>,
    details: HashMap<String, Value>,
}

impl AgentError {
    /// Create an error with the given code and message.
    ///
    /// The code's default suggestion is inserted into `details`.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut details = HashMap::new();
        details.insert(
            "suggestion".to_owned(),
            Value::String(code.suggestion().to_owned()),
        );
        Self {
            code,
            message: message.into(),
            cause: None,
            details,
        }
    }

    /// The error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The wrapped cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&AgentError> {
        self.cause.as_deref()
    }

    /// The details map.
    #[must_use]
    pub const fn details(&self) -> &HashMap<String, Value> {
        &self.details
    }

    /// A single detail value by key.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    /// The suggestion attached to this error.
    #[must_use]
    pub fn suggestion(&self) -> &str {
        self.details
            .get("suggestion")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// The code at the end of the cause chain.
    ///
    /// Wrappers such as `WORKFLOW_STEP_FAILED` keep the original code
    /// discoverable through this accessor.
    #[must_use]
    pub fn root_code(&self) -> ErrorCode {
        self.cause.as_ref().map_or(self.code, |c| c.root_code())
    }

    /// Attach a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: AgentError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Replace the default suggestion.
    #[must_use]
    pub fn with_suggestion(self, suggestion: impl Into<String>) -> Self {
        self.with_detail("suggestion", suggestion.into())
    }

    /// Whether a retry wrapper may re-issue the failed operation.
    ///
    /// `LLM_CALL_FAILED` is retryable only when a `status` detail is in the
    /// 5xx range or a `retryable` detail is set. `HANDLER_FAILED` defers to
    /// its cause. Unknown combinations are neither retryable nor fatal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.code {
            ErrorCode::LlmTimeout
            | ErrorCode::LlmRateLimited
            | ErrorCode::ToolTimeout
            | ErrorCode::MemoryConnection
            | ErrorCode::McpConnection => true,
            ErrorCode::LlmCallFailed => {
                let status_5xx = self
                    .detail("status")
                    .and_then(Value::as_u64)
                    .is_some_and(|s| (500..600).contains(&s));
                let flagged = self
                    .detail("retryable")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                status_5xx || flagged
            }
            ErrorCode::HandlerFailed => self.cause.as_ref().is_some_and(|c| c.is_retryable()),
            _ => false,
        }
    }

    /// Whether the failure is permanent and must short-circuit retries.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self.code {
            ErrorCode::ConfigInvalid
            | ErrorCode::ConfigValidation
            | ErrorCode::LlmAuth
            | ErrorCode::LlmQuotaExceeded
            | ErrorCode::ToolInvalidArgs
            | ErrorCode::WorkflowCycleDetected => true,
            ErrorCode::HandlerFailed => self.cause.as_ref().is_none_or(|c| !c.is_retryable()),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Constructors per component
    // ------------------------------------------------------------------

    /// Invalid configuration value.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigInvalid, message)
    }

    /// Rejected configuration input.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigValidation, message)
    }

    /// No LLM client configured.
    #[must_use]
    pub fn llm_not_configured() -> Self {
        Self::new(ErrorCode::LlmNotConfigured, "no LLM client configured")
    }

    /// LLM call failure.
    #[must_use]
    pub fn llm_call_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LlmCallFailed, message)
    }

    /// Tool lookup failure.
    #[must_use]
    pub fn tool_not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorCode::ToolNotFound, format!("tool '{name}' not found"))
            .with_detail("tool_name", name)
    }

    /// Tool execution failure.
    #[must_use]
    pub fn tool_execute(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolExecute, message).with_detail("tool_name", name.into())
    }

    /// Tool deadline exceeded.
    #[must_use]
    pub fn tool_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ToolTimeout,
            format!("tool '{name}' timed out after {timeout:?}"),
        )
        .with_detail("tool_name", name)
    }

    /// Tool argument validation failure.
    #[must_use]
    pub fn tool_invalid_args(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ToolInvalidArgs, message).with_detail("tool_name", name.into())
    }

    /// Invalid workflow definition.
    #[must_use]
    pub fn workflow_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::WorkflowInvalid, message)
    }

    /// Step failure wrapper carrying the step name and cause.
    #[must_use]
    pub fn step_failed(step_name: impl Into<String>, cause: AgentError) -> Self {
        let step_name = step_name.into();
        Self::new(
            ErrorCode::WorkflowStepFailed,
            format!("step '{step_name}' failed: {}", cause.message()),
        )
        .with_detail("step_name", step_name)
        .with_cause(cause)
    }

    /// Dependency cycle rejection, listing the offending cycle.
    #[must_use]
    pub fn cycle_detected(cycle: &[String]) -> Self {
        Self::new(
            ErrorCode::WorkflowCycleDetected,
            format!("dependency cycle: {}", cycle.join(" -> ")),
        )
        .with_detail("cycle", cycle.to_vec())
    }

    /// Handler failure wrapper.
    #[must_use]
    pub fn handler_failed(cause: AgentError) -> Self {
        Self::new(
            ErrorCode::HandlerFailed,
            format!("handler failed: {}", cause.message()),
        )
        .with_cause(cause)
    }

    /// Context cancellation.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "operation cancelled")
    }

    /// Context deadline exceeded.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Unexpected internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}
