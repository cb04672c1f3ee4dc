//! Tool capability surface: contracts, the manager, and its guards.
//!
//! Agents reach tools through a [`ToolManager`], which mediates every
//! execution with argument validation, a timeout, a concurrency cap, a
//! result cache, and a per-tool circuit breaker.

mod breaker;
mod cache;
mod manager;
mod metrics;
mod validate;

pub use breaker::CircuitBreaker;
pub use manager::{ToolManager, ToolManagerBuilder};
pub use metrics::{ToolMetrics, ToolStats};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::Result;

/// Descriptor of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Unique tool name within a manager.
    pub name: String,
    /// What the tool does; injected into tool-augmented prompts.
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

impl ToolInfo {
    /// Create a descriptor.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Outcome of a mediated tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution succeeded.
    pub success: bool,
    /// Tool output payload.
    pub content: Value,
    /// Error message for recorded failures.
    pub error: Option<String>,
    /// Wall time of the execution (zero on cache hits).
    pub duration: Duration,
    /// Whether the result was served from the cache.
    pub cache_hit: bool,
}

impl ToolResult {
    /// Successful result with the given payload.
    #[must_use]
    pub fn ok(content: Value, duration: Duration) -> Self {
        Self {
            success: true,
            content,
            error: None,
            duration,
            cache_hit: false,
        }
    }
}

/// A locally registered tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within a manager.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str {
        ""
    }

    /// JSON schema for the arguments object.
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Execute the tool. Must honor `ctx` cancellation.
    async fn execute(&self, ctx: &RunContext, args: Value) -> Result<Value>;
}

/// A shared, dynamically dispatched tool.
pub type BoxedTool = Arc<dyn Tool>;

/// Health report for a tool provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the provider responded successfully.
    pub healthy: bool,
    /// Probe round-trip time.
    pub response_time: Duration,
    /// Number of tools the provider exposes.
    pub tool_count: usize,
    /// Failure description for unhealthy providers.
    pub error: Option<String>,
}

/// Contract for remote tool backends (MCP servers, internal registries).
///
/// Discovery runs once at manager construction and again on explicit
/// [`ToolManager::refresh`] calls; `list`/`available` never touch the
/// network.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Provider name, used in health reports and error details.
    fn name(&self) -> &str;

    /// Enumerate the tools this provider exposes.
    async fn discover(&self, ctx: &RunContext) -> Result<Vec<ToolInfo>>;

    /// Execute a discovered tool.
    async fn execute(&self, ctx: &RunContext, name: &str, args: Value) -> Result<Value>;

    /// Probe provider health. Implementations should not panic; transport
    /// failures belong in the returned report.
    async fn health_check(&self, ctx: &RunContext) -> ProviderHealth;
}

/// Registry entry: a local tool or a provider-backed remote tool.
#[derive(Clone)]
pub(crate) enum ToolEntry {
    Local(BoxedTool),
    Remote {
        provider: Arc<dyn ToolProvider>,
        info: ToolInfo,
    },
}

impl ToolEntry {
    pub(crate) fn info(&self) -> ToolInfo {
        match self {
            Self::Local(tool) => ToolInfo::new(tool.name(), tool.description(), tool.parameters()),
            Self::Remote { info, .. } => info.clone(),
        }
    }

    pub(crate) fn parameters(&self) -> Value {
        match self {
            Self::Local(tool) => tool.parameters(),
            Self::Remote { info, .. } => info.parameters.clone(),
        }
    }

    pub(crate) async fn execute(
        &self,
        ctx: &RunContext,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        match self {
            Self::Local(tool) => tool.execute(ctx, args).await,
            Self::Remote { provider, .. } => provider.execute(ctx, name, args).await,
        }
    }
}

/// Aggregated health report keyed by provider name.
pub type HealthReport = HashMap<String, ProviderHealth>;
