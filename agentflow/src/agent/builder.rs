//! Agent builder.

use std::sync::Arc;

use crate::error::Result;
use crate::handler::Handler;
use crate::llm::LlmClient;
use crate::memory::{InMemoryMemory, SharedMemory};
use crate::tool::{BoxedTool, ToolManager, ToolProvider};

use super::config::{AgentConfig, LlmConfig, MemoryConfig, StreamingConfig, ToolsConfig};
use super::middleware::Middleware;
use super::Agent;

/// Builder for [`Agent`].
///
/// # Example
///
/// ```rust,ignore
/// let agent = Agent::builder()
///     .name("researcher")
///     .system_prompt("You find sources.")
///     .llm_client(client)
///     .tool(Arc::new(SearchTool))
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct AgentBuilder {
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tool_manager: Option<Arc<ToolManager>>,
    local_tools: Vec<BoxedTool>,
    providers: Vec<Arc<dyn ToolProvider>>,
    memory: Option<SharedMemory>,
    handler: Option<Handler>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("name", &self.config.name)
            .field("has_llm", &self.llm.is_some())
            .field("tools", &self.local_tools.len())
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the agent name (required, non-empty).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the system prompt.
    #[must_use]
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Replace the whole configuration snapshot.
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the LLM parameter block.
    #[must_use]
    pub fn llm_config(mut self, llm: LlmConfig) -> Self {
        self.config.llm = llm;
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.config.llm.temperature = temperature;
        self
    }

    /// Set the output token cap.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config.llm.max_tokens = max_tokens;
        self
    }

    /// Set the model tag.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = model.into();
        self
    }

    /// Set the per-run timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Enable verbose diagnostics.
    #[must_use]
    pub const fn debug_mode(mut self, debug: bool) -> Self {
        self.config.debug_mode = debug;
        self
    }

    /// Set streaming parameters.
    #[must_use]
    pub fn streaming(mut self, streaming: StreamingConfig) -> Self {
        self.config.streaming = streaming;
        self
    }

    /// Set memory configuration.
    #[must_use]
    pub fn memory_config(mut self, memory: MemoryConfig) -> Self {
        self.config.memory = Some(memory);
        self
    }

    /// Set tool configuration.
    #[must_use]
    pub fn tools_config(mut self, tools: ToolsConfig) -> Self {
        self.config.tools = Some(tools);
        self
    }

    /// Attach the LLM client.
    #[must_use]
    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(client);
        self
    }

    /// Register a local tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedTool) -> Self {
        self.local_tools.push(tool);
        self
    }

    /// Register several local tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = BoxedTool>) -> Self {
        self.local_tools.extend(tools);
        self
    }

    /// Register a tool provider; its tools are discovered at build time.
    #[must_use]
    pub fn tool_provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Share an existing tool manager instead of building one.
    #[must_use]
    pub fn tool_manager(mut self, manager: Arc<ToolManager>) -> Self {
        self.tool_manager = Some(manager);
        self
    }

    /// Attach a memory provider.
    #[must_use]
    pub fn memory(mut self, memory: SharedMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Supply the agent logic. Without one, the default handler performs a
    /// single LLM call with the configured system prompt.
    #[must_use]
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Append a middleware. `before_run` hooks apply in registration order.
    #[must_use]
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Build the agent, validating the configuration and running tool
    /// discovery for registered providers.
    pub async fn build(mut self) -> Result<Agent> {
        let has_tools =
            self.tool_manager.is_some() || !self.local_tools.is_empty() || !self.providers.is_empty();
        if has_tools && self.config.tools.is_none() {
            self.config.tools = Some(ToolsConfig::default());
        }
        self.config.validate()?;

        let tools = match self.tool_manager {
            Some(manager) => Some(manager),
            None if has_tools => {
                let tools_config = self.config.tools.clone().unwrap_or_default();
                let mut builder = ToolManager::builder()
                    .config(tools_config)
                    .tools(self.local_tools);
                for provider in self.providers {
                    builder = builder.provider(provider);
                }
                Some(Arc::new(
                    builder.build(&crate::context::RunContext::new()).await?,
                ))
            }
            None => None,
        };

        // Absent memory config means enabled with the default provider.
        let memory = if self.config.memory_enabled() {
            self.memory
                .or_else(|| Some(Arc::new(InMemoryMemory::new()) as SharedMemory))
        } else {
            None
        };

        Ok(Agent {
            config: Arc::new(self.config),
            llm: self.llm,
            tools,
            memory,
            handler: self.handler,
            middleware: Arc::new(self.middleware),
        })
    }
}
