//! Agent runtime.
//!
//! An [`Agent`] is a configured runtime unit that executes an LLM-centered
//! [`Handler`]. `run` resolves the effective configuration (config overlaid
//! by [`RunOptions`]), applies middleware, derives a context with the
//! effective deadline, invokes the handler with its [`Capabilities`], and
//! assembles a [`RunResult`]. `run_stream` does the same on a worker task,
//! pushing chunks through the stream engine with exactly one terminal chunk.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = Agent::builder()
//!     .name("assistant")
//!     .system_prompt("You are terse.")
//!     .llm_client(client)
//!     .build()
//!     .await?;
//!
//! let result = agent.run(&RunContext::new(), "hello").await;
//! ```

mod builder;
pub(crate) mod config;
mod middleware;
mod options;
pub(crate) mod result;
mod sub_workflow;

pub use builder::AgentBuilder;
pub use config::{
    AgentConfig, BreakerConfig, CacheConfig, EvictionPolicy, LlmConfig, MemoryConfig, RagConfig,
    StreamingConfig, ToolsConfig, WorkflowSection,
};
pub use middleware::Middleware;
pub use options::{MemoryOverrides, RunOptions, ToolMode};
pub use result::{ExitReason, IterationInfo, RunResult, ToolCallRecord, TraceEvent};
pub use sub_workflow::SubWorkflowAgent;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::capabilities::{Capabilities, GenerationParams, RunTrace, ToolsHandle};
use crate::chunk::StreamChunk;
use crate::context::RunContext;
use crate::handler::{Handler, handler_fn, retry};
use crate::llm::LlmClient;
use crate::memory::SharedMemory;
use crate::stream::{AgentStream, ChunkSender, StreamHandle};
use crate::tool::ToolManager;

/// A configured runtime unit executing an LLM-centered handler.
#[derive(Clone)]
pub struct Agent {
    pub(crate) config: Arc<AgentConfig>,
    pub(crate) llm: Option<Arc<dyn LlmClient>>,
    pub(crate) tools: Option<Arc<ToolManager>>,
    pub(crate) memory: Option<SharedMemory>,
    pub(crate) handler: Option<Handler>,
    pub(crate) middleware: Arc<Vec<Arc<dyn Middleware>>>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.config.name)
            .field("has_llm", &self.llm.is_some())
            .field("has_tools", &self.tools.is_some())
            .field("has_memory", &self.memory.is_some())
            .field("custom_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    /// The agent's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// A snapshot of the immutable configuration. Mutating the returned
    /// value has no effect on subsequent runs.
    #[must_use]
    pub fn config(&self) -> AgentConfig {
        (*self.config).clone()
    }

    /// Run the agent. Never panics on handler failure: a failed run returns
    /// a [`RunResult`] with `success == false` and the error attached.
    pub async fn run(&self, ctx: &RunContext, input: impl Into<String>) -> RunResult {
        self.run_with_options(ctx, input, RunOptions::default())
            .await
    }

    /// Run with per-call overrides.
    #[instrument(skip_all, fields(agent = %self.config.name))]
    pub async fn run_with_options(
        &self,
        ctx: &RunContext,
        input: impl Into<String>,
        options: RunOptions,
    ) -> RunResult {
        self.run_inner(ctx, input.into(), &options, None).await
    }

    /// Run in streaming mode.
    ///
    /// Ownership of the returned stream transfers to the caller, who must
    /// either drain it to the terminal chunk or cancel it.
    #[must_use]
    pub fn run_stream(&self, ctx: &RunContext, input: impl Into<String>) -> AgentStream {
        self.run_stream_with_options(ctx, input, RunOptions::default())
    }

    /// Streaming run with per-call overrides.
    #[must_use]
    pub fn run_stream_with_options(
        &self,
        ctx: &RunContext,
        input: impl Into<String>,
        options: RunOptions,
    ) -> AgentStream {
        let (sender, rx) = ChunkSender::channel(&self.config.streaming);
        let stream_ctx = ctx.child();
        let cancel = stream_ctx.cancellation().clone();
        let (result_tx, result_rx) = oneshot::channel();

        let metadata: HashMap<String, Value> = HashMap::from([
            ("agent_name".to_owned(), Value::String(self.config.name.clone())),
            ("trace_id".to_owned(), Value::String(stream_ctx.trace_id().to_owned())),
        ]);

        let agent = self.clone();
        let input = input.into();
        tokio::spawn(async move {
            let result = agent
                .run_inner(&stream_ctx, input, &options, Some(sender.clone()))
                .await;

            // A handler that emitted no output text gets its final content
            // surfaced as a single Content chunk.
            if result.success && sender.emitted_output() == 0 && !result.content.is_empty() {
                sender.send(StreamChunk::content(result.content.clone())).await;
            }
            sender.finish(result.error.clone()).await;
            let _ = result_tx.send(result);
        });

        StreamHandle::new(rx, cancel, result_rx, metadata)
    }

    /// Shared core of the blocking and streaming paths.
    pub(crate) async fn run_inner(
        &self,
        ctx: &RunContext,
        input: String,
        options: &RunOptions,
        emitter: Option<ChunkSender>,
    ) -> RunResult {
        let started = Instant::now();
        let trace = RunTrace::new();

        // Timeout precedence: options > config > inherited deadline (the
        // derivation clamps to the parent's deadline when it is sooner).
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let mut run_ctx = ctx.with_timeout(timeout);
        if let Some(session) = &options.session_id {
            run_ctx = run_ctx.with_session(session.clone());
        }
        if !options.vars.is_empty() {
            run_ctx = run_ctx.with_vars(options.vars.clone().into_iter());
        }

        // BeforeRun middleware, left to right.
        let mut current_input = input;
        for mw in self.middleware.iter() {
            match mw.before_run(&run_ctx, current_input).await {
                Ok(transformed) => current_input = transformed,
                Err(err) => {
                    warn!(code = err.code().as_str(), "before_run middleware failed");
                    return self.assemble(
                        Err(err),
                        started,
                        &run_ctx,
                        &trace,
                        options,
                    );
                }
            }
        }
        trace.event("middleware", "before_run complete");

        let caps = self.capabilities(&run_ctx, options, &trace, emitter);

        let base = self.handler.clone().unwrap_or_else(Self::default_handler);
        let handler = if options.max_retries > 0 {
            retry(base, options.max_retries + 1)
        } else {
            base
        };

        debug!(input_len = current_input.len(), "invoking handler");
        let outcome = run_ctx
            .wrap(handler(run_ctx.clone(), current_input, caps))
            .await;

        let mut result = self.assemble(outcome, started, &run_ctx, &trace, options);

        // AfterRun middleware, right to left; errors are returned verbatim.
        for mw in self.middleware.iter().rev() {
            match mw.after_run(&run_ctx, result).await {
                Ok(transformed) => result = transformed,
                Err(err) => {
                    warn!(code = err.code().as_str(), "after_run middleware failed");
                    result = RunResult::failure(err, started.elapsed());
                    break;
                }
            }
        }
        result
    }

    fn capabilities(
        &self,
        run_ctx: &RunContext,
        options: &RunOptions,
        trace: &RunTrace,
        emitter: Option<ChunkSender>,
    ) -> Capabilities {
        let params = GenerationParams {
            temperature: Some(options.temperature.unwrap_or(self.config.llm.temperature)),
            max_tokens: Some(options.max_tokens.unwrap_or(self.config.llm.max_tokens)),
            model: (!self.config.llm.model.is_empty()).then(|| self.config.llm.model.clone()),
        };

        let tools_enabled = self.config.tools_enabled() && options.tool_mode != ToolMode::None;
        let tools = match (&self.tools, tools_enabled) {
            (Some(manager), true) => {
                let allowed: Option<HashSet<String>> = match options.tool_mode {
                    ToolMode::Specific => Some(options.tools.iter().cloned().collect()),
                    ToolMode::Auto | ToolMode::None => None,
                };
                Some(ToolsHandle::new(
                    Arc::clone(manager),
                    allowed,
                    trace.clone(),
                    emitter.clone(),
                ))
            }
            _ => None,
        };

        // Workflow-shared memory in the context overrides the agent's own.
        let memory_enabled = options
            .memory
            .enabled
            .unwrap_or_else(|| self.config.memory_enabled());
        let memory = if memory_enabled {
            crate::memory::shared_memory(run_ctx).or_else(|| self.memory.clone())
        } else {
            None
        };

        Capabilities::new(
            self.llm.clone(),
            params,
            tools,
            memory,
            Arc::clone(&self.config),
            trace.clone(),
            emitter,
        )
    }

    fn assemble(
        &self,
        outcome: crate::error::Result<String>,
        started: Instant,
        run_ctx: &RunContext,
        trace: &RunTrace,
        options: &RunOptions,
    ) -> RunResult {
        let duration = started.elapsed();
        let (usage, tool_calls, memory_context, events) = trace.finish();

        let mut result = match outcome {
            Ok(content) => RunResult::ok(content, duration),
            Err(err) => RunResult::failure(err, duration),
        };
        result.tokens_used = usage.total();
        result.tool_calls = tool_calls;
        result.memory_context = memory_context;
        if options.include_trace {
            result.trace = Some(events);
        }

        result
            .metadata
            .insert("agent_name".to_owned(), Value::String(self.config.name.clone()));
        result
            .metadata
            .insert("trace_id".to_owned(), Value::String(run_ctx.trace_id().to_owned()));
        if options.detailed {
            if let Some(session) = run_ctx.session_id() {
                result
                    .metadata
                    .insert("session_id".to_owned(), Value::String(session.to_owned()));
            }
            if !self.config.llm.model.is_empty() {
                result
                    .metadata
                    .insert("model".to_owned(), Value::String(self.config.llm.model.clone()));
            }
        }
        if options.include_sources
            && let Some(context) = &result.memory_context
            && !context.source_attribution.is_empty()
        {
            result.metadata.insert(
                "sources".to_owned(),
                Value::Array(
                    context
                        .source_attribution
                        .iter()
                        .cloned()
                        .map(Value::String)
                        .collect(),
                ),
            );
        }
        result
    }

    /// The default handler: a single LLM call with the configured system
    /// prompt. In streaming mode it forwards provider token deltas when the
    /// client supports streaming, degrading to a post-hoc content chunk
    /// otherwise.
    pub(crate) fn default_handler() -> Handler {
        handler_fn(|ctx, input, caps| async move {
            let system = caps.config().system_prompt.clone();
            if caps.is_streaming() && caps.supports_streaming() {
                let mut tokens = caps.llm_stream(&ctx, &system, &input).await?;
                let mut aggregated = String::new();
                loop {
                    let next = tokio::select! {
                        item = tokens.next() => item,
                        err = ctx.done() => return Err(err),
                    };
                    match next {
                        Some(Ok(token)) => {
                            caps.emit(StreamChunk::delta(&token)).await;
                            aggregated.push_str(&token);
                        }
                        Some(Err(err)) => return Err(err),
                        None => break,
                    }
                }
                Ok(aggregated)
            } else {
                caps.llm(&ctx, &system, &input).await
            }
        })
    }
}

/// Adapter preserved from the legacy handler shape: a handler that falls
/// back to the default LLM call when `f` declines the input by returning
/// `None`.
pub fn handler_with_llm_fallback<F, Fut>(f: F) -> Handler
where
    F: Fn(RunContext, String, Capabilities) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = crate::error::Result<Option<String>>> + Send + 'static,
{
    let f = Arc::new(f);
    let fallback = Agent::default_handler();
    handler_fn(move |ctx, input, caps| {
        let f = Arc::clone(&f);
        let fallback = Arc::clone(&fallback);
        async move {
            match f(ctx.clone(), input.clone(), caps.clone()).await? {
                Some(output) => Ok(output),
                None => fallback(ctx, input, caps).await,
            }
        }
    })
}
