//! The capability bundle handed to handlers.
//!
//! A handler receives `(ctx, input, caps)`; [`Capabilities`] exposes the
//! configured LLM call, the tool surface, and memory, together with a
//! read-only config snapshot. Capabilities are borrowed for the duration of
//! the handler call; the bundle is cheap to clone so combinators can fan it
//! out to concurrent handlers.
//!
//! A shared [`RunTrace`] collects token usage, tool call records, memory
//! context, and trace events as side effects of capability use; the runtime
//! folds it into the final [`RunResult`](crate::agent::RunResult).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::agent::config::AgentConfig;
use crate::agent::result::{ToolCallRecord, TraceEvent};
use crate::chunk::StreamChunk;
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::{CompletionRequest, LlmClient, TokenStream, TokenUsage};
use crate::memory::{RagContext, SharedMemory};
use crate::stream::ChunkSender;
use crate::tool::{HealthReport, ToolInfo, ToolManager, ToolMetrics, ToolResult};

/// Effective generation parameters after `RunOptions` overrides.
#[derive(Debug, Clone, Default)]
pub(crate) struct GenerationParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

#[derive(Default)]
struct TraceInner {
    usage: TokenUsage,
    tool_calls: Vec<ToolCallRecord>,
    memory_context: Option<RagContext>,
    events: Vec<TraceEvent>,
}

/// Shared collector of run side effects.
#[derive(Clone)]
pub struct RunTrace {
    started: Instant,
    inner: Arc<Mutex<TraceInner>>,
}

impl std::fmt::Debug for RunTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunTrace").finish_non_exhaustive()
    }
}

impl Default for RunTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTrace {
    /// Create a trace anchored at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            inner: Arc::new(Mutex::new(TraceInner::default())),
        }
    }

    /// Accumulate token usage.
    pub fn record_usage(&self, usage: TokenUsage) {
        self.lock().usage += usage;
    }

    /// Append a tool call record.
    pub fn record_tool_call(&self, record: ToolCallRecord) {
        self.lock().tool_calls.push(record);
    }

    /// Store the retrieval context used for this run.
    pub fn set_memory_context(&self, context: RagContext) {
        self.lock().memory_context = Some(context);
    }

    /// Merge a retrieval context into the one already collected, so stacked
    /// memory and RAG augmentations both contribute.
    pub fn merge_memory_context(&self, add: RagContext) {
        let mut inner = self.lock();
        match &mut inner.memory_context {
            Some(existing) => {
                existing.personal_memory.extend(add.personal_memory);
                existing.knowledge_base.extend(add.knowledge_base);
                existing.chat_history.extend(add.chat_history);
                existing.total_tokens += add.total_tokens;
                for source in add.source_attribution {
                    if !existing.source_attribution.contains(&source) {
                        existing.source_attribution.push(source);
                    }
                }
            }
            slot @ None => *slot = Some(add),
        }
    }

    /// Append a trace event.
    pub fn event(&self, stage: &str, message: impl Into<String>) {
        let elapsed = self.started.elapsed();
        self.lock().events.push(TraceEvent {
            stage: stage.to_owned(),
            message: message.into(),
            elapsed,
        });
    }

    /// Total token usage so far.
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        self.lock().usage
    }

    pub(crate) fn finish(
        &self,
    ) -> (TokenUsage, Vec<ToolCallRecord>, Option<RagContext>, Vec<TraceEvent>) {
        let mut inner = self.lock();
        (
            inner.usage,
            std::mem::take(&mut inner.tool_calls),
            inner.memory_context.take(),
            std::mem::take(&mut inner.events),
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TraceInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Tool surface exposed to handlers: the shared manager plus the per-run
/// tool restriction from `RunOptions`.
#[derive(Clone)]
pub struct ToolsHandle {
    manager: Arc<ToolManager>,
    allowed: Option<Arc<HashSet<String>>>,
    trace: RunTrace,
    emitter: Option<ChunkSender>,
}

impl std::fmt::Debug for ToolsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsHandle")
            .field("allowed", &self.allowed)
            .finish_non_exhaustive()
    }
}

impl ToolsHandle {
    pub(crate) fn new(
        manager: Arc<ToolManager>,
        allowed: Option<HashSet<String>>,
        trace: RunTrace,
        emitter: Option<ChunkSender>,
    ) -> Self {
        Self {
            manager,
            allowed: allowed.map(Arc::new),
            trace,
            emitter,
        }
    }

    fn permitted(&self, name: &str) -> bool {
        self.allowed.as_ref().is_none_or(|set| set.contains(name))
    }

    /// Descriptors of the tools this run may use.
    #[must_use]
    pub fn list(&self) -> Vec<ToolInfo> {
        self.manager
            .list()
            .into_iter()
            .filter(|info| self.permitted(&info.name))
            .collect()
    }

    /// Names of the tools this run may use.
    #[must_use]
    pub fn available(&self) -> Vec<String> {
        self.manager
            .available()
            .into_iter()
            .filter(|name| self.permitted(name))
            .collect()
    }

    /// Whether `name` is registered and permitted for this run.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.permitted(name) && self.manager.is_available(name)
    }

    /// Execute a tool, recording the call and emitting stream chunks when
    /// the run is streaming.
    pub async fn execute(&self, ctx: &RunContext, name: &str, args: Value) -> Result<ToolResult> {
        if !self.permitted(name) {
            return Err(AgentError::tool_not_found(name).with_detail("restricted", true));
        }

        let call_id = Uuid::new_v4().to_string();
        if let Some(emitter) = &self.emitter {
            emitter
                .send(StreamChunk::tool_call(&call_id, name, args.clone()))
                .await;
        }

        let started = Instant::now();
        let outcome = self.manager.execute(ctx, name, args.clone()).await;
        let duration = started.elapsed();

        let record = match &outcome {
            Ok(result) => ToolCallRecord {
                tool_name: name.to_owned(),
                args,
                success: true,
                output: Some(result.content.clone()),
                error: None,
                duration: result.duration,
                cache_hit: result.cache_hit,
            },
            Err(err) => ToolCallRecord {
                tool_name: name.to_owned(),
                args,
                success: false,
                output: None,
                error: Some(err.to_string()),
                duration,
                cache_hit: false,
            },
        };
        self.trace.event("tool", format!("{name}: success={}", record.success));
        self.trace.record_tool_call(record);

        if let Some(emitter) = &self.emitter {
            let payload = match &outcome {
                Ok(result) => result.content.clone(),
                Err(err) => Value::String(err.to_string()),
            };
            emitter
                .send(StreamChunk::tool_result(&call_id, name, payload))
                .await;
        }

        outcome
    }

    /// Aggregated execution metrics from the shared manager.
    #[must_use]
    pub fn metrics(&self) -> ToolMetrics {
        self.manager.metrics()
    }

    /// Provider health, from the shared manager.
    pub async fn health_check(&self, ctx: &RunContext) -> HealthReport {
        self.manager.health_check(ctx).await
    }
}

/// The bundle of capabilities available to a handler invocation.
#[derive(Clone)]
pub struct Capabilities {
    llm: Option<Arc<dyn LlmClient>>,
    params: GenerationParams,
    system_prefix: Option<Arc<str>>,
    tools: Option<ToolsHandle>,
    memory: Option<SharedMemory>,
    config: Arc<AgentConfig>,
    trace: RunTrace,
    emitter: Option<ChunkSender>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("has_llm", &self.llm.is_some())
            .field("has_tools", &self.tools.is_some())
            .field("has_memory", &self.memory.is_some())
            .field("streaming", &self.emitter.is_some())
            .finish_non_exhaustive()
    }
}

impl Capabilities {
    pub(crate) fn new(
        llm: Option<Arc<dyn LlmClient>>,
        params: GenerationParams,
        tools: Option<ToolsHandle>,
        memory: Option<SharedMemory>,
        config: Arc<AgentConfig>,
        trace: RunTrace,
        emitter: Option<ChunkSender>,
    ) -> Self {
        Self {
            llm,
            params,
            system_prefix: None,
            tools,
            memory,
            config,
            trace,
            emitter,
        }
    }

    /// Call the configured model with the effective parameters.
    ///
    /// Honors the context for cancellation and deadline; records token
    /// usage into the run trace.
    pub async fn llm(&self, ctx: &RunContext, system: &str, user: &str) -> Result<String> {
        let client = self.llm.as_ref().ok_or_else(AgentError::llm_not_configured)?;

        let mut request = CompletionRequest::new(self.full_system(system), user);
        request.temperature = self.params.temperature;
        request.max_tokens = self.params.max_tokens;
        request.model = self.params.model.clone();

        debug!(user_len = user.len(), "llm call");
        let response = ctx.wrap(client.complete(ctx, request)).await?;
        self.trace.record_usage(response.usage);
        self.trace
            .event("llm", format!("completed, {} tokens", response.usage.total()));
        Ok(response.text)
    }

    /// Streaming variant of [`Capabilities::llm`].
    pub(crate) async fn llm_stream(
        &self,
        ctx: &RunContext,
        system: &str,
        user: &str,
    ) -> Result<TokenStream> {
        let client = self.llm.as_ref().ok_or_else(AgentError::llm_not_configured)?;
        let mut request = CompletionRequest::new(self.full_system(system), user);
        request.temperature = self.params.temperature;
        request.max_tokens = self.params.max_tokens;
        request.model = self.params.model.clone();
        ctx.wrap(client.stream(ctx, request)).await
    }

    /// Whether the configured client supports token streaming.
    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.llm.as_ref().is_some_and(|c| c.supports_streaming())
    }

    /// The tool surface; `None` when tools are disabled.
    #[must_use]
    pub const fn tools(&self) -> Option<&ToolsHandle> {
        self.tools.as_ref()
    }

    /// The memory provider; `None` when memory is disabled.
    #[must_use]
    pub const fn memory(&self) -> Option<&SharedMemory> {
        self.memory.as_ref()
    }

    /// Read-only configuration snapshot.
    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The shared run trace.
    #[must_use]
    pub const fn trace(&self) -> &RunTrace {
        &self.trace
    }

    /// Push a chunk into the run's stream. No-op for non-streaming runs.
    pub async fn emit(&self, chunk: StreamChunk) {
        if let Some(emitter) = &self.emitter {
            emitter.send(chunk).await;
        }
    }

    /// Whether this run is streaming.
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.emitter.is_some()
    }

    /// Derive a bundle whose LLM calls carry an extra system-prompt prefix.
    ///
    /// Augmentations stack: a second prefix is appended after the first.
    #[must_use]
    pub fn with_system_prefix(&self, prefix: impl AsRef<str>) -> Self {
        let prefix = prefix.as_ref();
        let combined = match &self.system_prefix {
            Some(existing) => format!("{existing}\n\n{prefix}"),
            None => prefix.to_owned(),
        };
        let mut caps = self.clone();
        caps.system_prefix = Some(combined.into());
        caps
    }

    fn full_system(&self, system: &str) -> String {
        match &self.system_prefix {
            Some(prefix) if system.is_empty() => prefix.to_string(),
            Some(prefix) => format!("{prefix}\n\n{system}"),
            None => system.to_owned(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self::new(
            None,
            GenerationParams::default(),
            None,
            None,
            Arc::new(AgentConfig::default()),
            RunTrace::new(),
            None,
        )
    }

    #[cfg(test)]
    pub(crate) fn test_bundle(
        tools: Option<ToolsHandle>,
        memory: Option<SharedMemory>,
        trace: RunTrace,
    ) -> Self {
        Self::new(
            None,
            GenerationParams::default(),
            tools,
            memory,
            Arc::new(AgentConfig::default()),
            trace,
            None,
        )
    }

    #[cfg(test)]
    pub(crate) fn for_tests_with_llm(client: Arc<dyn LlmClient>) -> Self {
        Self::new(
            Some(client),
            GenerationParams::default(),
            None,
            None,
            Arc::new(AgentConfig::default()),
            RunTrace::new(),
            None,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ErrorCode;
    use crate::llm::CompletionResponse;

    struct RecordingLlm;

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(
            &self,
            _ctx: &RunContext,
            request: CompletionRequest,
        ) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                text: format!("system=[{}] user=[{}]", request.system, request.user),
                usage: TokenUsage::new(10, 5),
            })
        }
    }

    #[tokio::test]
    async fn llm_without_client_errors() {
        let caps = Capabilities::for_tests();
        let err = caps.llm(&RunContext::new(), "", "hi").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LlmNotConfigured);
    }

    #[tokio::test]
    async fn llm_records_usage() {
        let caps = Capabilities::for_tests_with_llm(Arc::new(RecordingLlm));
        let out = caps.llm(&RunContext::new(), "sys", "hi").await.unwrap();
        assert!(out.contains("user=[hi]"));
        assert_eq!(caps.trace().usage().total(), 15);
    }

    #[tokio::test]
    async fn system_prefix_prepends_and_stacks() {
        let caps = Capabilities::for_tests_with_llm(Arc::new(RecordingLlm))
            .with_system_prefix("tools available")
            .with_system_prefix("memories");
        let out = caps.llm(&RunContext::new(), "base", "q").await.unwrap();
        assert!(out.contains("system=[tools available\n\nmemories\n\nbase]"));
    }

    #[tokio::test]
    async fn prefix_without_base_system_stands_alone() {
        let caps = Capabilities::for_tests_with_llm(Arc::new(RecordingLlm))
            .with_system_prefix("prefix only");
        let out = caps.llm(&RunContext::new(), "", "q").await.unwrap();
        assert!(out.contains("system=[prefix only]"));
    }

    #[tokio::test]
    async fn cancelled_context_aborts_llm_call() {
        let caps = Capabilities::for_tests_with_llm(Arc::new(RecordingLlm));
        let ctx = RunContext::new();
        ctx.cancel();
        let err = caps.llm(&ctx, "", "hi").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn trace_collects_events_and_records() {
        let trace = RunTrace::new();
        trace.record_usage(TokenUsage::new(1, 2));
        trace.record_usage(TokenUsage::new(3, 4));
        trace.event("llm", "first call");

        let (usage, tool_calls, memory_context, events) = trace.finish();
        assert_eq!(usage.total(), 10);
        assert!(tool_calls.is_empty());
        assert!(memory_context.is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stage, "llm");
    }
}
