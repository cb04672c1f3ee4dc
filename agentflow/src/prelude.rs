//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and traits so you can get
//! started with a single `use` statement:
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//! ```

pub use crate::agent::{
    Agent, AgentBuilder, AgentConfig, BreakerConfig, CacheConfig, ExitReason, IterationInfo,
    LlmConfig, MemoryConfig, MemoryOverrides, Middleware, RagConfig, RunOptions, RunResult,
    StreamingConfig, SubWorkflowAgent, ToolCallRecord, ToolMode, ToolsConfig, TraceEvent,
    handler_with_llm_fallback,
};
pub use crate::augment::{
    with_llm_augmentation, with_memory_augmentation, with_rag_augmentation, with_tool_augmentation,
};
pub use crate::capabilities::{Capabilities, RunTrace, ToolsHandle};
pub use crate::chunk::{ChunkKind, ChunkMetadata, StreamChunk};
pub use crate::context::RunContext;
pub use crate::error::{AgentError, ErrorCode, Result};
pub use crate::handler::{
    Handler, chain, conditional, fallback, handler_fn, parallel, retry, with_logging, with_timeout,
};
pub use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, TokenStream, TokenUsage};
pub use crate::memory::{
    ChatMessage, ContextOptions, Document, InMemoryMemory, KnowledgeHit, Memory, MemoryEntry,
    MemoryHit, QueryOptions, RagContext, Role, SearchOptions, SharedMemory, StoreOptions,
    new_session_id,
};
pub use crate::retry::RetryPolicy;
pub use crate::stream::{AgentStream, ChunkSender, StreamHandle, StreamReader};
pub use crate::tool::{
    BoxedTool, CircuitBreaker, ProviderHealth, Tool, ToolInfo, ToolManager, ToolMetrics,
    ToolProvider, ToolResult,
};
pub use crate::workflow::{
    LoopPredicate, StepResult, StepTransform, Workflow, WorkflowBuilder, WorkflowConfig,
    WorkflowMode, WorkflowResult, WorkflowStep, WorkflowStream,
};
