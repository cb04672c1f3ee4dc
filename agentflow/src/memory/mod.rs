//! Memory capability surface.
//!
//! Three tiers behind one [`Memory`] contract: session chat history
//! (bounded window), personal memory (semantic search over stored text,
//! optionally session-scoped), and the knowledge base (ingested documents,
//! session-independent). [`Memory::build_context`] blends all three into a
//! [`RagContext`] under a token budget.
//!
//! A workflow shares one memory across its steps by placing the handle into
//! each step context under [`SHARED_MEMORY_KEY`]; step agents prefer that
//! handle over their own configured memory.

mod in_memory;
mod rag;

pub use in_memory::InMemoryMemory;
pub use rag::{RagContext, estimate_tokens};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::config::RagConfig;
use crate::context::RunContext;
use crate::error::Result;

/// A shared, dynamically dispatched memory provider.
pub type SharedMemory = Arc<dyn Memory>;

/// Context extension key under which the workflow executor injects its
/// shared memory.
pub const SHARED_MEMORY_KEY: &str = "workflow.shared_memory";

/// Derive a context carrying `memory` as the workflow-shared memory.
#[must_use]
pub fn with_shared_memory(ctx: &RunContext, memory: SharedMemory) -> RunContext {
    ctx.with_ext(SHARED_MEMORY_KEY, Arc::new(memory))
}

/// Fetch the workflow-shared memory from a context, if injected.
#[must_use]
pub fn shared_memory(ctx: &RunContext) -> Option<SharedMemory> {
    ctx.ext::<SharedMemory>(SHARED_MEMORY_KEY)
}

/// Mint a fresh session identifier.
#[must_use]
pub fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

/// Message role in session chat history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// User turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One message in session chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Insertion time.
    pub timestamp: SystemTime,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// A stored personal-memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Stored text.
    pub content: String,
    /// Opaque metadata.
    pub metadata: HashMap<String, Value>,
    /// Caller-supplied tags.
    pub tags: Vec<String>,
    /// Storage time.
    pub timestamp: SystemTime,
    /// Provider-computed embedding, when available.
    pub embedding: Option<Vec<f32>>,
    /// Owning session, when stored under one.
    pub session_id: Option<String>,
}

/// A scored personal-memory match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHit {
    /// The matched entry.
    pub entry: MemoryEntry,
    /// Similarity score in `[0, 1]`.
    pub score: f32,
}

/// A knowledge-base document (or chunk of one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier.
    pub id: String,
    /// Title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Source attribution (URL, path, citation).
    pub source: String,
    /// Document type tag.
    pub doc_type: String,
    /// Collection/topic tags.
    pub tags: Vec<String>,
    /// Chunk position when the caller pre-chunked the document.
    pub chunk_index: usize,
    /// Total chunks for the parent document.
    pub chunk_total: usize,
    /// Opaque metadata.
    pub metadata: HashMap<String, Value>,
}

impl Document {
    /// Create a single-chunk document.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            source: source.into(),
            doc_type: "text".to_owned(),
            tags: Vec::new(),
            chunk_index: 0,
            chunk_total: 1,
            metadata: HashMap::new(),
        }
    }

    /// Attach collection tags.
    #[must_use]
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags.extend(tags);
        self
    }
}

/// A scored knowledge-base match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeHit {
    /// Matched text.
    pub content: String,
    /// Similarity score in `[0, 1]`.
    pub score: f32,
    /// Source attribution.
    pub source: String,
    /// Opaque metadata.
    pub metadata: HashMap<String, Value>,
}

/// Options for [`Memory::store`].
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Metadata persisted with the entry.
    pub metadata: HashMap<String, Value>,
    /// Tags persisted with the entry.
    pub tags: Vec<String>,
}

/// Options for [`Memory::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Maximum matches returned.
    pub limit: usize,
    /// Minimum score; lower matches are dropped.
    pub score_threshold: Option<f32>,
    /// Restrict matches to the context's session.
    pub session_scoped: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            score_threshold: None,
            session_scoped: false,
        }
    }
}

/// Options for [`Memory::search_knowledge`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum matches returned.
    pub limit: usize,
    /// Minimum score; lower matches are dropped.
    pub score_threshold: Option<f32>,
    /// Restrict matches to documents tagged with this collection.
    pub collection: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            score_threshold: None,
            collection: None,
        }
    }
}

/// Options for [`Memory::build_context`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Token budget for the assembled context.
    pub max_tokens: usize,
    /// Relative weight of personal memory.
    pub personal_weight: f64,
    /// Relative weight of knowledge hits.
    pub knowledge_weight: f64,
    /// Chat-history window size.
    pub history_limit: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::from(&RagConfig::default())
    }
}

impl From<&RagConfig> for ContextOptions {
    fn from(config: &RagConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            personal_weight: config.personal_weight,
            knowledge_weight: config.knowledge_weight,
            history_limit: config.history_limit,
        }
    }
}

/// Contract between the runtime and a memory provider.
///
/// Implementations must be safe for concurrent invocation and respect
/// context cancellation on every method.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Persist text into personal memory, stamped with the context's
    /// session (when bound) and the current time.
    async fn store(&self, ctx: &RunContext, content: &str, opts: StoreOptions) -> Result<()>;

    /// Retrieve top-K personal memories by semantic similarity.
    async fn query(
        &self,
        ctx: &RunContext,
        query: &str,
        opts: QueryOptions,
    ) -> Result<Vec<MemoryHit>>;

    /// Append a message to the context's session chat history.
    async fn add_message(&self, ctx: &RunContext, message: ChatMessage) -> Result<()>;

    /// The last `limit` messages of the context's session, oldest first.
    async fn history(&self, ctx: &RunContext, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Add a document to the knowledge base.
    async fn ingest_document(&self, ctx: &RunContext, doc: Document) -> Result<()>;

    /// Add several documents to the knowledge base.
    async fn ingest_documents(&self, ctx: &RunContext, docs: Vec<Document>) -> Result<()> {
        for doc in docs {
            self.ingest_document(ctx, doc).await?;
        }
        Ok(())
    }

    /// Top-K knowledge matches with scores and source attribution.
    async fn search_knowledge(
        &self,
        ctx: &RunContext,
        query: &str,
        opts: SearchOptions,
    ) -> Result<Vec<KnowledgeHit>>;

    /// Assemble a ready-to-inject [`RagContext`] under the token budget and
    /// personal/knowledge weights in `opts`.
    async fn build_context(
        &self,
        ctx: &RunContext,
        query: &str,
        opts: ContextOptions,
    ) -> Result<RagContext> {
        // Over-fetch so the budget trim has material to rank.
        let personal = self
            .query(
                ctx,
                query,
                QueryOptions {
                    limit: 20,
                    ..QueryOptions::default()
                },
            )
            .await?;
        let knowledge = self
            .search_knowledge(
                ctx,
                query,
                SearchOptions {
                    limit: 20,
                    ..SearchOptions::default()
                },
            )
            .await?;
        let history = self.history(ctx, opts.history_limit).await?;
        Ok(rag::assemble(personal, knowledge, history, &opts))
    }

    /// Forget everything stored under the context's session.
    async fn clear_session(&self, ctx: &RunContext) -> Result<()>;
}
