//! Stream chunk protocol.
//!
//! A [`StreamChunk`] is one element of an agent or workflow stream: a tagged
//! [`ChunkKind`] plus a metadata map. Tool activity and lifecycle chunks carry
//! their payload (`tool_name`, `args`, `call_id`, `step_name`, `status`) in
//! metadata; the universal map also lets the workflow merger stamp
//! `agent_name` onto chunks from merged sub-streams.
//!
//! Protocol invariants (enforced by the stream engine):
//! - every stream emits exactly one terminal chunk (`Done` or `Error`), then
//!   the channel closes;
//! - `Delta` chunks carry only incremental text, never repeated text;
//! - a `ToolResult` follows its `ToolCall` with the same `call_id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;

/// Metadata attached to a chunk.
pub type ChunkMetadata = HashMap<String, Value>;

/// The closed set of chunk payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChunkKind {
    /// Incremental text.
    Delta(String),
    /// A complete text block.
    Content(String),
    /// Model reasoning content.
    Thought(String),
    /// A tool invocation request; payload in metadata.
    ToolCall,
    /// A tool invocation outcome; payload in metadata.
    ToolResult,
    /// Out-of-band metadata.
    Metadata,
    /// Terminal failure.
    Error(AgentError),
    /// Terminal success.
    Done,
    /// A workflow step (or nested agent) began.
    AgentStart,
    /// A workflow step (or nested agent) finished.
    AgentComplete,
    /// Base64-encoded image payload.
    Image(String),
    /// Base64-encoded audio payload.
    Audio(String),
    /// Base64-encoded video payload.
    Video(String),
}

/// One element of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The tagged payload.
    #[serde(flatten)]
    pub kind: ChunkKind,
    /// Metadata map; empty for most textual chunks.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: ChunkMetadata,
}

impl StreamChunk {
    fn bare(kind: ChunkKind) -> Self {
        Self {
            kind,
            metadata: HashMap::new(),
        }
    }

    /// Incremental text chunk.
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::bare(ChunkKind::Delta(text.into()))
    }

    /// Complete text block chunk.
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self::bare(ChunkKind::Content(text.into()))
    }

    /// Reasoning chunk.
    #[must_use]
    pub fn thought(text: impl Into<String>) -> Self {
        Self::bare(ChunkKind::Thought(text.into()))
    }

    /// Tool invocation chunk with `call_id`, `tool_name`, and `args`.
    #[must_use]
    pub fn tool_call(call_id: impl Into<String>, tool_name: impl Into<String>, args: Value) -> Self {
        Self::bare(ChunkKind::ToolCall)
            .with_meta("call_id", call_id.into())
            .with_meta("tool_name", tool_name.into())
            .with_meta("args", args)
    }

    /// Tool outcome chunk matching a prior [`StreamChunk::tool_call`].
    #[must_use]
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        result: Value,
    ) -> Self {
        Self::bare(ChunkKind::ToolResult)
            .with_meta("call_id", call_id.into())
            .with_meta("tool_name", tool_name.into())
            .with_meta("result", result)
    }

    /// Metadata-only chunk.
    #[must_use]
    pub fn metadata(metadata: ChunkMetadata) -> Self {
        Self {
            kind: ChunkKind::Metadata,
            metadata,
        }
    }

    /// Terminal error chunk.
    #[must_use]
    pub fn error(error: AgentError) -> Self {
        Self::bare(ChunkKind::Error(error))
    }

    /// Terminal success chunk.
    #[must_use]
    pub fn done() -> Self {
        Self::bare(ChunkKind::Done)
    }

    /// Step-start lifecycle chunk.
    #[must_use]
    pub fn agent_start(step_name: impl Into<String>) -> Self {
        Self::bare(ChunkKind::AgentStart).with_meta("step_name", step_name.into())
    }

    /// Step-complete lifecycle chunk with a status string.
    #[must_use]
    pub fn agent_complete(step_name: impl Into<String>, status: impl Into<String>) -> Self {
        Self::bare(ChunkKind::AgentComplete)
            .with_meta("step_name", step_name.into())
            .with_meta("status", status.into())
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stamp the producing agent's name, used when merging sub-streams.
    #[must_use]
    pub fn with_agent_name(self, name: impl Into<String>) -> Self {
        self.with_meta("agent_name", name.into())
    }

    /// The `agent_name` metadata entry, if stamped.
    #[must_use]
    pub fn agent_name(&self) -> Option<&str> {
        self.metadata.get("agent_name").and_then(Value::as_str)
    }

    /// `true` for `Done` and `Error` chunks.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, ChunkKind::Done | ChunkKind::Error(_))
    }

    /// `true` for the terminal success chunk.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self.kind, ChunkKind::Done)
    }

    /// `true` for the terminal error chunk.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.kind, ChunkKind::Error(_))
    }

    /// `true` for chunks that carry text (`Delta`, `Content`, `Thought`).
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(
            self.kind,
            ChunkKind::Delta(_) | ChunkKind::Content(_) | ChunkKind::Thought(_)
        )
    }

    /// The incremental text, for `Delta` chunks.
    #[must_use]
    pub fn as_delta(&self) -> Option<&str> {
        match &self.kind {
            ChunkKind::Delta(text) => Some(text),
            _ => None,
        }
    }

    /// The error payload, for `Error` chunks.
    #[must_use]
    pub fn as_error(&self) -> Option<&AgentError> {
        match &self.kind {
            ChunkKind::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Output text carried by this chunk: `Delta` and `Content` payloads.
    ///
    /// `Thought` text is intentionally excluded; it is not part of the
    /// aggregated output.
    #[must_use]
    pub fn output_text(&self) -> Option<&str> {
        match &self.kind {
            ChunkKind::Delta(text) | ChunkKind::Content(text) => Some(text),
            _ => None,
        }
    }
}
