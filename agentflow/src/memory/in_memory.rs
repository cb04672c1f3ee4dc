//! In-memory reference memory provider.
//!
//! [`InMemoryMemory`] keeps all three tiers in `tokio::sync::RwLock`ed
//! collections. Similarity is lexical token overlap (Jaccard), which is
//! enough for tests and short-lived agents: identical content scores 1.0.
//! Data is lost when the value is dropped.

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ChatMessage, Document, KnowledgeHit, Memory, MemoryEntry, MemoryHit, QueryOptions,
    SearchOptions, StoreOptions,
};
use crate::context::RunContext;
use crate::error::Result;

/// Ephemeral memory provider backed by in-process collections.
#[derive(Debug, Default)]
pub struct InMemoryMemory {
    entries: RwLock<Vec<MemoryEntry>>,
    documents: RwLock<Vec<Document>>,
    history: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryMemory {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(ctx: &RunContext) -> String {
        ctx.session_id().unwrap_or_default().to_owned()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Jaccard similarity over lowercase word sets.
fn similarity(query: &HashSet<String>, text: &str) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let other = tokenize(text);
    if other.is_empty() {
        return 0.0;
    }
    let intersection = query.intersection(&other).count();
    if intersection == 0 {
        return 0.0;
    }
    let union = query.union(&other).count();
    intersection as f32 / union as f32
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn store(&self, ctx: &RunContext, content: &str, opts: StoreOptions) -> Result<()> {
        ctx.check()?;
        self.entries.write().await.push(MemoryEntry {
            content: content.to_owned(),
            metadata: opts.metadata,
            tags: opts.tags,
            timestamp: SystemTime::now(),
            embedding: None,
            session_id: ctx.session_id().map(str::to_owned),
        });
        Ok(())
    }

    async fn query(
        &self,
        ctx: &RunContext,
        query: &str,
        opts: QueryOptions,
    ) -> Result<Vec<MemoryHit>> {
        ctx.check()?;
        let query_tokens = tokenize(query);
        let session = ctx.session_id();
        let entries = self.entries.read().await;

        let mut hits: Vec<MemoryHit> = entries
            .iter()
            .filter(|entry| {
                !opts.session_scoped || entry.session_id.as_deref() == session
            })
            .filter_map(|entry| {
                let score = similarity(&query_tokens, &entry.content);
                (score > 0.0 && opts.score_threshold.is_none_or(|t| score >= t)).then(|| {
                    MemoryHit {
                        entry: entry.clone(),
                        score,
                    }
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn add_message(&self, ctx: &RunContext, message: ChatMessage) -> Result<()> {
        ctx.check()?;
        self.history
            .write()
            .await
            .entry(Self::session_key(ctx))
            .or_default()
            .push(message);
        Ok(())
    }

    async fn history(&self, ctx: &RunContext, limit: usize) -> Result<Vec<ChatMessage>> {
        ctx.check()?;
        let history = self.history.read().await;
        let messages = history
            .get(&Self::session_key(ctx))
            .map(Vec::as_slice)
            .unwrap_or_default();
        let start = messages.len().saturating_sub(limit);
        Ok(messages[start..].to_vec())
    }

    async fn ingest_document(&self, ctx: &RunContext, doc: Document) -> Result<()> {
        ctx.check()?;
        self.documents.write().await.push(doc);
        Ok(())
    }

    async fn search_knowledge(
        &self,
        ctx: &RunContext,
        query: &str,
        opts: SearchOptions,
    ) -> Result<Vec<KnowledgeHit>> {
        ctx.check()?;
        let query_tokens = tokenize(query);
        let documents = self.documents.read().await;

        let mut hits: Vec<KnowledgeHit> = documents
            .iter()
            .filter(|doc| {
                opts.collection
                    .as_ref()
                    .is_none_or(|c| doc.tags.contains(c))
            })
            .filter_map(|doc| {
                let score = similarity(&query_tokens, &doc.content)
                    .max(similarity(&query_tokens, &doc.title));
                (score > 0.0 && opts.score_threshold.is_none_or(|t| score >= t)).then(|| {
                    KnowledgeHit {
                        content: doc.content.clone(),
                        score,
                        source: doc.source.clone(),
                        metadata: doc.metadata.clone(),
                    }
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn clear_session(&self, ctx: &RunContext) -> Result<()> {
        ctx.check()?;
        let session = ctx.session_id().map(str::to_owned);
        self.entries
            .write()
            .await
            .retain(|entry| entry.session_id != session);
        self.history.write().await.remove(&Self::session_key(ctx));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::memory::{ContextOptions, Role};

    mod personal {
        use super::*;

        #[tokio::test]
        async fn store_then_query_roundtrip() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new().with_session("s-1");
            memory
                .store(&ctx, "the user prefers dark roast coffee", StoreOptions::default())
                .await
                .unwrap();

            let hits = memory
                .query(
                    &ctx,
                    "the user prefers dark roast coffee",
                    QueryOptions::default(),
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].entry.content, "the user prefers dark roast coffee");
            assert!((hits[0].score - 1.0).abs() < f32::EPSILON);
        }

        #[tokio::test]
        async fn session_scoped_query_filters_other_sessions() {
            let memory = InMemoryMemory::new();
            let a = RunContext::new().with_session("a");
            let b = RunContext::new().with_session("b");
            memory
                .store(&a, "alpha fact", StoreOptions::default())
                .await
                .unwrap();
            memory
                .store(&b, "alpha fact too", StoreOptions::default())
                .await
                .unwrap();

            let scoped = memory
                .query(
                    &a,
                    "alpha fact",
                    QueryOptions {
                        session_scoped: true,
                        ..QueryOptions::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(scoped.len(), 1);
            assert_eq!(scoped[0].entry.session_id.as_deref(), Some("a"));

            let global = memory
                .query(&a, "alpha fact", QueryOptions::default())
                .await
                .unwrap();
            assert_eq!(global.len(), 2);
        }

        #[tokio::test]
        async fn threshold_and_limit_apply() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new();
            for i in 0..10 {
                memory
                    .store(&ctx, &format!("note number {i}"), StoreOptions::default())
                    .await
                    .unwrap();
            }

            let hits = memory
                .query(
                    &ctx,
                    "note number",
                    QueryOptions {
                        limit: 3,
                        ..QueryOptions::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 3);

            let none = memory
                .query(
                    &ctx,
                    "note",
                    QueryOptions {
                        score_threshold: Some(0.99),
                        ..QueryOptions::default()
                    },
                )
                .await
                .unwrap();
            assert!(none.is_empty());
        }

        #[tokio::test]
        async fn unrelated_queries_miss() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new();
            memory
                .store(&ctx, "completely different topic", StoreOptions::default())
                .await
                .unwrap();
            let hits = memory
                .query(&ctx, "quantum chromodynamics", QueryOptions::default())
                .await
                .unwrap();
            assert!(hits.is_empty());
        }
    }

    mod chat {
        use super::*;

        #[tokio::test]
        async fn history_window_returns_last_n() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new().with_session("s");
            for i in 0..15 {
                memory
                    .add_message(&ctx, ChatMessage::new(Role::User, format!("m{i}")))
                    .await
                    .unwrap();
            }

            let window = memory.history(&ctx, 10).await.unwrap();
            assert_eq!(window.len(), 10);
            assert_eq!(window[0].content, "m5");
            assert_eq!(window[9].content, "m14");
        }

        #[tokio::test]
        async fn sessions_are_isolated() {
            let memory = InMemoryMemory::new();
            let a = RunContext::new().with_session("a");
            let b = RunContext::new().with_session("b");
            memory
                .add_message(&a, ChatMessage::new(Role::User, "hi"))
                .await
                .unwrap();

            assert_eq!(memory.history(&a, 10).await.unwrap().len(), 1);
            assert!(memory.history(&b, 10).await.unwrap().is_empty());
        }
    }

    mod knowledge {
        use super::*;

        #[tokio::test]
        async fn ingest_then_search_returns_document() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new();
            memory
                .ingest_document(
                    &ctx,
                    Document::new("d1", "Rust intro", "rust has fearless concurrency", "intro.md"),
                )
                .await
                .unwrap();

            let hits = memory
                .search_knowledge(&ctx, "fearless concurrency", SearchOptions::default())
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].source, "intro.md");
            assert!(hits[0].score > 0.0);
        }

        #[tokio::test]
        async fn collection_filter_applies() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new();
            memory
                .ingest_documents(
                    &ctx,
                    vec![
                        Document::new("d1", "A", "shared words here", "a.md")
                            .with_tags(["docs".to_owned()]),
                        Document::new("d2", "B", "shared words here", "b.md")
                            .with_tags(["blog".to_owned()]),
                    ],
                )
                .await
                .unwrap();

            let hits = memory
                .search_knowledge(
                    &ctx,
                    "shared words",
                    SearchOptions {
                        collection: Some("docs".to_owned()),
                        ..SearchOptions::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].source, "a.md");
        }
    }

    mod context_assembly {
        use super::*;

        #[tokio::test]
        async fn build_context_blends_all_tiers() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new().with_session("s");
            memory
                .store(&ctx, "user likes espresso drinks", StoreOptions::default())
                .await
                .unwrap();
            memory
                .ingest_document(
                    &ctx,
                    Document::new("d1", "Coffee", "espresso drinks are concentrated", "coffee.md"),
                )
                .await
                .unwrap();
            memory
                .add_message(&ctx, ChatMessage::new(Role::User, "what about espresso?"))
                .await
                .unwrap();

            let rag = memory
                .build_context(&ctx, "espresso drinks", ContextOptions::default())
                .await
                .unwrap();
            assert_eq!(rag.personal_memory.len(), 1);
            assert_eq!(rag.knowledge_base.len(), 1);
            assert_eq!(rag.chat_history.len(), 1);
            assert_eq!(rag.source_attribution, vec!["coffee.md".to_owned()]);
            assert!(rag.total_tokens > 0);
        }
    }

    mod sessions {
        use super::*;

        #[tokio::test]
        async fn clear_session_forgets_only_that_session() {
            let memory = InMemoryMemory::new();
            let a = RunContext::new().with_session("a");
            let b = RunContext::new().with_session("b");
            memory.store(&a, "fact alpha", StoreOptions::default()).await.unwrap();
            memory.store(&b, "fact beta", StoreOptions::default()).await.unwrap();
            memory
                .add_message(&a, ChatMessage::new(Role::User, "hi"))
                .await
                .unwrap();

            memory.clear_session(&a).await.unwrap();

            assert!(memory
                .query(&a, "fact alpha", QueryOptions::default())
                .await
                .unwrap()
                .is_empty());
            assert!(memory.history(&a, 10).await.unwrap().is_empty());
            assert_eq!(
                memory
                    .query(&b, "fact beta", QueryOptions::default())
                    .await
                    .unwrap()
                    .len(),
                1
            );
        }

        #[tokio::test]
        async fn cancelled_context_rejected() {
            let memory = InMemoryMemory::new();
            let ctx = RunContext::new();
            ctx.cancel();
            let err = memory
                .store(&ctx, "x", StoreOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code().as_str(), "CANCELLED");
        }
    }
}
