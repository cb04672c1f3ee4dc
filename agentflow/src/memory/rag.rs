//! Retrieval-context assembly.
//!
//! [`assemble`] blends personal memories, knowledge hits, and chat history
//! into a [`RagContext`] under a token budget `T`: with personal weight `p`
//! and knowledge weight `k`, personal memory gets `floor(T·p/(p+k))` tokens
//! and knowledge the rest, each trimmed by discarding lowest-scoring entries
//! first.

use serde::{Deserialize, Serialize};

use super::{ChatMessage, ContextOptions, KnowledgeHit, MemoryHit};

/// Rough token estimate: four characters per token.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Structured retrieval output ready for prompt injection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagContext {
    /// Retrieved personal-memory snippets, best first.
    pub personal_memory: Vec<MemoryHit>,
    /// Knowledge-base hits with scores and sources, best first.
    pub knowledge_base: Vec<KnowledgeHit>,
    /// Recent session chat history, oldest first.
    pub chat_history: Vec<ChatMessage>,
    /// Estimated tokens across all included content.
    pub total_tokens: usize,
    /// Distinct knowledge sources, in ranking order.
    pub source_attribution: Vec<String>,
}

impl RagContext {
    /// `true` when nothing was retrieved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personal_memory.is_empty()
            && self.knowledge_base.is_empty()
            && self.chat_history.is_empty()
    }

    /// Render the context as prompt text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.personal_memory.is_empty() {
            out.push_str("Relevant memories:\n");
            for hit in &self.personal_memory {
                out.push_str("- ");
                out.push_str(&hit.entry.content);
                out.push('\n');
            }
        }
        if !self.knowledge_base.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("Relevant knowledge:\n");
            for hit in &self.knowledge_base {
                out.push_str("- ");
                out.push_str(&hit.content);
                if !hit.source.is_empty() {
                    out.push_str(" [source: ");
                    out.push_str(&hit.source);
                    out.push(']');
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Blend retrieval results under the budget in `opts`.
pub(crate) fn assemble(
    mut personal: Vec<MemoryHit>,
    mut knowledge: Vec<KnowledgeHit>,
    history: Vec<ChatMessage>,
    opts: &ContextOptions,
) -> RagContext {
    personal.sort_by(|a, b| b.score.total_cmp(&a.score));
    knowledge.sort_by(|a, b| b.score.total_cmp(&a.score));

    let weight_sum = opts.personal_weight + opts.knowledge_weight;
    let personal_budget = if weight_sum > 0.0 {
        (opts.max_tokens as f64 * opts.personal_weight / weight_sum).floor() as usize
    } else {
        0
    };
    let knowledge_budget = opts.max_tokens - personal_budget;

    let mut total_tokens = 0;
    let mut kept_personal = Vec::new();
    let mut used = 0;
    for hit in personal {
        let cost = estimate_tokens(&hit.entry.content);
        if used + cost > personal_budget {
            break;
        }
        used += cost;
        kept_personal.push(hit);
    }
    total_tokens += used;

    let mut kept_knowledge = Vec::new();
    let mut used = 0;
    for hit in knowledge {
        let cost = estimate_tokens(&hit.content);
        if used + cost > knowledge_budget {
            break;
        }
        used += cost;
        kept_knowledge.push(hit);
    }
    total_tokens += used;

    total_tokens += history
        .iter()
        .map(|m| estimate_tokens(&m.content))
        .sum::<usize>();

    let mut source_attribution = Vec::new();
    for hit in &kept_knowledge {
        if !hit.source.is_empty() && !source_attribution.contains(&hit.source) {
            source_attribution.push(hit.source.clone());
        }
    }

    RagContext {
        personal_memory: kept_personal,
        knowledge_base: kept_knowledge,
        chat_history: history,
        total_tokens,
        source_attribution,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::HashMap;
    use std::time::SystemTime;

    use super::*;
    use crate::memory::{MemoryEntry, Role};

    fn personal(content: &str, score: f32) -> MemoryHit {
        MemoryHit {
            entry: MemoryEntry {
                content: content.to_owned(),
                metadata: HashMap::new(),
                tags: Vec::new(),
                timestamp: SystemTime::now(),
                embedding: None,
                session_id: None,
            },
            score,
        }
    }

    fn knowledge(content: &str, score: f32, source: &str) -> KnowledgeHit {
        KnowledgeHit {
            content: content.to_owned(),
            score,
            source: source.to_owned(),
            metadata: HashMap::new(),
        }
    }

    fn opts(max_tokens: usize, p: f64, k: f64) -> ContextOptions {
        ContextOptions {
            max_tokens,
            personal_weight: p,
            knowledge_weight: k,
            history_limit: 10,
        }
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn budget_splits_by_weights() {
        // 100 tokens, weights 1:3 => personal 25, knowledge 75.
        let personal_hits = vec![personal(&"p".repeat(96), 0.9)]; // 24 tokens
        let knowledge_hits = vec![knowledge(&"k".repeat(280), 0.9, "doc")]; // 70 tokens
        let ctx = assemble(personal_hits, knowledge_hits, Vec::new(), &opts(100, 1.0, 3.0));
        assert_eq!(ctx.personal_memory.len(), 1);
        assert_eq!(ctx.knowledge_base.len(), 1);

        // A personal entry over its 25-token share is dropped entirely.
        let over = vec![personal(&"p".repeat(120), 0.9)]; // 30 tokens
        let ctx = assemble(over, Vec::new(), Vec::new(), &opts(100, 1.0, 3.0));
        assert!(ctx.personal_memory.is_empty());
    }

    #[test]
    fn lowest_scores_discarded_first() {
        let hits = vec![
            knowledge(&"a".repeat(160), 0.9, "s1"), // 40 tokens
            knowledge(&"b".repeat(160), 0.5, "s2"),
            knowledge(&"c".repeat(160), 0.7, "s3"),
        ];
        // Knowledge budget 80: only the two best fit.
        let ctx = assemble(Vec::new(), hits, Vec::new(), &opts(80, 0.0, 1.0));
        assert_eq!(ctx.knowledge_base.len(), 2);
        assert!(ctx.knowledge_base[0].score >= ctx.knowledge_base[1].score);
        assert_eq!(ctx.source_attribution, vec!["s1".to_owned(), "s3".to_owned()]);
    }

    #[test]
    fn history_tokens_counted() {
        let history = vec![ChatMessage::new(Role::User, "hello there")];
        let ctx = assemble(Vec::new(), Vec::new(), history, &opts(100, 1.0, 1.0));
        assert_eq!(ctx.total_tokens, estimate_tokens("hello there"));
        assert_eq!(ctx.chat_history.len(), 1);
    }

    #[test]
    fn render_includes_sources() {
        let ctx = assemble(
            vec![personal("likes rust", 0.9)],
            vec![knowledge("rust is fast", 0.8, "intro.md")],
            Vec::new(),
            &opts(1000, 1.0, 1.0),
        );
        let text = ctx.render();
        assert!(text.contains("Relevant memories:"));
        assert!(text.contains("likes rust"));
        assert!(text.contains("[source: intro.md]"));
    }

    #[test]
    fn empty_context() {
        let ctx = assemble(Vec::new(), Vec::new(), Vec::new(), &opts(100, 1.0, 1.0));
        assert!(ctx.is_empty());
        assert_eq!(ctx.total_tokens, 0);
        assert!(ctx.render().is_empty());
    }
}
