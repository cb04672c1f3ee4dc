//! Capability-aware handler augmentations.
//!
//! These wrappers enrich a handler with tool, memory, RAG, and LLM-retry
//! behavior. Each degrades to the bare handler when the corresponding
//! capability is absent, so augmented handlers stay usable on minimally
//! configured agents.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::handler::{Handler, handler_fn};
use crate::memory::{
    ChatMessage, QueryOptions, RagContext, Role, SearchOptions, StoreOptions, estimate_tokens,
};
use crate::retry::RetryPolicy;

/// Maximum tool-call rounds per handler invocation.
const TOOL_CALL_BUDGET: usize = 8;

/// Number of personal memories injected by the memory augmentation.
const MEMORY_TOP_K: usize = 5;

/// Wrap `handler` with a tool-use loop.
///
/// Tool descriptions are prefixed onto the system prompt; when the handler's
/// output is a JSON envelope `{"tool": <name>, "args": {...}}` (optionally
/// fenced), the tool is executed and its observation re-injected, until the
/// handler returns a plain final answer or the call budget is exhausted.
#[must_use]
pub fn with_tool_augmentation(handler: Handler) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        async move {
            let Some(tools) = caps.tools().cloned() else {
                return handler(ctx, input, caps).await;
            };

            let infos = tools.list();
            if infos.is_empty() {
                return handler(ctx, input, caps).await;
            }

            let mut prefix = String::from(
                "You can call tools. To call one, reply with exactly this JSON and nothing else:\n\
                 {\"tool\": \"<name>\", \"args\": {...}}\n\
                 Otherwise reply with the final answer.\n\nAvailable tools:\n",
            );
            for info in &infos {
                prefix.push_str(&format!(
                    "- {}: {} (parameters: {})\n",
                    info.name, info.description, info.parameters
                ));
            }
            let caps = caps.with_system_prefix(&prefix);
            let retries = caps.config().tools.as_ref().map_or(0, |t| t.max_retries);
            let policy = RetryPolicy::with_max_attempts(retries + 1);

            let mut transcript = input;
            for round in 0..TOOL_CALL_BUDGET {
                let output = handler(ctx.clone(), transcript.clone(), caps.clone()).await?;
                let Some((name, args)) = parse_tool_request(&output) else {
                    return Ok(output);
                };

                debug!(tool = %name, round, "handler requested tool call");
                let observation = match policy
                    .run(&ctx, |_| tools.execute(&ctx, &name, args.clone()))
                    .await
                {
                    Ok(result) => result.content.to_string(),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => format!("tool '{name}' failed: {err}"),
                };
                transcript = format!(
                    "{transcript}\n\nObservation from tool '{name}': {observation}\n\
                     Reply with the final answer, or another tool call."
                );
            }

            warn!("tool-call budget exhausted, returning last transcript answer");
            handler(ctx, transcript, caps).await
        }
    })
}

/// Parse a tool-request envelope out of a handler output.
fn parse_tool_request(output: &str) -> Option<(String, Value)> {
    let trimmed = output.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;
    let name = obj.get("tool")?.as_str()?.to_owned();
    let args = obj.get("args").cloned().unwrap_or_else(|| Value::Object(Default::default()));
    Some((name, args))
}

/// Wrap `handler` with personal-memory awareness.
///
/// Before the call, the top-K matching memories are injected into the
/// system prompt; after a successful call, the user/assistant exchange is
/// stored. Memory failures degrade gracefully: the handler still runs.
#[must_use]
pub fn with_memory_augmentation(handler: Handler) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        async move {
            let Some(memory) = caps.memory().cloned() else {
                return handler(ctx, input, caps).await;
            };

            let opts = QueryOptions {
                limit: MEMORY_TOP_K,
                ..QueryOptions::default()
            };
            let caps = match memory.query(&ctx, &input, opts).await {
                Ok(hits) if !hits.is_empty() => {
                    let total_tokens = hits
                        .iter()
                        .map(|h| estimate_tokens(&h.entry.content))
                        .sum();
                    let context = RagContext {
                        personal_memory: hits,
                        total_tokens,
                        ..RagContext::default()
                    };
                    let rendered = context.render();
                    caps.trace().merge_memory_context(context);
                    caps.with_system_prefix(rendered)
                }
                Ok(_) => caps,
                Err(err) => {
                    warn!(code = err.code().as_str(), "memory query failed, continuing without");
                    caps
                }
            };

            let output = handler(ctx.clone(), input.clone(), caps).await?;

            let exchange = format!("User: {input}\nAssistant: {output}");
            if let Err(err) = memory.store(&ctx, &exchange, StoreOptions::default()).await {
                warn!(code = err.code().as_str(), "failed to store exchange");
            }
            let _ = memory
                .add_message(&ctx, ChatMessage::new(Role::User, &input))
                .await;
            let _ = memory
                .add_message(&ctx, ChatMessage::new(Role::Assistant, &output))
                .await;

            Ok(output)
        }
    })
}

/// Wrap `handler` with knowledge-base retrieval.
///
/// The top-`top_k` knowledge passages (optionally restricted to
/// `collection`) are injected into the system prompt with source
/// attribution.
#[must_use]
pub fn with_rag_augmentation(
    handler: Handler,
    collection: Option<String>,
    top_k: usize,
) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        let collection = collection.clone();
        async move {
            let Some(memory) = caps.memory().cloned() else {
                return handler(ctx, input, caps).await;
            };

            let opts = SearchOptions {
                limit: top_k,
                collection,
                ..SearchOptions::default()
            };
            let caps = match memory.search_knowledge(&ctx, &input, opts).await {
                Ok(hits) if !hits.is_empty() => {
                    let total_tokens = hits.iter().map(|h| estimate_tokens(&h.content)).sum();
                    let source_attribution = hits
                        .iter()
                        .filter(|h| !h.source.is_empty())
                        .map(|h| h.source.clone())
                        .collect();
                    let context = RagContext {
                        knowledge_base: hits,
                        total_tokens,
                        source_attribution,
                        ..RagContext::default()
                    };
                    let rendered = context.render();
                    caps.trace().merge_memory_context(context);
                    caps.with_system_prefix(rendered)
                }
                Ok(_) => caps,
                Err(err) => {
                    warn!(code = err.code().as_str(), "knowledge search failed, continuing without");
                    caps
                }
            };

            handler(ctx, input, caps).await
        }
    })
}

/// Bare retry wrapper specialized to retryable LLM failures
/// (`LLM_TIMEOUT`, `LLM_RATE_LIMITED`, retryable `LLM_CALL_FAILED`).
#[must_use]
pub fn with_llm_augmentation(handler: Handler, max_retries: u32) -> Handler {
    let policy = RetryPolicy::with_max_attempts(max_retries.max(1));
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        let policy = policy.clone();
        async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match handler(ctx.clone(), input.clone(), caps.clone()).await {
                    Ok(output) => return Ok(output),
                    Err(err)
                        if attempt < policy.max_attempts
                            && err.is_retryable()
                            && is_llm_code(err.code()) =>
                    {
                        let delay = policy.delay_for(attempt);
                        debug!(attempt, ?delay, "retrying LLM failure");
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            done = ctx.done() => return Err(done),
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    })
}

const fn is_llm_code(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::LlmTimeout | ErrorCode::LlmRateLimited | ErrorCode::LlmCallFailed
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::config::{AgentConfig, ToolsConfig};
    use crate::capabilities::{Capabilities, RunTrace, ToolsHandle};
    use crate::context::RunContext;
    use crate::error::{AgentError, Result};
    use crate::memory::{InMemoryMemory, SharedMemory};
    use crate::tool::{Tool, ToolManager};

    /// Handler returning scripted outputs in order.
    fn scripted(outputs: Vec<&str>) -> Handler {
        let queue = Arc::new(Mutex::new(
            outputs
                .into_iter()
                .map(str::to_owned)
                .collect::<VecDeque<_>>(),
        ));
        handler_fn(move |_ctx, _input, _caps| {
            let queue = Arc::clone(&queue);
            async move {
                queue
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| AgentError::internal("script exhausted"))
            }
        })
    }

    /// Handler echoing the input (used to observe injected prefixes).
    fn echo() -> Handler {
        handler_fn(|_ctx, input, _caps| async move { Ok(input) })
    }

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Adds x and y."
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "x": { "type": "number" },
                    "y": { "type": "number" }
                },
                "required": ["x", "y"]
            })
        }

        async fn execute(&self, _ctx: &RunContext, args: Value) -> Result<Value> {
            let x = args["x"].as_f64().unwrap_or_default();
            let y = args["y"].as_f64().unwrap_or_default();
            Ok(json!(x + y))
        }
    }

    async fn caps_with_tools() -> Capabilities {
        let manager = Arc::new(
            ToolManager::builder()
                .config(ToolsConfig::default())
                .tool(Arc::new(AddTool))
                .build(&RunContext::new())
                .await
                .unwrap(),
        );
        let trace = RunTrace::new();
        let tools = ToolsHandle::new(manager, None, trace.clone(), None);
        Capabilities::test_bundle(Some(tools), None, trace)
    }

    fn caps_with_memory(memory: SharedMemory) -> Capabilities {
        let trace = RunTrace::new();
        Capabilities::test_bundle(None, Some(memory), trace)
    }

    mod tool_requests {
        use super::*;

        #[test]
        fn parses_bare_json() {
            let (name, args) =
                parse_tool_request(r#"{"tool": "add", "args": {"x": 1, "y": 2}}"#).unwrap();
            assert_eq!(name, "add");
            assert_eq!(args, json!({"x": 1, "y": 2}));
        }

        #[test]
        fn parses_fenced_json() {
            let fenced = "```json\n{\"tool\": \"add\", \"args\": {}}\n```";
            let (name, args) = parse_tool_request(fenced).unwrap();
            assert_eq!(name, "add");
            assert_eq!(args, json!({}));
        }

        #[test]
        fn plain_text_is_not_a_request() {
            assert!(parse_tool_request("The answer is 3.").is_none());
            assert!(parse_tool_request("{\"not_tool\": 1}").is_none());
        }
    }

    mod tool_loop {
        use super::*;

        #[tokio::test]
        async fn executes_requested_tool_and_returns_final_answer() {
            let caps = caps_with_tools().await;
            let handler = with_tool_augmentation(scripted(vec![
                r#"{"tool": "add", "args": {"x": 2, "y": 3}}"#,
                "The answer is 5.",
            ]));

            let out = handler(RunContext::new(), "what is 2+3?".to_owned(), caps.clone())
                .await
                .unwrap();
            assert_eq!(out, "The answer is 5.");

            let (_, tool_calls, _, _) = caps.trace().finish();
            assert_eq!(tool_calls.len(), 1);
            assert_eq!(tool_calls[0].tool_name, "add");
            assert!(tool_calls[0].success);
        }

        #[tokio::test]
        async fn plain_answer_skips_tools() {
            let caps = caps_with_tools().await;
            let handler = with_tool_augmentation(scripted(vec!["direct answer"]));
            let out = handler(RunContext::new(), "q".to_owned(), caps)
                .await
                .unwrap();
            assert_eq!(out, "direct answer");
        }

        #[tokio::test]
        async fn fatal_tool_error_propagates() {
            let caps = caps_with_tools().await;
            // Arguments violating the schema produce TOOL_INVALID_ARGS (fatal).
            let handler = with_tool_augmentation(scripted(vec![
                r#"{"tool": "add", "args": {"x": "one"}}"#,
                "unreachable",
            ]));
            let err = handler(RunContext::new(), "q".to_owned(), caps)
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ToolInvalidArgs);
        }

        #[tokio::test]
        async fn without_tools_behaves_as_plain_handler() {
            let caps = Capabilities::for_tests();
            let handler = with_tool_augmentation(echo());
            let out = handler(RunContext::new(), "hello".to_owned(), caps)
                .await
                .unwrap();
            assert_eq!(out, "hello");
        }
    }

    mod memory_loop {
        use super::*;

        #[tokio::test]
        async fn stores_exchange_and_recalls_it() {
            let memory: SharedMemory = Arc::new(InMemoryMemory::new());
            let ctx = RunContext::new().with_session("s");
            let handler = with_memory_augmentation(scripted(vec!["I can help with rust."]));

            let caps = caps_with_memory(Arc::clone(&memory));
            handler(ctx.clone(), "tell me about rust".to_owned(), caps)
                .await
                .unwrap();

            // The exchange is now queryable.
            let hits = memory
                .query(&ctx, "tell me about rust", QueryOptions::default())
                .await
                .unwrap();
            assert!(!hits.is_empty());
            assert!(hits[0].entry.content.contains("Assistant: I can help with rust."));

            // And present in chat history.
            let history = memory.history(&ctx, 10).await.unwrap();
            assert_eq!(history.len(), 2);
        }

        #[tokio::test]
        async fn records_memory_context_in_trace() {
            let memory: SharedMemory = Arc::new(InMemoryMemory::new());
            let ctx = RunContext::new();
            memory
                .store(&ctx, "user prefers short answers", StoreOptions::default())
                .await
                .unwrap();

            let caps = caps_with_memory(Arc::clone(&memory));
            let handler = with_memory_augmentation(scripted(vec!["ok"]));
            handler(ctx, "short answers please prefers user".to_owned(), caps.clone())
                .await
                .unwrap();

            let (_, _, memory_context, _) = caps.trace().finish();
            let context = memory_context.unwrap();
            assert!(!context.personal_memory.is_empty());
        }
    }

    mod rag_loop {
        use super::*;
        use crate::memory::Document;

        #[tokio::test]
        async fn injects_knowledge_and_attribution() {
            let memory: SharedMemory = Arc::new(InMemoryMemory::new());
            let ctx = RunContext::new();
            memory
                .ingest_document(
                    &ctx,
                    Document::new("d1", "Guide", "workflow engines schedule steps", "guide.md"),
                )
                .await
                .unwrap();

            let caps = caps_with_memory(Arc::clone(&memory));
            let handler = with_rag_augmentation(scripted(vec!["answered"]), None, 3);
            handler(ctx, "how do workflow engines schedule".to_owned(), caps.clone())
                .await
                .unwrap();

            let (_, _, memory_context, _) = caps.trace().finish();
            let context = memory_context.unwrap();
            assert!(!context.knowledge_base.is_empty());
            assert_eq!(context.source_attribution, vec!["guide.md".to_owned()]);
        }
    }

    mod llm_retry {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn retries_llm_class_errors_only() {
            let attempts = Arc::new(AtomicU32::new(0));
            let counter = Arc::clone(&attempts);
            let flaky = handler_fn(move |_ctx, _input, _caps| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AgentError::new(ErrorCode::LlmRateLimited, "429"))
                    } else {
                        Ok("done".to_owned())
                    }
                }
            });

            let handler = with_llm_augmentation(flaky, 5);
            let out = handler(RunContext::new(), "q".to_owned(), Capabilities::for_tests())
                .await
                .unwrap();
            assert_eq!(out, "done");
            assert_eq!(attempts.load(Ordering::SeqCst), 3);
        }

        #[tokio::test]
        async fn non_llm_retryable_errors_surface() {
            let handler = with_llm_augmentation(
                handler_fn(|_ctx, _input, _caps| async {
                    Err(AgentError::new(ErrorCode::MemoryConnection, "down"))
                }),
                5,
            );
            let err = handler(RunContext::new(), "q".to_owned(), Capabilities::for_tests())
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::MemoryConnection);
        }
    }
}
