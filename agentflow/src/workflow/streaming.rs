//! Workflow streaming: merged per-step sub-streams on one outer stream.
//!
//! Every step is bracketed by `AgentStart`/`AgentComplete` chunks carrying
//! `step_name` and `status`; forwarded sub-stream chunks are stamped with
//! `agent_name`. Parallel sub-streams merge non-deterministically, but each
//! sub-stream's internal ordering is preserved. The outer stream emits
//! exactly one terminal chunk.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use super::{Workflow, WorkflowStream};
use crate::agent::StreamingConfig;
use crate::context::RunContext;
use crate::stream::{ChunkSender, StreamHandle};

impl Workflow {
    /// Run in streaming mode, merging per-step sub-streams.
    #[must_use]
    pub fn run_stream(&self, ctx: &RunContext, input: impl Into<String>) -> WorkflowStream {
        // No delta coalescing at the merge layer: batching would fuse
        // fragments from different sub-streams into one chunk.
        let streaming = StreamingConfig {
            flush_interval: std::time::Duration::ZERO,
            ..StreamingConfig::default()
        };
        let (sender, rx) = ChunkSender::channel(&streaming);
        let stream_ctx = ctx.child();
        let cancel = stream_ctx.cancellation().clone();
        let (result_tx, result_rx) = oneshot::channel();

        let metadata: HashMap<String, Value> = HashMap::from([
            ("workflow".to_owned(), Value::String(self.name.clone())),
            ("mode".to_owned(), Value::String(format!("{:?}", self.mode).to_lowercase())),
            ("trace_id".to_owned(), Value::String(stream_ctx.trace_id().to_owned())),
        ]);

        let workflow = self.clone();
        let input = input.into();
        tokio::spawn(async move {
            let result = workflow
                .dispatch(&stream_ctx, input, Some(&sender))
                .await;
            sender.finish(result.error.clone()).await;
            let _ = result_tx.send(result);
        });

        StreamHandle::new(rx, cancel, result_rx, metadata)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::super::test_support::{failing_agent, fn_agent};
    use super::super::{WorkflowMode, WorkflowStep};
    use super::*;
    use crate::chunk::ChunkKind;
    use crate::error::ErrorCode;

    async fn two_step_sequential() -> Workflow {
        Workflow::builder("stream-seq")
            .agent("upper", fn_agent("upper", |s| s.to_uppercase()).await)
            .agent("wrap", fn_agent("wrap", |s| format!("[{s}]")).await)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn brackets_each_step_with_lifecycle_chunks() {
        let workflow = two_step_sequential().await;
        let mut stream = workflow.run_stream(&RunContext::new(), "hi");

        let mut lifecycle = Vec::new();
        let mut terminals = 0;
        while let Some(chunk) = stream.recv().await {
            match &chunk.kind {
                ChunkKind::AgentStart => lifecycle.push(format!(
                    "start:{}",
                    chunk.metadata["step_name"].as_str().unwrap()
                )),
                ChunkKind::AgentComplete => lifecycle.push(format!(
                    "complete:{}:{}",
                    chunk.metadata["step_name"].as_str().unwrap(),
                    chunk.metadata["status"].as_str().unwrap()
                )),
                ChunkKind::Done => terminals += 1,
                _ => {}
            }
        }

        assert_eq!(
            lifecycle,
            vec![
                "start:upper".to_owned(),
                "complete:upper:success".to_owned(),
                "start:wrap".to_owned(),
                "complete:wrap:success".to_owned(),
            ]
        );
        assert_eq!(terminals, 1);

        let result = stream.wait().await;
        assert!(result.success);
        assert_eq!(result.final_output, "[HI]");
        assert_eq!(result.step("upper").unwrap().output, "HI");
    }

    #[tokio::test]
    async fn first_chunk_is_agent_start() {
        let workflow = two_step_sequential().await;
        let mut stream = workflow.run_stream(&RunContext::new(), "x");
        let first = stream.recv().await.unwrap();
        assert!(matches!(first.kind, ChunkKind::AgentStart));
        assert_eq!(first.metadata["step_name"], "upper");
        stream.cancel();
        let _ = stream.wait().await;
    }

    #[tokio::test]
    async fn forwarded_chunks_carry_agent_name() {
        let workflow = two_step_sequential().await;
        let mut stream = workflow.run_stream(&RunContext::new(), "tag me");

        let mut saw_attributed_output = false;
        while let Some(chunk) = stream.recv().await {
            if chunk.output_text().is_some() {
                assert!(chunk.agent_name().is_some());
                saw_attributed_output = true;
            }
        }
        assert!(saw_attributed_output);
    }

    #[tokio::test]
    async fn failing_step_reports_error_status_and_terminal() {
        let workflow = Workflow::builder("stream-fail")
            .agent("boom", failing_agent("boom", "bad").await)
            .build()
            .unwrap();

        let mut stream = workflow.run_stream(&RunContext::new(), "x");
        let mut statuses = Vec::new();
        let mut last = None;
        while let Some(chunk) = stream.recv().await {
            if matches!(chunk.kind, ChunkKind::AgentComplete) {
                statuses.push(chunk.metadata["status"].as_str().unwrap().to_owned());
            }
            last = Some(chunk);
        }
        assert_eq!(statuses, vec!["error".to_owned()]);
        assert!(last.unwrap().is_error());

        let result = stream.wait().await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code(), ErrorCode::WorkflowStepFailed);
    }

    #[tokio::test]
    async fn parallel_substreams_preserve_internal_order() {
        let workflow = Workflow::builder("stream-par")
            .mode(WorkflowMode::Parallel)
            .step(WorkflowStep::new(
                "x",
                fn_agent("x", |s| s.chars().rev().collect()).await,
            ))
            .step(WorkflowStep::new(
                "y",
                fn_agent("y", |s| s.len().to_string()).await,
            ))
            .build()
            .unwrap();

        let mut stream = workflow.run_stream(&RunContext::new(), "abc");
        let mut per_step: HashMap<String, Vec<&'static str>> = HashMap::new();
        while let Some(chunk) = stream.recv().await {
            let step = chunk
                .metadata
                .get("step_name")
                .or_else(|| chunk.metadata.get("agent_name"))
                .and_then(Value::as_str)
                .map(str::to_owned);
            let Some(step) = step else { continue };
            let tag = match chunk.kind {
                ChunkKind::AgentStart => "start",
                ChunkKind::AgentComplete => "complete",
                ChunkKind::Content(_) | ChunkKind::Delta(_) => "output",
                _ => continue,
            };
            per_step.entry(step).or_default().push(tag);
        }

        for step in ["x", "y"] {
            assert_eq!(
                per_step[step],
                vec!["start", "output", "complete"],
                "sub-stream ordering for step {step}"
            );
        }

        let result = stream.wait().await;
        assert!(result.success);
        assert_eq!(result.step("x").unwrap().output, "cba");
        assert_eq!(result.step("y").unwrap().output, "3");
    }
}
