//! Parallel execution: every step receives the workflow input; all run
//! concurrently. With `fail_fast` the first failure cancels the remaining
//! steps; otherwise every outcome is collected.

use futures::future::join_all;
use tracing::debug;

use super::{StepResult, Workflow, WorkflowResult};
use crate::context::RunContext;
use crate::error::AgentError;
use crate::stream::ChunkSender;

impl Workflow {
    pub(super) async fn run_parallel(
        &self,
        ctx: &RunContext,
        input: &str,
        emitter: Option<&ChunkSender>,
    ) -> WorkflowResult {
        let group_ctx = ctx.child();
        let fail_fast = self.config.fail_fast;

        debug!(steps = self.steps.len(), fail_fast, "parallel fan-out");
        let futures = self.steps.iter().map(|step| {
            let step_input = step.derive_input(input);
            let group_ctx = group_ctx.clone();
            async move {
                let result = Self::execute_step(step, &group_ctx, step_input, emitter).await;
                if !result.success && fail_fast {
                    group_ctx.cancel();
                }
                result
            }
        });

        // join_all preserves declaration order in the collected results.
        let results: Vec<StepResult> = join_all(futures).await;

        let error: Option<AgentError> = results
            .iter()
            .find(|r| !r.success)
            .and_then(|r| r.error.clone());
        let final_output = if error.is_none() {
            results
                .iter()
                .map(|r| r.output.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            String::new()
        };
        WorkflowResult::assemble(final_output, error, std::time::Duration::ZERO, results)
    }
}
