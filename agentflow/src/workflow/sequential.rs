//! Sequential execution: steps 1..N in order, each fed the previous output.

use tracing::debug;

use super::{StepResult, Workflow, WorkflowResult};
use crate::context::RunContext;
use crate::error::AgentError;
use crate::stream::ChunkSender;

impl Workflow {
    pub(super) async fn run_sequential(
        &self,
        ctx: &RunContext,
        input: &str,
        emitter: Option<&ChunkSender>,
    ) -> WorkflowResult {
        let mut results: Vec<StepResult> = Vec::with_capacity(self.steps.len());
        let mut previous_output = input.to_owned();
        let mut error: Option<AgentError> = None;

        for step in self.steps.iter() {
            if error.is_some() {
                results.push(StepResult::skipped(step, "upstream_failed"));
                continue;
            }

            let step_input = step.derive_input(&previous_output);
            debug!(step = %step.name, "sequential step starting");
            let step_result = Self::execute_step(step, ctx, step_input, emitter).await;
            if step_result.success {
                previous_output.clone_from(&step_result.output);
            } else {
                error = step_result.error.clone();
            }
            results.push(step_result);
        }

        let final_output = if error.is_none() {
            previous_output
        } else {
            String::new()
        };
        WorkflowResult::assemble(final_output, error, std::time::Duration::ZERO, results)
    }
}
