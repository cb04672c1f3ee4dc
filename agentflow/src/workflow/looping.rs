//! Loop execution: the step list repeats under a continuation predicate,
//! bounded by `max_iterations`.
//!
//! The predicate is evaluated before every iteration with the number of
//! completed iterations and the previous iteration's final step result.
//! Exit reasons, in evaluation order: predicate false (`condition_false`),
//! predicate error (`error`), iteration cap (`max_iterations`), step
//! failure (`error`), context cancellation (`cancelled`). The engine never
//! infers convergence; callers encode it in the predicate.

use tracing::debug;

use super::{StepResult, Workflow, WorkflowResult};
use crate::agent::result::{ExitReason, IterationInfo};
use crate::context::RunContext;
use crate::error::{AgentError, ErrorCode};
use crate::stream::ChunkSender;

impl Workflow {
    pub(super) async fn run_loop(
        &self,
        ctx: &RunContext,
        input: &str,
        emitter: Option<&ChunkSender>,
    ) -> WorkflowResult {
        let Some(predicate) = self.predicate.clone() else {
            return WorkflowResult::assemble(
                String::new(),
                Some(AgentError::workflow_invalid(
                    "loop workflow missing predicate",
                )),
                std::time::Duration::ZERO,
                Vec::new(),
            );
        };

        let max_iterations = self.config.max_iterations;
        let mut completed = 0_usize;
        let mut last_result: Option<StepResult> = None;
        let mut step_results: Vec<StepResult> = Vec::new();
        let mut current_input = input.to_owned();
        let mut error: Option<AgentError> = None;

        let exit_reason = loop {
            match predicate(ctx, completed, last_result.as_ref()) {
                Ok(true) => {}
                Ok(false) => break ExitReason::ConditionFalse,
                Err(err) => {
                    error = Some(err);
                    break ExitReason::Error;
                }
            }

            if ctx.is_cancelled() {
                error = Some(AgentError::cancelled());
                break ExitReason::Cancelled;
            }

            debug!(iteration = completed + 1, "loop iteration starting");
            let mut iteration_results: Vec<StepResult> = Vec::with_capacity(self.steps.len());
            let mut previous_output = current_input.clone();
            let mut iteration_error: Option<AgentError> = None;

            for step in self.steps.iter() {
                if iteration_error.is_some() {
                    iteration_results.push(StepResult::skipped(step, "upstream_failed"));
                    continue;
                }
                let step_input = step.derive_input(&previous_output);
                let result = Self::execute_step(step, ctx, step_input, emitter).await;
                if result.success {
                    previous_output.clone_from(&result.output);
                } else {
                    iteration_error = result.error.clone();
                }
                iteration_results.push(result);
            }

            step_results = iteration_results;
            if let Some(err) = iteration_error {
                let cancelled = err.root_code() == ErrorCode::Cancelled;
                error = Some(err);
                break if cancelled {
                    ExitReason::Cancelled
                } else {
                    ExitReason::Error
                };
            }

            completed += 1;
            last_result = step_results.last().cloned();
            current_input = previous_output;

            if completed >= max_iterations {
                break ExitReason::MaxIterations;
            }
        };

        let final_output = if error.is_none() {
            current_input
        } else {
            String::new()
        };
        let mut result =
            WorkflowResult::assemble(final_output, error, std::time::Duration::ZERO, step_results);
        result.iteration_info = Some(IterationInfo {
            total_iterations: completed,
            exit_reason,
        });
        result
    }
}
