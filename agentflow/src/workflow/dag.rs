//! DAG execution: wavefront scheduling over the dependency graph.
//!
//! The graph is validated acyclic at build time. At each wavefront every
//! step whose dependencies all succeeded is scheduled concurrently; a step
//! downstream of a failure (or of a skipped step) is marked
//! `skipped = true` with reason `upstream_failed`. Deadlock is impossible
//! by construction.

use std::collections::HashMap;

use futures::future::join_all;
use tracing::debug;

use super::{StepResult, Workflow, WorkflowResult, WorkflowStep};
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::stream::ChunkSender;

/// Reject graphs with cycles, listing one offending cycle.
pub(super) fn check_acyclic(
    steps: &[WorkflowStep],
    index_of: &HashMap<String, usize>,
) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    fn visit(
        node: usize,
        steps: &[WorkflowStep],
        index_of: &HashMap<String, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Result<()> {
        marks[node] = Mark::Grey;
        stack.push(node);
        for dep in &steps[node].dependencies {
            let dep_idx = index_of[dep];
            match marks[dep_idx] {
                Mark::Grey => {
                    // Reconstruct the cycle from the grey stack.
                    let start = stack
                        .iter()
                        .position(|&n| n == dep_idx)
                        .unwrap_or_default();
                    let mut cycle: Vec<String> = stack[start..]
                        .iter()
                        .map(|&n| steps[n].name.clone())
                        .collect();
                    cycle.push(steps[dep_idx].name.clone());
                    return Err(AgentError::cycle_detected(&cycle));
                }
                Mark::White => visit(dep_idx, steps, index_of, marks, stack)?,
                Mark::Black => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Black;
        Ok(())
    }

    let mut marks = vec![Mark::White; steps.len()];
    let mut stack = Vec::new();
    for node in 0..steps.len() {
        if marks[node] == Mark::White {
            visit(node, steps, index_of, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

impl Workflow {
    pub(super) async fn run_dag(
        &self,
        ctx: &RunContext,
        input: &str,
        emitter: Option<&ChunkSender>,
    ) -> WorkflowResult {
        let index_of: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let mut outcomes: Vec<Option<StepResult>> = vec![None; self.steps.len()];

        loop {
            let mut runnable: Vec<usize> = Vec::new();
            let mut progressed = false;

            for (i, step) in self.steps.iter().enumerate() {
                if outcomes[i].is_some() {
                    continue;
                }
                let deps_done = step
                    .dependencies
                    .iter()
                    .all(|d| outcomes[index_of[d.as_str()]].is_some());
                if !deps_done {
                    continue;
                }
                let deps_ok = step
                    .dependencies
                    .iter()
                    .all(|d| outcomes[index_of[d.as_str()]].as_ref().is_some_and(|r| r.success));
                if deps_ok {
                    runnable.push(i);
                } else {
                    outcomes[i] = Some(StepResult::skipped(step, "upstream_failed"));
                    progressed = true;
                }
            }

            if runnable.is_empty() {
                if progressed {
                    continue;
                }
                break;
            }

            debug!(wavefront = ?runnable, "dag wavefront");
            let wave = runnable.iter().map(|&i| {
                let step = &self.steps[i];
                // Default input: dependency outputs joined by newline in
                // declaration order; roots get the workflow input.
                let default_input = if step.dependencies.is_empty() {
                    input.to_owned()
                } else {
                    step.dependencies
                        .iter()
                        .filter_map(|d| outcomes[index_of[d.as_str()]].as_ref())
                        .map(|r| r.output.as_str())
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                let step_input = step.derive_input(&default_input);
                async move { (i, Self::execute_step(step, ctx, step_input, emitter).await) }
            });
            for (i, result) in join_all(wave).await {
                outcomes[i] = Some(result);
            }
        }

        let results: Vec<StepResult> = outcomes
            .into_iter()
            .map(|r| r.unwrap_or_else(unreachable_skip))
            .collect();

        let error = results
            .iter()
            .find(|r| !r.success && !r.skipped)
            .and_then(|r| r.error.clone())
            .or_else(|| {
                results
                    .iter()
                    .find(|r| !r.success)
                    .and_then(|r| r.error.clone())
            });

        // Final output: sink outputs (steps nothing depends on) joined in
        // declaration order.
        let final_output = if error.is_none() {
            let mut has_dependents = vec![false; self.steps.len()];
            for step in self.steps.iter() {
                for dep in &step.dependencies {
                    has_dependents[index_of[dep.as_str()]] = true;
                }
            }
            results
                .iter()
                .zip(has_dependents)
                .filter(|(_, dependent)| !dependent)
                .map(|(r, _)| r.output.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            String::new()
        };

        WorkflowResult::assemble(final_output, error, std::time::Duration::ZERO, results)
    }
}

// Acyclic validation guarantees every step is eventually scheduled or
// skipped; this placeholder keeps the collect total.
fn unreachable_skip() -> StepResult {
    StepResult {
        step_name: String::new(),
        output: String::new(),
        success: false,
        error: Some(AgentError::internal("dag scheduling hole")),
        skipped: true,
        skip_reason: Some("unscheduled".to_owned()),
        duration: std::time::Duration::ZERO,
        dependencies: Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::super::test_support::{failing_agent, fn_agent};
    use super::super::WorkflowMode;
    use super::*;
    use crate::agent::Agent;
    use crate::error::ErrorCode;
    use crate::handler::handler_fn;

    async fn diamond(fail_b: bool) -> Workflow {
        let b: Agent = if fail_b {
            failing_agent("b", "b exploded").await
        } else {
            fn_agent("b", |s| format!("b({s})")).await
        };
        Workflow::builder("diamond")
            .mode(WorkflowMode::Dag)
            .agent("a", fn_agent("a", |s| format!("a({s})")).await)
            .step(super::super::WorkflowStep::new("b", b).depends_on(["a"]))
            .step(
                super::super::WorkflowStep::new("c", fn_agent("c", |s| format!("c({s})")).await)
                    .depends_on(["a"]),
            )
            .step(
                super::super::WorkflowStep::new("d", fn_agent("d", str::to_owned).await)
                    .depends_on(["b", "c"]),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn executes_in_dependency_order() {
        let workflow = diamond(false).await;
        let result = workflow.run(&RunContext::new(), "in").await;
        assert!(result.success);
        assert_eq!(result.step("a").unwrap().output, "a(in)");
        assert_eq!(result.step("b").unwrap().output, "b(a(in))");
        // d's default input: b and c outputs joined by newline, in
        // declaration order of d's dependencies.
        assert_eq!(result.step("d").unwrap().output, "b(a(in))\nc(a(in))");
        assert_eq!(result.final_output, "b(a(in))\nc(a(in))");
    }

    #[tokio::test]
    async fn failure_skips_downstream_only() {
        let workflow = diamond(true).await;
        let result = workflow.run(&RunContext::new(), "in").await;
        assert!(!result.success);

        assert!(result.step("a").unwrap().success);
        assert!(!result.step("b").unwrap().success);
        assert!(result.step("c").unwrap().success);

        let d = result.step("d").unwrap();
        assert!(d.skipped);
        assert_eq!(d.skip_reason.as_deref(), Some("upstream_failed"));

        let err = result.error.unwrap();
        assert_eq!(err.code(), ErrorCode::WorkflowStepFailed);
        assert_eq!(
            err.detail("step_name").and_then(serde_json::Value::as_str),
            Some("b")
        );
    }

    #[tokio::test]
    async fn dependency_completion_precedes_dependent_start() {
        let log: Arc<Mutex<Vec<String>>> = Arc::default();

        async fn logging_agent(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Agent {
            Agent::builder()
                .name(name)
                .handler(handler_fn(move |_ctx, input, _caps| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push(format!("start:{name}"));
                        tokio::task::yield_now().await;
                        log.lock().unwrap().push(format!("end:{name}"));
                        Ok(input)
                    }
                }))
                .build()
                .await
                .unwrap()
        }

        let workflow = Workflow::builder("ordered")
            .mode(WorkflowMode::Dag)
            .agent("first", logging_agent("first", Arc::clone(&log)).await)
            .step(
                super::super::WorkflowStep::new(
                    "second",
                    logging_agent("second", Arc::clone(&log)).await,
                )
                .depends_on(["first"]),
            )
            .build()
            .unwrap();

        workflow.run(&RunContext::new(), "x").await;
        let events = log.lock().unwrap().clone();
        let end_first = events.iter().position(|e| e == "end:first").unwrap();
        let start_second = events.iter().position(|e| e == "start:second").unwrap();
        assert!(end_first < start_second);
    }

    #[tokio::test]
    async fn cycle_detection_names_the_cycle() {
        let a = fn_agent("a", str::to_owned).await;
        let b = fn_agent("b", str::to_owned).await;
        let err = Workflow::builder("cyclic")
            .mode(WorkflowMode::Dag)
            .step(super::super::WorkflowStep::new("x", a).depends_on(["y"]))
            .step(super::super::WorkflowStep::new("y", b).depends_on(["x"]))
            .build()
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::WorkflowCycleDetected);
        let cycle = err.detail("cycle").unwrap().as_array().unwrap();
        assert!(cycle.len() >= 2);
    }

    #[tokio::test]
    async fn transform_overrides_dependency_join() {
        let workflow = Workflow::builder("custom")
            .mode(WorkflowMode::Dag)
            .agent("src", fn_agent("src", |_| "payload".to_owned()).await)
            .step(
                super::super::WorkflowStep::new("dst", fn_agent("dst", str::to_owned).await)
                    .depends_on(["src"])
                    .transform(|joined| format!("<{joined}>")),
            )
            .build()
            .unwrap();

        let result = workflow.run(&RunContext::new(), "x").await;
        assert_eq!(result.step("dst").unwrap().output, "<payload>");
    }
}
