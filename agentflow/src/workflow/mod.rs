//! Workflow executor.
//!
//! A [`Workflow`] composes agents into Sequential, Parallel, DAG, or Loop
//! pipelines. Steps share the workflow context (and, when set, a shared
//! memory injected under a well-known context key); each step produces a
//! [`StepResult`] and the workflow aggregates them into a
//! [`WorkflowResult`] that is populated even on partial failure.
//!
//! The same scheduling core drives both `run` and `run_stream`; streaming
//! runs additionally bracket every step with `AgentStart`/`AgentComplete`
//! chunks and stamp `agent_name` onto merged sub-stream chunks.

mod dag;
mod looping;
mod parallel;
mod sequential;
mod streaming;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::agent::Agent;
use crate::agent::result::IterationInfo;
use crate::chunk::StreamChunk;
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::memory::SharedMemory;
use crate::stream::{ChunkSender, StreamHandle, StreamOutcome};

/// Stream of a workflow run.
pub type WorkflowStream = StreamHandle<WorkflowResult>;

/// Workflow execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowMode {
    /// Steps run in order, each fed the previous output.
    #[default]
    Sequential,
    /// Steps run concurrently on the same input.
    Parallel,
    /// Steps run in dependency order with wavefront parallelism.
    Dag,
    /// The step list repeats under a continuation predicate.
    Loop,
}

/// Replaces a step's default input derivation.
pub type StepTransform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Loop continuation predicate: `(ctx, completed_iterations, last_result)`.
pub type LoopPredicate =
    Arc<dyn Fn(&RunContext, usize, Option<&StepResult>) -> Result<bool> + Send + Sync>;

/// One step of a workflow.
#[derive(Clone)]
pub struct WorkflowStep {
    pub(crate) name: String,
    pub(crate) agent: Agent,
    pub(crate) dependencies: Vec<String>,
    pub(crate) transform: Option<StepTransform>,
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("has_transform", &self.transform.is_some())
            .finish()
    }
}

impl WorkflowStep {
    /// Create a step running `agent` under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, agent: Agent) -> Self {
        Self {
            name: name.into(),
            agent,
            dependencies: Vec::new(),
            transform: None,
        }
    }

    /// Declare dependencies (DAG mode).
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Replace the default input derivation for this step.
    #[must_use]
    pub fn transform(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    pub(crate) fn derive_input(&self, default_input: &str) -> String {
        match &self.transform {
            Some(f) => f(default_input),
            None => default_input.to_owned(),
        }
    }
}

/// Workflow-level configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Whole-workflow deadline.
    pub timeout: Option<Duration>,
    /// Iteration cap (Loop mode), at least 1.
    pub max_iterations: usize,
    /// Cancel remaining parallel steps on the first failure.
    pub fail_fast: bool,
    /// Maximum sub-workflow nesting depth.
    pub max_nesting_depth: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_iterations: 1,
            fail_fast: false,
            max_nesting_depth: 8,
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,
    /// Step output text.
    pub output: String,
    /// Whether the step succeeded.
    pub success: bool,
    /// The step failure, wrapped as `WORKFLOW_STEP_FAILED`.
    pub error: Option<AgentError>,
    /// Whether the step never ran.
    pub skipped: bool,
    /// Why the step was skipped.
    pub skip_reason: Option<String>,
    /// Step wall time.
    pub duration: Duration,
    /// Names this step waited on.
    pub dependencies: Vec<String>,
}

impl StepResult {
    pub(crate) fn from_run(step: &WorkflowStep, run: crate::agent::RunResult) -> Self {
        let error = run
            .error
            .map(|cause| AgentError::step_failed(&step.name, cause));
        Self {
            step_name: step.name.clone(),
            output: run.content,
            success: run.success,
            error,
            skipped: false,
            skip_reason: None,
            duration: run.duration,
            dependencies: step.dependencies.clone(),
        }
    }

    pub(crate) fn skipped(step: &WorkflowStep, reason: &str) -> Self {
        Self {
            step_name: step.name.clone(),
            output: String::new(),
            success: false,
            error: None,
            skipped: true,
            skip_reason: Some(reason.to_owned()),
            duration: Duration::ZERO,
            dependencies: step.dependencies.clone(),
        }
    }
}

/// Aggregated outcome of a workflow run.
///
/// Populated for completed steps even on partial failure; never "nil for
/// both" result and error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// Final output per the workflow mode.
    pub final_output: String,
    /// Whether every executed step succeeded.
    pub success: bool,
    /// The first step failure, wrapped as `WORKFLOW_STEP_FAILED`.
    pub error: Option<AgentError>,
    /// Whole-workflow wall time.
    pub duration: Duration,
    /// Step results in execution order.
    pub step_results: Vec<StepResult>,
    /// Loop accounting (Loop mode only).
    pub iteration_info: Option<IterationInfo>,
}

impl WorkflowResult {
    /// Look up a step result by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|s| s.step_name == name)
    }

    pub(crate) fn assemble(
        final_output: String,
        error: Option<AgentError>,
        duration: Duration,
        step_results: Vec<StepResult>,
    ) -> Self {
        Self {
            final_output,
            success: error.is_none(),
            error,
            duration,
            step_results,
            iteration_info: None,
        }
    }
}

impl StreamOutcome for WorkflowResult {
    fn from_stream_error(err: AgentError) -> Self {
        Self::assemble(String::new(), Some(err), Duration::ZERO, Vec::new())
    }
}

/// An orchestration of steps under one execution mode.
#[derive(Clone)]
pub struct Workflow {
    pub(crate) name: String,
    pub(crate) mode: WorkflowMode,
    pub(crate) steps: Arc<Vec<WorkflowStep>>,
    pub(crate) config: WorkflowConfig,
    pub(crate) shared_memory: Option<SharedMemory>,
    pub(crate) predicate: Option<LoopPredicate>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("steps", &self.steps.len())
            .field("shared_memory", &self.shared_memory.is_some())
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// Create a builder.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// The workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The execution mode.
    #[must_use]
    pub const fn mode(&self) -> WorkflowMode {
        self.mode
    }

    /// Share a memory across all steps: the executor injects it into each
    /// step context, where it overrides the step agents' own memory.
    pub fn set_memory(&mut self, memory: SharedMemory) {
        self.shared_memory = Some(memory);
    }

    /// Run the workflow to completion.
    #[instrument(skip_all, fields(workflow = %self.name, mode = ?self.mode))]
    pub async fn run(&self, ctx: &RunContext, input: impl Into<String>) -> WorkflowResult {
        self.dispatch(ctx, input.into(), None).await
    }

    /// Shared scheduling core for blocking and streaming runs.
    pub(crate) async fn dispatch(
        &self,
        ctx: &RunContext,
        input: String,
        emitter: Option<&ChunkSender>,
    ) -> WorkflowResult {
        let started = Instant::now();

        let mut run_ctx = match self.config.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };
        if let Some(memory) = &self.shared_memory {
            run_ctx = crate::memory::with_shared_memory(&run_ctx, Arc::clone(memory));
        }

        debug!(steps = self.steps.len(), "workflow starting");
        let mut result = match self.mode {
            WorkflowMode::Sequential => {
                self.run_sequential(&run_ctx, &input, emitter).await
            }
            WorkflowMode::Parallel => self.run_parallel(&run_ctx, &input, emitter).await,
            WorkflowMode::Dag => self.run_dag(&run_ctx, &input, emitter).await,
            WorkflowMode::Loop => self.run_loop(&run_ctx, &input, emitter).await,
        };
        result.duration = started.elapsed();
        if let Some(err) = &result.error {
            warn!(code = err.code().as_str(), "workflow failed");
        }
        result
    }

    /// Execute one step, optionally forwarding its sub-stream into
    /// `emitter` bracketed by `AgentStart`/`AgentComplete` chunks.
    pub(crate) async fn execute_step(
        step: &WorkflowStep,
        ctx: &RunContext,
        input: String,
        emitter: Option<&ChunkSender>,
    ) -> StepResult {
        let Some(sender) = emitter else {
            let run = step.agent.run(ctx, input).await;
            return StepResult::from_run(step, run);
        };

        sender
            .send(StreamChunk::agent_start(&step.name).with_agent_name(step.agent.name()))
            .await;

        let mut inner = step.agent.run_stream(ctx, input);
        while let Some(chunk) = inner.recv().await {
            // Inner terminals are lifted into the step result; the outer
            // stream has exactly one terminal of its own.
            if chunk.is_terminal() {
                break;
            }
            sender.send(chunk.with_agent_name(&step.name)).await;
        }
        let run = inner.wait().await;
        let status = if run.success { "success" } else { "error" };
        sender
            .send(
                StreamChunk::agent_complete(&step.name, status)
                    .with_agent_name(step.agent.name()),
            )
            .await;
        StepResult::from_run(step, run)
    }
}

/// Builder for [`Workflow`], validating the step graph at build time.
pub struct WorkflowBuilder {
    name: String,
    mode: WorkflowMode,
    steps: Vec<WorkflowStep>,
    config: WorkflowConfig,
    shared_memory: Option<SharedMemory>,
    predicate: Option<LoopPredicate>,
}

impl std::fmt::Debug for WorkflowBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowBuilder")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

impl WorkflowBuilder {
    /// Create a builder for a workflow named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: WorkflowMode::default(),
            steps: Vec::new(),
            config: WorkflowConfig::default(),
            shared_memory: None,
            predicate: None,
        }
    }

    /// Set the execution mode.
    #[must_use]
    pub const fn mode(mut self, mode: WorkflowMode) -> Self {
        self.mode = mode;
        self
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a step running `agent` under `name`.
    #[must_use]
    pub fn agent(self, name: impl Into<String>, agent: Agent) -> Self {
        self.step(WorkflowStep::new(name, agent))
    }

    /// Replace the workflow configuration.
    #[must_use]
    pub fn config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the whole-workflow deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Cancel remaining parallel steps on the first failure.
    #[must_use]
    pub const fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    /// Set the loop iteration cap.
    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Set the sub-workflow nesting cap.
    #[must_use]
    pub const fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.config.max_nesting_depth = depth;
        self
    }

    /// Share a memory across all steps.
    #[must_use]
    pub fn shared_memory(mut self, memory: SharedMemory) -> Self {
        self.shared_memory = Some(memory);
        self
    }

    /// Set the loop continuation predicate (Loop mode).
    #[must_use]
    pub fn should_continue(
        mut self,
        predicate: impl Fn(&RunContext, usize, Option<&StepResult>) -> Result<bool>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Validate the definition and build the workflow.
    pub fn build(self) -> Result<Workflow> {
        if self.steps.is_empty() {
            return Err(AgentError::workflow_invalid("workflow has no steps"));
        }

        let mut seen = HashMap::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.name.is_empty() {
                return Err(AgentError::workflow_invalid(format!(
                    "step {index} has an empty name"
                )));
            }
            if seen.insert(step.name.clone(), index).is_some() {
                return Err(AgentError::workflow_invalid(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if !seen.contains_key(dep) {
                    return Err(AgentError::workflow_invalid(format!(
                        "step '{}' depends on unknown step '{dep}'",
                        step.name
                    )));
                }
                if dep == &step.name {
                    return Err(AgentError::cycle_detected(&[
                        step.name.clone(),
                        step.name.clone(),
                    ]));
                }
            }
            if !step.dependencies.is_empty() && self.mode != WorkflowMode::Dag {
                return Err(AgentError::workflow_invalid(format!(
                    "step '{}' declares dependencies but the mode is {:?}",
                    step.name, self.mode
                )));
            }
        }

        if self.mode == WorkflowMode::Dag {
            dag::check_acyclic(&self.steps, &seen)?;
        }

        if self.mode == WorkflowMode::Loop {
            if self.config.max_iterations == 0 {
                return Err(AgentError::workflow_invalid(
                    "loop workflows require max_iterations >= 1",
                ));
            }
            if self.predicate.is_none() {
                return Err(AgentError::workflow_invalid(
                    "loop workflows require a should_continue predicate",
                ));
            }
        }

        Ok(Workflow {
            name: self.name,
            mode: self.mode,
            steps: Arc::new(self.steps),
            config: self.config,
            shared_memory: self.shared_memory,
            predicate: self.predicate,
        })
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::test_support::fn_agent;
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn build_rejects_empty_workflow() {
        let err = Workflow::builder("empty").build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);
    }

    #[tokio::test]
    async fn build_rejects_duplicate_step_names() {
        let a = fn_agent("a", str::to_owned).await;
        let err = Workflow::builder("dup")
            .agent("same", a.clone())
            .agent("same", a)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);
        assert!(err.message().contains("same"));
    }

    #[tokio::test]
    async fn build_rejects_unknown_dependency() {
        let a = fn_agent("a", str::to_owned).await;
        let err = Workflow::builder("dag")
            .mode(WorkflowMode::Dag)
            .step(WorkflowStep::new("x", a).depends_on(["ghost"]))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);
        assert!(err.message().contains("ghost"));
    }

    #[tokio::test]
    async fn build_rejects_dependencies_outside_dag_mode() {
        let a = fn_agent("a", str::to_owned).await;
        let b = fn_agent("b", str::to_owned).await;
        let err = Workflow::builder("seq")
            .agent("first", a)
            .step(WorkflowStep::new("second", b).depends_on(["first"]))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);
    }

    #[tokio::test]
    async fn build_rejects_self_dependency_as_cycle() {
        let a = fn_agent("a", str::to_owned).await;
        let err = Workflow::builder("selfy")
            .mode(WorkflowMode::Dag)
            .step(WorkflowStep::new("x", a).depends_on(["x"]))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowCycleDetected);
    }

    #[tokio::test]
    async fn loop_mode_requires_cap_and_predicate() {
        let a = fn_agent("a", str::to_owned).await;
        let err = Workflow::builder("loopy")
            .mode(WorkflowMode::Loop)
            .agent("body", a.clone())
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);

        let err = Workflow::builder("loopy")
            .mode(WorkflowMode::Loop)
            .agent("body", a)
            .max_iterations(0)
            .should_continue(|_, _, _| Ok(true))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::WorkflowInvalid);
    }

    #[tokio::test]
    async fn step_lookup_by_name() {
        let result = WorkflowResult::assemble(
            "out".into(),
            None,
            Duration::ZERO,
            vec![StepResult {
                step_name: "a".into(),
                output: "x".into(),
                success: true,
                error: None,
                skipped: false,
                skip_reason: None,
                duration: Duration::ZERO,
                dependencies: Vec::new(),
            }],
        );
        assert!(result.step("a").is_some());
        assert!(result.step("b").is_none());
        assert!(result.success);
    }
}
