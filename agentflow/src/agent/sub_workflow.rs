//! Workflows wrapped as agents.
//!
//! [`SubWorkflowAgent::wrap`] turns a [`Workflow`] into an [`Agent`] whose
//! handler forwards the step input to the sub-workflow and returns its
//! final output, so a whole pipeline can appear as a single step in
//! another workflow. Failures keep both the outer step name (added by the
//! enclosing workflow) and the inner failing step's name (carried by the
//! wrapped cause) in their details. A nesting-depth counter in the context
//! guards against runaway recursion.

use std::sync::Arc;

use serde_json::Value;

use super::config::{AgentConfig, MemoryConfig, WorkflowSection};
use super::Agent;
use crate::error::AgentError;
use crate::handler::handler_fn;
use crate::workflow::{Workflow, WorkflowMode};

/// Context variable tracking the sub-workflow nesting depth.
const NESTING_DEPTH_VAR: &str = "workflow.nesting_depth";

/// Adapter wrapping a workflow as an agent.
#[derive(Debug, Clone, Copy)]
pub struct SubWorkflowAgent;

impl SubWorkflowAgent {
    /// Wrap `workflow` as an agent named `workflow:<name>`.
    #[must_use]
    pub fn wrap(workflow: Workflow) -> Agent {
        let max_depth = workflow.config.max_nesting_depth;
        let section = WorkflowSection {
            mode: workflow.mode,
            timeout: workflow.config.timeout,
            max_iterations: (workflow.mode == WorkflowMode::Loop)
                .then_some(workflow.config.max_iterations),
        };
        let config = AgentConfig {
            name: format!("workflow:{}", workflow.name),
            workflow: Some(section),
            // The wrapper delegates everything to the inner workflow; its
            // own memory stays off.
            memory: Some(MemoryConfig {
                enabled: false,
                ..MemoryConfig::default()
            }),
            ..AgentConfig::default()
        };

        let workflow = Arc::new(workflow);
        let handler = handler_fn(move |ctx, input, _caps| {
            let workflow = Arc::clone(&workflow);
            async move {
                let depth = ctx
                    .var(NESTING_DEPTH_VAR)
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize
                    + 1;
                if depth > max_depth {
                    return Err(AgentError::workflow_invalid(format!(
                        "sub-workflow nesting depth {depth} exceeds the limit of {max_depth}"
                    ))
                    .with_detail("workflow", workflow.name.clone()));
                }
                let ctx = ctx.with_var(NESTING_DEPTH_VAR, depth as u64);

                let result = workflow.run(&ctx, input).await;
                if result.success {
                    Ok(result.final_output)
                } else {
                    let err = result.error.unwrap_or_else(|| {
                        AgentError::internal("failed sub-workflow carried no error")
                    });
                    Err(err.with_detail("workflow", workflow.name.clone()))
                }
            }
        });

        Agent {
            config: Arc::new(config),
            llm: None,
            tools: None,
            memory: None,
            handler: Some(handler),
            middleware: Arc::new(Vec::new()),
        }
    }
}

impl Workflow {
    /// Wrap this workflow as an agent so it can run as a step in another
    /// workflow.
    #[must_use]
    pub fn into_agent(self) -> Agent {
        SubWorkflowAgent::wrap(self)
    }
}
