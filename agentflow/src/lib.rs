//! Agentflow is a core orchestration engine for LLM-powered multi-agent
//! applications: agent runtime, workflow executor, streaming fabric, and
//! the capability surface handed to handlers.
//!
//! Concrete LLM providers, memory backends, and tool servers live outside
//! this crate behind the [`llm::LlmClient`], [`memory::Memory`], and
//! [`tool::ToolProvider`] contracts.
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow::prelude::*;
//!
//! let agent = Agent::builder()
//!     .name("writer")
//!     .system_prompt("You write haiku.")
//!     .llm_client(client)
//!     .build()
//!     .await?;
//!
//! let workflow = Workflow::builder("draft-and-polish")
//!     .agent("draft", agent.clone())
//!     .agent("polish", agent)
//!     .build()?;
//!
//! let result = workflow.run(&RunContext::new(), "autumn rain").await;
//! ```

// Leaf modules
pub mod chunk;
pub mod context;
pub mod error;
pub mod llm;
pub mod retry;

// Capability surface and handler model
pub mod augment;
pub mod capabilities;
pub mod handler;

// Subsystems
pub mod agent;
pub mod memory;
pub mod stream;
pub mod tool;
pub mod workflow;

pub mod prelude;

// Re-export the everyday surface at the crate root.
pub use agent::{Agent, AgentBuilder, AgentConfig, RunOptions, RunResult};
pub use chunk::{ChunkKind, StreamChunk};
pub use context::RunContext;
pub use error::{AgentError, ErrorCode, Result};
pub use handler::Handler;
pub use stream::AgentStream;
pub use workflow::{Workflow, WorkflowMode, WorkflowResult};
