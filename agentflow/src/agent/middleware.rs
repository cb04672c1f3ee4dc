//! Run middleware.
//!
//! `before_run` hooks apply left-to-right and may transform the input or
//! short-circuit with an error; `after_run` hooks apply right-to-left
//! (symmetric to `before_run`) and may transform the result. Middleware
//! errors are fatal to the call and returned verbatim.

use async_trait::async_trait;

use super::result::RunResult;
use crate::context::RunContext;
use crate::error::Result;

/// Hook pair around agent runs.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Called before the handler; may transform the input.
    async fn before_run(&self, ctx: &RunContext, input: String) -> Result<String> {
        let _ = ctx;
        Ok(input)
    }

    /// Called after the handler; may transform the result.
    async fn after_run(&self, ctx: &RunContext, result: RunResult) -> Result<RunResult> {
        let _ = ctx;
        Ok(result)
    }
}
