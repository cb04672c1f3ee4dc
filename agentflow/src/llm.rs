//! LLM client contract consumed by the runtime.
//!
//! Concrete providers live outside the core; they implement [`LlmClient`]
//! and map their failures into the error taxonomy (`LLM_CALL_FAILED`,
//! `LLM_TIMEOUT`, `LLM_RATE_LIMITED`, `LLM_AUTH`, `LLM_QUOTA_EXCEEDED`).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{AgentError, Result};

/// Token accounting for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub input_tokens: u32,
    /// Tokens produced by the model.
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create a usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens, input plus output.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// A synchronous completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System prompt; may be empty.
    pub system: String,
    /// User prompt.
    pub user: String,
    /// Sampling temperature, when overridden.
    pub temperature: Option<f32>,
    /// Output token cap, when overridden.
    pub max_tokens: Option<u32>,
    /// Model tag, when overridden.
    pub model: Option<String>,
}

impl CompletionRequest {
    /// Create a request from system and user prompts.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            ..Self::default()
        }
    }
}

/// A completed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Generated text.
    pub text: String,
    /// Token accounting; zeroed when the provider does not report usage.
    pub usage: TokenUsage,
}

/// A stream of incremental text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Contract between the runtime and a concrete LLM provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Synchronous completion. Must honor `ctx` cancellation.
    async fn complete(&self, ctx: &RunContext, request: CompletionRequest)
    -> Result<CompletionResponse>;

    /// Streaming completion. Providers without streaming keep the default;
    /// the runtime then degrades to a single `Content` chunk at completion.
    async fn stream(&self, ctx: &RunContext, request: CompletionRequest) -> Result<TokenStream> {
        let _ = (ctx, request);
        Err(AgentError::llm_call_failed(
            "provider does not support streaming",
        ))
    }

    /// Whether [`LlmClient::stream`] is implemented.
    fn supports_streaming(&self) -> bool {
        false
    }
}
