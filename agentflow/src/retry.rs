//! Retry with exponential backoff and jitter.
//!
//! A single backoff engine backs the `retry` handler combinator,
//! `with_llm_augmentation`, and `RunOptions::max_retries`. Only errors
//! classified *retryable* (see [`AgentError::is_retryable`]) are re-issued;
//! fatal errors short-circuit immediately.

use std::time::Duration;

use tracing::debug;

use crate::context::RunContext;
use crate::error::{AgentError, Result};

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`, applied symmetrically around the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt cap and default backoff shape.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failure is `delay_for(1)`), with jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter.clamp(0.0, 1.0);
        // Uniform jitter in [capped - spread/2, capped + spread/2].
        let jittered = capped + spread * (fastrand::f64() - 0.5);
        Duration::from_secs_f64(jittered.clamp(0.0, self.max_delay.as_secs_f64()))
    }

    /// Run `op` up to `max_attempts` times, backing off between retryable
    /// failures. The attempt number (starting at 1) is passed to `op`.
    ///
    /// Sleeps honor the context: cancellation or deadline expiry during a
    /// backoff window aborts with the corresponding error.
    pub async fn run<T, F, Fut>(&self, ctx: &RunContext, op: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err: Option<AgentError> = None;

        for attempt in 1..=attempts {
            ctx.check()?;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let delay = self.delay_for(attempt);
                    debug!(attempt, ?delay, code = err.code().as_str(), "retrying after failure");
                    last_err = Some(err);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        done = ctx.done() => return Err(done),
                    }
                }
                Err(err) => return Err(err),
            }
        }

        // Unreachable when attempts >= 1; kept for totality.
        Err(last_err.unwrap_or_else(|| AgentError::internal("retry loop exhausted")))
    }
}
