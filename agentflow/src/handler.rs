//! Handler model and augmentation combinators.
//!
//! A [`Handler`] is the unit of agent logic:
//! `(ctx, input, capabilities) -> output`. The combinators here are pure
//! functions over handlers; they compose freely, and the degenerate forms
//! collapse to the bare handler: a single-element chain, a single-attempt
//! retry, and a fallback whose primary never fails all behave exactly like
//! the handler they wrap.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::capabilities::Capabilities;
use crate::context::RunContext;
use crate::error::Result;
use crate::retry::RetryPolicy;

/// Boxed future returned by handler invocations.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// An agent handler: `(ctx, input, capabilities) -> output`.
///
/// Handlers borrow the capability bundle for the duration of one call and
/// must not retain it past return.
pub type Handler = Arc<dyn Fn(RunContext, String, Capabilities) -> HandlerFuture + Send + Sync>;

/// Lift an async closure into a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(RunContext, String, Capabilities) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String>> + Send + 'static,
{
    Arc::new(move |ctx, input, caps| Box::pin(f(ctx, input, caps)))
}

/// Run handlers in sequence, feeding each output as the next input.
/// Short-circuits on the first error.
#[must_use]
pub fn chain(handlers: Vec<Handler>) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let handlers = handlers.clone();
        async move {
            let mut current = input;
            for handler in &handlers {
                current = handler(ctx.clone(), current, caps.clone()).await?;
            }
            Ok(current)
        }
    })
}

/// Run handlers concurrently on the same input, concatenating outputs with
/// `separator` in declaration order. The first error (by declaration
/// order) propagates.
#[must_use]
pub fn parallel(separator: impl Into<String>, handlers: Vec<Handler>) -> Handler {
    let separator = separator.into();
    handler_fn(move |ctx, input, caps| {
        let handlers = handlers.clone();
        let separator = separator.clone();
        async move {
            let calls = handlers
                .iter()
                .map(|handler| handler(ctx.clone(), input.clone(), caps.clone()));
            let results = futures::future::join_all(calls).await;
            let mut outputs = Vec::with_capacity(results.len());
            for result in results {
                outputs.push(result?);
            }
            Ok(outputs.join(&separator))
        }
    })
}

/// Run `handler` only when the predicate accepts the input; otherwise fall
/// through with an empty output.
#[must_use]
pub fn conditional<P>(predicate: P, handler: Handler) -> Handler
where
    P: Fn(&RunContext, &str) -> bool + Send + Sync + 'static,
{
    let predicate = Arc::new(predicate);
    handler_fn(move |ctx, input, caps| {
        let predicate = Arc::clone(&predicate);
        let handler = Arc::clone(&handler);
        async move {
            if predicate(&ctx, &input) {
                handler(ctx, input, caps).await
            } else {
                Ok(String::new())
            }
        }
    })
}

/// Run `primary`; on a non-fatal error or empty output, run `secondary`.
/// Fatal errors from `primary` propagate unchanged.
#[must_use]
pub fn fallback(primary: Handler, secondary: Handler) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let primary = Arc::clone(&primary);
        let secondary = Arc::clone(&secondary);
        async move {
            match primary(ctx.clone(), input.clone(), caps.clone()).await {
                Ok(output) if !output.is_empty() => Ok(output),
                Ok(_) => {
                    debug!("primary handler produced empty output, falling back");
                    secondary(ctx, input, caps).await
                }
                Err(err) if err.is_fatal() => Err(err),
                Err(err) => {
                    warn!(code = err.code().as_str(), "primary handler failed, falling back");
                    secondary(ctx, input, caps).await
                }
            }
        }
    })
}

/// Retry `handler` up to `max_attempts` times with exponential backoff and
/// jitter. Only retryable errors are re-issued; with `max_attempts == 1`
/// the wrapper is an exact pass-through.
#[must_use]
pub fn retry(handler: Handler, max_attempts: u32) -> Handler {
    let policy = RetryPolicy::with_max_attempts(max_attempts);
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        let policy = policy.clone();
        async move {
            policy
                .run(&ctx, |_| handler(ctx.clone(), input.clone(), caps.clone()))
                .await
        }
    })
}

/// Bound `handler` by a deadline `timeout` from invocation; expiry yields
/// `TIMEOUT`.
#[must_use]
pub fn with_timeout(handler: Handler, timeout: Duration) -> Handler {
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        async move {
            let deadline_ctx = ctx.with_timeout(timeout);
            let fut = handler(deadline_ctx.clone(), input, caps);
            deadline_ctx.wrap(fut).await
        }
    })
}

/// Emit structured events around `handler`: before, after, and on error.
#[must_use]
pub fn with_logging(handler: Handler, name: impl Into<String>) -> Handler {
    let name: Arc<str> = name.into().into();
    handler_fn(move |ctx, input, caps| {
        let handler = Arc::clone(&handler);
        let name = Arc::clone(&name);
        async move {
            debug!(handler = %name, input_len = input.len(), "handler starting");
            match handler(ctx, input, caps).await {
                Ok(output) => {
                    debug!(handler = %name, output_len = output.len(), "handler finished");
                    Ok(output)
                }
                Err(err) => {
                    warn!(handler = %name, code = err.code().as_str(), "handler failed");
                    Err(err)
                }
            }
        }
    })
}
