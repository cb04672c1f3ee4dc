//! Run-scoped context for cancellation, deadlines, and shared values.
//!
//! [`RunContext`] is the explicit handle threaded through every API that may
//! suspend. It carries a cooperative [`CancellationToken`], an optional
//! deadline, the active session identifier, a trace id, a user key/value bag,
//! and a typed extension map used for first-class key-based injection (the
//! workflow executor places its shared memory handle there).
//!
//! Contexts are cheap to clone; derivation (`with_timeout`, `with_session`,
//! `with_var`) produces a child whose cancellation also fires when the parent
//! is cancelled and whose deadline is never later than the parent's.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AgentError, Result};

/// Cancellation-carrying execution context.
#[derive(Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    trace_id: Arc<str>,
    session_id: Option<Arc<str>>,
    vars: Arc<HashMap<String, Value>>,
    ext: Arc<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RunContext {
    /// Create a root context with a fresh trace id and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            trace_id: Uuid::new_v4().to_string().into(),
            session_id: None,
            vars: Arc::new(HashMap::new()),
            ext: Arc::new(HashMap::new()),
        }
    }

    /// Derive a child context whose cancellation also fires with this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Derive a child with a deadline `timeout` from now.
    ///
    /// The effective deadline never exceeds the parent's.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child with an absolute deadline, clamped to the parent's.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        child
    }

    /// Derive a child bound to a memory session.
    #[must_use]
    pub fn with_session(&self, session_id: impl Into<String>) -> Self {
        let mut child = self.clone();
        child.session_id = Some(session_id.into().into());
        child
    }

    /// Derive a child with a user variable set.
    #[must_use]
    pub fn with_var(&self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut vars = (*self.vars).clone();
        vars.insert(key.into(), value.into());
        let mut child = self.clone();
        child.vars = Arc::new(vars);
        child
    }

    /// Derive a child with several user variables merged in.
    #[must_use]
    pub fn with_vars(&self, values: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut vars = (*self.vars).clone();
        vars.extend(values);
        let mut child = self.clone();
        child.vars = Arc::new(vars);
        child
    }

    /// Derive a child with a typed extension stored under `key`.
    #[must_use]
    pub fn with_ext(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) -> Self {
        let mut ext = (*self.ext).clone();
        ext.insert(key.into(), value);
        let mut child = self.clone();
        child.ext = Arc::new(ext);
        child
    }

    /// Fetch a typed extension stored under `key`.
    #[must_use]
    pub fn ext<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.ext
            .get(key)
            .and_then(|any| any.downcast_ref::<T>())
            .cloned()
    }

    /// The trace identifier shared by the whole derivation tree.
    #[must_use]
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The active session id, if one is bound.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// A user variable by key.
    #[must_use]
    pub fn var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// The full user variable bag.
    #[must_use]
    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    /// The absolute deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining before the deadline. `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and all children derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The raw cancellation token, for `select!` sites.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Return an error if the context is cancelled or past its deadline.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::cancelled());
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(AgentError::timeout("context deadline exceeded"));
        }
        Ok(())
    }

    /// Resolve once the context is cancelled or its deadline passes,
    /// yielding the corresponding error.
    pub async fn done(&self) -> AgentError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => AgentError::cancelled(),
                    () = tokio::time::sleep_until(deadline) => {
                        AgentError::timeout("context deadline exceeded")
                    }
                }
            }
            None => {
                self.cancel.cancelled().await;
                AgentError::cancelled()
            }
        }
    }

    /// Race a future against cancellation and the deadline.
    ///
    /// This is the suspension-point guard: wrapped operations return
    /// `CANCELLED`/`TIMEOUT` promptly even when the underlying future does
    /// not poll the context itself.
    pub async fn wrap<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        self.check()?;
        tokio::select! {
            res = fut => res,
            err = self.done() => Err(err),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("trace_id", &self.trace_id)
            .field("session_id", &self.session_id)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("vars", &self.vars.len())
            .field("ext", &self.ext.len())
            .finish()
    }
}
