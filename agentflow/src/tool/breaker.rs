//! Per-tool circuit breaker.
//!
//! Three states:
//! - `Closed`: calls flow; `failure_threshold` consecutive failures open
//!   the circuit.
//! - `Open`: calls short-circuit with `TOOL_EXECUTE`; after `open_timeout`
//!   the next admission probe moves to `HalfOpen`.
//! - `HalfOpen`: at most `half_open_max_calls` probes in flight;
//!   `success_threshold` consecutive successes close the circuit, any
//!   failure reopens it.
//!
//! State transitions are serialized per tool by the internal mutex.

use std::sync::Mutex;

use tokio::time::Instant;
use tracing::debug;

use crate::agent::config::BreakerConfig;
use crate::error::{AgentError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { in_flight: u32, successes: u32 },
}

/// Circuit breaker guarding a single tool.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    /// Create a breaker in the `Closed` state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    /// Admit a call, or reject with a circuit-open error.
    ///
    /// Every admitted call must be matched by exactly one
    /// [`CircuitBreaker::record_success`] or
    /// [`CircuitBreaker::record_failure`].
    pub fn admit(&self, tool_name: &str) -> Result<()> {
        let mut state = self.lock();
        match *state {
            State::Closed { .. } => Ok(()),
            State::Open { since } => {
                if since.elapsed() >= self.config.open_timeout {
                    debug!(tool = tool_name, "circuit half-open");
                    *state = State::HalfOpen {
                        in_flight: 1,
                        successes: 0,
                    };
                    Ok(())
                } else {
                    Err(Self::open_error(tool_name))
                }
            }
            State::HalfOpen {
                ref mut in_flight, ..
            } => {
                if *in_flight < self.config.half_open_max_calls {
                    *in_flight += 1;
                    Ok(())
                } else {
                    Err(Self::open_error(tool_name))
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.lock();
        match *state {
            State::Closed { ref mut failures } => *failures = 0,
            State::HalfOpen {
                ref mut in_flight,
                ref mut successes,
            } => {
                *in_flight = in_flight.saturating_sub(1);
                *successes += 1;
                if *successes >= self.config.success_threshold {
                    *state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        match *state {
            State::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.config.failure_threshold {
                    *state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                *state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Record an admitted call that was abandoned (caller cancellation):
    /// releases a half-open probe slot without counting either way.
    pub fn record_abandoned(&self) {
        let mut state = self.lock();
        if let State::HalfOpen {
            ref mut in_flight, ..
        } = *state
        {
            *in_flight = in_flight.saturating_sub(1);
        }
    }

    /// Whether the circuit is currently open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(*self.lock(), State::Open { .. })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock means a panic mid-transition; the state itself is
        // a plain value, so continuing with it is sound.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn open_error(tool_name: &str) -> AgentError {
        AgentError::tool_execute(tool_name, format!("circuit open for tool '{tool_name}'"))
            .with_detail("circuit_open", true)
    }
}
