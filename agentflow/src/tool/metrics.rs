//! Execution metrics collected by the tool manager.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-tool execution statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolStats {
    /// Executions attempted (cache hits excluded).
    pub executions: u64,
    /// Successful executions.
    pub successes: u64,
    /// Failed executions.
    pub failures: u64,
    /// Mean execution latency.
    pub avg_latency: Duration,
}

/// Aggregated metrics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolMetrics {
    /// Executions attempted across all tools.
    pub total_executions: u64,
    /// Successful executions.
    pub successes: u64,
    /// Failed executions.
    pub failures: u64,
    /// Mean execution latency across all tools.
    pub avg_latency: Duration,
    /// Fraction of cache lookups that hit, in `[0, 1]`.
    pub cache_hit_rate: f64,
    /// Per-tool breakdown.
    pub per_tool: HashMap<String, ToolStats>,
}

#[derive(Debug, Default)]
struct ToolCounters {
    executions: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    executions: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    cache_lookups: u64,
    cache_hits: u64,
    per_tool: HashMap<String, ToolCounters>,
}

/// Live metrics collector; snapshots on demand.
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub(crate) fn record_execution(&self, tool: &str, success: bool, latency: Duration) {
        let mut counters = self.lock();
        counters.executions += 1;
        counters.total_latency += latency;
        if success {
            counters.successes += 1;
        } else {
            counters.failures += 1;
        }
        let per_tool = counters.per_tool.entry(tool.to_owned()).or_default();
        per_tool.executions += 1;
        per_tool.total_latency += latency;
        if success {
            per_tool.successes += 1;
        } else {
            per_tool.failures += 1;
        }
    }

    pub(crate) fn record_cache_lookup(&self, hit: bool) {
        let mut counters = self.lock();
        counters.cache_lookups += 1;
        if hit {
            counters.cache_hits += 1;
        }
    }

    pub(crate) fn snapshot(&self) -> ToolMetrics {
        let counters = self.lock();
        let avg = |total: Duration, count: u64| {
            if count == 0 {
                Duration::ZERO
            } else {
                total / u32::try_from(count).unwrap_or(u32::MAX)
            }
        };
        ToolMetrics {
            total_executions: counters.executions,
            successes: counters.successes,
            failures: counters.failures,
            avg_latency: avg(counters.total_latency, counters.executions),
            cache_hit_rate: if counters.cache_lookups == 0 {
                0.0
            } else {
                counters.cache_hits as f64 / counters.cache_lookups as f64
            },
            per_tool: counters
                .per_tool
                .iter()
                .map(|(name, c)| {
                    (
                        name.clone(),
                        ToolStats {
                            executions: c.executions,
                            successes: c.successes,
                            failures: c.failures,
                            avg_latency: avg(c.total_latency, c.executions),
                        },
                    )
                })
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
