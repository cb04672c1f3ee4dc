//! TTL result cache for tool executions.
//!
//! Keys are `tool_name` plus a canonical rendering of the arguments (object
//! keys sorted recursively), so logically equal calls hit the same entry.
//! Reads and writes are linearizable per key via the underlying `DashMap`
//! shard locks.

use std::fmt::Write as _;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use super::ToolResult;
use crate::agent::config::{CacheConfig, EvictionPolicy};

#[derive(Debug, Clone)]
struct CacheSlot {
    result: ToolResult,
    inserted: Instant,
    last_access: Instant,
}

/// Per-manager tool result cache.
#[derive(Debug)]
pub(crate) struct ToolCache {
    config: CacheConfig,
    entries: DashMap<String, CacheSlot>,
}

impl ToolCache {
    pub(crate) fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub(crate) const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Stable cache key for `(name, args)`.
    pub(crate) fn key(name: &str, args: &Value) -> String {
        let mut key = String::with_capacity(name.len() + 16);
        key.push_str(name);
        key.push(':');
        canonical(args, &mut key);
        key
    }

    /// Fetch a live entry, marking it as a cache hit.
    pub(crate) fn get(&self, key: &str) -> Option<ToolResult> {
        let mut slot = self.entries.get_mut(key)?;
        if slot.inserted.elapsed() > self.config.ttl {
            drop(slot);
            self.entries.remove(key);
            return None;
        }
        slot.last_access = Instant::now();
        let mut result = slot.result.clone();
        result.cache_hit = true;
        Some(result)
    }

    /// Store a successful result, evicting one entry when at capacity.
    pub(crate) fn insert(&self, key: String, result: ToolResult) {
        if self.entries.len() >= self.config.max_size && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheSlot {
                result,
                inserted: now,
                last_access: now,
            },
        );
    }

    fn evict_one(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|slot| match self.config.eviction {
                EvictionPolicy::Lru => slot.last_access,
                EvictionPolicy::Fifo => slot.inserted,
            })
            .map(|slot| slot.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Render a value with object keys sorted, recursively.
fn canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key:?}:");
                canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonical(item, out);
            }
            out.push(']');
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}
