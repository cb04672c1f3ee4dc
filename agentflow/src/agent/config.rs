//! Agent configuration types.
//!
//! An [`AgentConfig`] is an immutable snapshot built once by the
//! [`AgentBuilder`](super::AgentBuilder); per-call overrides go through
//! [`RunOptions`](super::RunOptions). Unknown keys in configuration input
//! are rejected (`CONFIG_VALIDATION`) and partial configs are completed
//! with the documented defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::workflow::WorkflowMode;

/// Serialize durations as (fractional) seconds in configuration input.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(de)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be non-negative"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Immutable snapshot describing an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentConfig {
    /// Stable agent identifier; must be non-empty.
    pub name: String,
    /// System prompt; may be empty.
    pub system_prompt: String,
    /// LLM parameters.
    pub llm: LlmConfig,
    /// Per-run deadline (default 60s).
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Memory settings; absent means enabled with the default provider.
    pub memory: Option<MemoryConfig>,
    /// Tool settings; absent means tools disabled.
    pub tools: Option<ToolsConfig>,
    /// Present only for workflow-wrapping agents.
    pub workflow: Option<WorkflowSection>,
    /// Streaming settings.
    pub streaming: StreamingConfig,
    /// Verbose diagnostics.
    pub debug_mode: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            system_prompt: String::new(),
            llm: LlmConfig::default(),
            timeout: Duration::from_secs(60),
            memory: None,
            tools: None,
            workflow: None,
            streaming: StreamingConfig::default(),
            debug_mode: false,
        }
    }
}

impl AgentConfig {
    /// Parse a configuration value, rejecting unknown keys.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|e| AgentError::config_validation(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AgentError::config("agent name must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(AgentError::config(format!(
                "temperature {} out of range [0, 2]",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(AgentError::config("max_tokens must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(AgentError::config("timeout must be positive"));
        }
        if self.streaming.buffer_size == 0 {
            return Err(AgentError::config("streaming buffer_size must be at least 1"));
        }
        if let Some(tools) = &self.tools {
            tools.validate()?;
        }
        if let Some(memory) = &self.memory {
            memory.validate()?;
        }
        Ok(())
    }

    /// Whether memory is enabled. Absent config means enabled.
    #[must_use]
    pub fn memory_enabled(&self) -> bool {
        self.memory.as_ref().is_none_or(|m| m.enabled)
    }

    /// Whether tools are enabled.
    #[must_use]
    pub fn tools_enabled(&self) -> bool {
        self.tools.as_ref().is_some_and(|t| t.enabled)
    }
}

/// LLM parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LlmConfig {
    /// Provider tag (informational to the core).
    pub provider: String,
    /// Model tag.
    pub model: String,
    /// Sampling temperature in `[0, 2]`.
    pub temperature: f32,
    /// Output token cap, at least 1.
    pub max_tokens: u32,
    /// Provider endpoint override.
    pub base_url: Option<String>,
    /// Reference to an externally managed credential.
    pub api_key_ref: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            model: String::new(),
            temperature: 0.7,
            max_tokens: 2048,
            base_url: None,
            api_key_ref: None,
        }
    }
}

/// Memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MemoryConfig {
    /// Whether memory is enabled.
    pub enabled: bool,
    /// Provider tag.
    pub provider: String,
    /// Provider connection string.
    pub connection: Option<String>,
    /// Retrieval-context assembly settings.
    pub rag: RagConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "in_memory".to_owned(),
            connection: None,
            rag: RagConfig::default(),
        }
    }
}

impl MemoryConfig {
    fn validate(&self) -> Result<()> {
        self.rag.validate()
    }
}

/// Retrieval-context assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RagConfig {
    /// Token budget for the assembled context.
    pub max_tokens: usize,
    /// Relative weight of personal memory.
    pub personal_weight: f64,
    /// Relative weight of knowledge-base hits.
    pub knowledge_weight: f64,
    /// Chat-history window size.
    pub history_limit: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            personal_weight: 0.3,
            knowledge_weight: 0.7,
            history_limit: 10,
        }
    }
}

impl RagConfig {
    fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(AgentError::config("rag max_tokens must be at least 1"));
        }
        if self.personal_weight < 0.0 || self.knowledge_weight < 0.0 {
            return Err(AgentError::config("rag weights must be non-negative"));
        }
        if self.personal_weight + self.knowledge_weight <= 0.0 {
            return Err(AgentError::config("rag weights must not both be zero"));
        }
        if self.history_limit == 0 {
            return Err(AgentError::config("history_limit must be at least 1"));
        }
        Ok(())
    }
}

/// Tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ToolsConfig {
    /// Whether tools are enabled.
    pub enabled: bool,
    /// Retry budget used by tool-augmented handlers.
    pub max_retries: u32,
    /// Per-execution deadline.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Concurrency cap across tool executions.
    pub max_concurrent: usize,
    /// Result cache settings.
    pub cache: CacheConfig,
    /// Circuit-breaker thresholds.
    pub circuit_breaker: BreakerConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            timeout: Duration::from_secs(30),
            max_concurrent: 4,
            cache: CacheConfig::default(),
            circuit_breaker: BreakerConfig::default(),
        }
    }
}

impl ToolsConfig {
    fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(AgentError::config("tool timeout must be positive"));
        }
        if self.max_concurrent == 0 {
            return Err(AgentError::config("max_concurrent must be at least 1"));
        }
        self.cache.validate()?;
        self.circuit_breaker.validate()
    }
}

/// Cache eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Evict the least recently used entry.
    #[default]
    Lru,
    /// Evict the oldest entry.
    Fifo,
}

/// Tool result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    /// Whether caching is enabled.
    pub enabled: bool,
    /// Time to live per entry.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Maximum number of entries.
    pub max_size: usize,
    /// Eviction policy at capacity.
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 1000,
            eviction: EvictionPolicy::Lru,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.max_size == 0 {
            return Err(AgentError::config("cache max_size must be at least 1"));
        }
        Ok(())
    }
}

/// Circuit-breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it.
    pub success_threshold: u32,
    /// Time the circuit stays open before probing.
    #[serde(with = "duration_secs")]
    pub open_timeout: Duration,
    /// Probes admitted concurrently while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 2,
        }
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 || self.success_threshold == 0 {
            return Err(AgentError::config("breaker thresholds must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(AgentError::config("half_open_max_calls must be at least 1"));
        }
        Ok(())
    }
}

/// Streaming settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StreamingConfig {
    /// Chunk channel capacity, at least 1.
    pub buffer_size: usize,
    /// Delta coalescing window; zero disables batching.
    #[serde(with = "duration_secs")]
    pub flush_interval: Duration,
    /// Drop non-textual chunk kinds at the source.
    pub text_only: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64,
            flush_interval: Duration::from_millis(50),
            text_only: false,
        }
    }
}

/// Workflow settings carried by workflow-wrapping agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkflowSection {
    /// Execution mode.
    pub mode: WorkflowMode,
    /// Whole-workflow deadline.
    #[serde(default, with = "option_duration_secs")]
    pub timeout: Option<Duration>,
    /// Iteration cap, Loop mode only.
    pub max_iterations: Option<usize>,
}

/// Serde helper for optional durations-as-seconds.
mod option_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => ser.serialize_some(&d.as_secs_f64()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(de)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(_) => Err(serde::de::Error::custom("duration must be non-negative")),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn named() -> AgentConfig {
        AgentConfig {
            name: "assistant".to_owned(),
            ..AgentConfig::default()
        }
    }

    mod defaults {
        use super::*;

        #[test]
        fn documented_defaults() {
            let config = AgentConfig::default();
            assert_eq!(config.timeout, Duration::from_secs(60));
            assert_eq!(config.streaming.buffer_size, 64);
            assert_eq!(config.streaming.flush_interval, Duration::from_millis(50));
            assert!(config.memory_enabled());
            assert!(!config.tools_enabled());

            let tools = ToolsConfig::default();
            assert_eq!(tools.max_concurrent, 4);
            assert_eq!(tools.circuit_breaker.failure_threshold, 5);
            assert_eq!(tools.cache.ttl, Duration::from_secs(300));

            let rag = RagConfig::default();
            assert_eq!(rag.history_limit, 10);
            assert!((rag.personal_weight - 0.3).abs() < f64::EPSILON);
        }

        #[test]
        fn absent_memory_config_means_enabled() {
            let config = named();
            assert!(config.memory.is_none());
            assert!(config.memory_enabled());

            let disabled = AgentConfig {
                memory: Some(MemoryConfig {
                    enabled: false,
                    ..MemoryConfig::default()
                }),
                ..named()
            };
            assert!(!disabled.memory_enabled());
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn accepts_valid_config() {
            assert!(named().validate().is_ok());
        }

        #[test]
        fn rejects_empty_name() {
            let err = AgentConfig::default().validate().unwrap_err();
            assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        }

        #[test]
        fn rejects_out_of_range_temperature() {
            let mut config = named();
            config.llm.temperature = 2.5;
            assert!(config.validate().is_err());
            config.llm.temperature = -0.1;
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_zero_max_tokens() {
            let mut config = named();
            config.llm.max_tokens = 0;
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_zero_buffer_size() {
            let mut config = named();
            config.streaming.buffer_size = 0;
            assert!(config.validate().is_err());
        }

        #[test]
        fn rejects_zero_weights() {
            let mut config = named();
            config.memory = Some(MemoryConfig {
                rag: RagConfig {
                    personal_weight: 0.0,
                    knowledge_weight: 0.0,
                    ..RagConfig::default()
                },
                ..MemoryConfig::default()
            });
            assert!(config.validate().is_err());
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn partial_config_completed_with_defaults() {
            let config = AgentConfig::from_value(json!({
                "name": "helper",
                "llm": { "provider": "test", "model": "m1" }
            }))
            .unwrap();
            assert_eq!(config.name, "helper");
            assert_eq!(config.llm.temperature, 0.7);
            assert_eq!(config.timeout, Duration::from_secs(60));
        }

        #[test]
        fn unknown_keys_rejected() {
            let err = AgentConfig::from_value(json!({
                "name": "helper",
                "definitely_not_a_key": true
            }))
            .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ConfigValidation);
            assert!(err.message().contains("definitely_not_a_key"));
        }

        #[test]
        fn unknown_nested_keys_rejected() {
            let err = AgentConfig::from_value(json!({
                "name": "helper",
                "tools": { "enabled": true, "bogus": 1 }
            }))
            .unwrap_err();
            assert_eq!(err.code(), ErrorCode::ConfigValidation);
        }

        #[test]
        fn durations_parse_as_seconds() {
            let config = AgentConfig::from_value(json!({
                "name": "helper",
                "timeout": 2.5,
                "tools": { "timeout": 10 }
            }))
            .unwrap();
            assert_eq!(config.timeout, Duration::from_millis(2500));
            assert_eq!(config.tools.unwrap().timeout, Duration::from_secs(10));
        }

        #[test]
        fn roundtrips_through_serde() {
            let config = AgentConfig {
                tools: Some(ToolsConfig::default()),
                memory: Some(MemoryConfig::default()),
                workflow: Some(WorkflowSection {
                    timeout: Some(Duration::from_secs(5)),
                    max_iterations: Some(3),
                    ..WorkflowSection::default()
                }),
                ..named()
            };
            let value = serde_json::to_value(&config).unwrap();
            let parsed = AgentConfig::from_value(value).unwrap();
            assert_eq!(parsed.name, config.name);
            assert_eq!(parsed.workflow.unwrap().max_iterations, Some(3));
        }
    }
}
