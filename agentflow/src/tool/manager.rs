//! The tool manager: registry, discovery, and the mediated execute pipeline.
//!
//! Execution order: registry lookup, argument validation, cache probe,
//! concurrency gate, circuit-breaker admission, timeout-wrapped execution,
//! then breaker/metrics/cache bookkeeping. The cache is probed before the
//! breaker so cached results stay served while a circuit is open; failures
//! are never cached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::breaker::CircuitBreaker;
use super::cache::ToolCache;
use super::metrics::{MetricsCollector, ToolMetrics};
use super::validate::validate_args;
use super::{BoxedTool, HealthReport, ProviderHealth, ToolEntry, ToolInfo, ToolProvider, ToolResult};
use crate::agent::config::ToolsConfig;
use crate::context::RunContext;
use crate::error::{AgentError, ErrorCode, Result};

/// Mediates every tool execution for the agents that share it.
pub struct ToolManager {
    config: ToolsConfig,
    tools: RwLock<HashMap<String, ToolEntry>>,
    providers: Vec<Arc<dyn ToolProvider>>,
    semaphore: Arc<Semaphore>,
    cache: ToolCache,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManager")
            .field("tools", &self.available())
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

impl ToolManager {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> ToolManagerBuilder {
        ToolManagerBuilder::default()
    }

    /// The manager's configuration.
    #[must_use]
    pub const fn config(&self) -> &ToolsConfig {
        &self.config
    }

    /// Execute a tool through the full mediation pipeline.
    pub async fn execute(&self, ctx: &RunContext, name: &str, args: Value) -> Result<ToolResult> {
        ctx.check()?;

        let entry = self
            .lookup(name)
            .ok_or_else(|| AgentError::tool_not_found(name))?;
        validate_args(name, &entry.parameters(), &args)?;

        let cache_key = self.cache.enabled().then(|| ToolCache::key(name, &args));
        if let Some(key) = &cache_key {
            let hit = self.cache.get(key);
            self.metrics.record_cache_lookup(hit.is_some());
            if let Some(result) = hit {
                debug!(tool = name, "tool cache hit");
                return Ok(result);
            }
        }

        // Concurrency gate; waiters honor the context.
        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => {
                permit.map_err(|_| AgentError::internal("tool semaphore closed"))?
            }
            err = ctx.done() => return Err(err),
        };

        let breaker = self.breaker(name);
        breaker.admit(name)?;

        let timeout = self.config.timeout;
        let tool_ctx = ctx.with_timeout(timeout);
        let started = Instant::now();
        let outcome = tokio::select! {
            res = entry.execute(&tool_ctx, name, args) => res,
            err = tool_ctx.done() => Err(match err.code() {
                ErrorCode::Timeout => AgentError::tool_timeout(name, timeout),
                _ => err,
            }),
        };
        let duration = started.elapsed();

        match outcome {
            Ok(content) => {
                breaker.record_success();
                self.metrics.record_execution(name, true, duration);
                let result = ToolResult::ok(content, duration);
                if let Some(key) = cache_key {
                    self.cache.insert(key, result.clone());
                }
                Ok(result)
            }
            Err(err) if err.code() == ErrorCode::Cancelled => {
                // Caller cancellation is not a tool failure.
                breaker.record_abandoned();
                Err(err)
            }
            Err(err) => {
                breaker.record_failure();
                self.metrics.record_execution(name, false, duration);
                warn!(tool = name, code = err.code().as_str(), "tool execution failed");
                Err(err.with_detail("tool_name", name))
            }
        }
    }

    /// Snapshot of all registered tool descriptors, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .read_tools()
            .values()
            .map(ToolEntry::info)
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_tools().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.read_tools().contains_key(name)
    }

    /// Probe provider health. Never errors; failures are reported as
    /// unhealthy entries.
    pub async fn health_check(&self, ctx: &RunContext) -> HealthReport {
        let mut report = HealthReport::new();
        let local_count = self
            .read_tools()
            .values()
            .filter(|e| matches!(e, ToolEntry::Local(_)))
            .count();
        if local_count > 0 {
            report.insert(
                "local".to_owned(),
                ProviderHealth {
                    healthy: true,
                    response_time: std::time::Duration::ZERO,
                    tool_count: local_count,
                    error: None,
                },
            );
        }
        for provider in &self.providers {
            let health = provider.health_check(ctx).await;
            report.insert(provider.name().to_owned(), health);
        }
        report
    }

    /// Aggregated execution metrics.
    #[must_use]
    pub fn metrics(&self) -> ToolMetrics {
        self.metrics.snapshot()
    }

    /// Re-run provider discovery, replacing remote registry entries.
    ///
    /// On a discovery failure the registry is left unchanged.
    pub async fn refresh(&self, ctx: &RunContext) -> Result<()> {
        let mut discovered: Vec<(Arc<dyn ToolProvider>, Vec<ToolInfo>)> = Vec::new();
        for provider in &self.providers {
            let infos = provider.discover(ctx).await.map_err(|e| {
                e.with_detail("provider", provider.name())
            })?;
            discovered.push((Arc::clone(provider), infos));
        }

        let mut tools = self
            .tools
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tools.retain(|_, entry| matches!(entry, ToolEntry::Local(_)));
        for (provider, infos) in discovered {
            for info in infos {
                tools.insert(
                    info.name.clone(),
                    ToolEntry::Remote {
                        provider: Arc::clone(&provider),
                        info,
                    },
                );
            }
        }
        debug!(count = tools.len(), "tool registry refreshed");
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<ToolEntry> {
        self.read_tools().get(name).cloned()
    }

    fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.circuit_breaker.clone())))
            .clone()
    }

    fn read_tools(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ToolEntry>> {
        self.tools
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Builder for [`ToolManager`].
#[derive(Default)]
pub struct ToolManagerBuilder {
    config: ToolsConfig,
    tools: Vec<BoxedTool>,
    providers: Vec<Arc<dyn ToolProvider>>,
}

impl std::fmt::Debug for ToolManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolManagerBuilder")
            .field("tools", &self.tools.len())
            .field("providers", &self.providers.len())
            .finish_non_exhaustive()
    }
}

impl ToolManagerBuilder {
    /// Set the manager configuration.
    #[must_use]
    pub fn config(mut self, config: ToolsConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a local tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register several local tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = BoxedTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Register a tool provider; its tools are discovered at build time.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the manager, running provider discovery.
    pub async fn build(self, ctx: &RunContext) -> Result<ToolManager> {
        let mut tools = HashMap::new();
        for tool in self.tools {
            let name = tool.name().to_owned();
            if tools.insert(name.clone(), ToolEntry::Local(tool)).is_some() {
                return Err(AgentError::config(format!(
                    "duplicate tool name '{name}'"
                )));
            }
        }

        let manager = ToolManager {
            semaphore: Arc::new(Semaphore::new(self.config.max_concurrent.max(1))),
            cache: ToolCache::new(self.config.cache.clone()),
            breakers: DashMap::new(),
            metrics: MetricsCollector::default(),
            tools: RwLock::new(tools),
            providers: self.providers,
            config: self.config,
        };
        manager.refresh(ctx).await?;
        Ok(manager)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::agent::config::BreakerConfig;
    use crate::tool::Tool;

    /// Echoes its `text` argument.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes back the input text."
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, _ctx: &RunContext, args: Value) -> Result<Value> {
            Ok(args["text"].clone())
        }
    }

    /// Fails a configurable number of times before succeeding.
    struct FlakyTool {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _ctx: &RunContext, _args: Value) -> Result<Value> {
            if self.failures_left.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                Err(AgentError::tool_execute("flaky", "transient failure"))
            } else {
                Ok(json!("recovered"))
            }
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        async fn execute(&self, ctx: &RunContext, _args: Value) -> Result<Value> {
            ctx.wrap(async {
                tokio::time::sleep(Duration::from_secs(300)).await;
                Ok(json!("late"))
            })
            .await
        }
    }

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "counting"
        }

        async fn execute(&self, _ctx: &RunContext, _args: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("counted"))
        }
    }

    async fn manager_with(config: ToolsConfig, tools: Vec<BoxedTool>) -> ToolManager {
        ToolManager::builder()
            .config(config)
            .tools(tools)
            .build(&RunContext::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn executes_registered_tool() {
        let manager = manager_with(ToolsConfig::default(), vec![Arc::new(EchoTool)]).await;
        let result = manager
            .execute(&RunContext::new(), "echo", json!({ "text": "hi" }))
            .await
            .unwrap();
        assert!(result.success);
        assert!(!result.cache_hit);
        assert_eq!(result.content, json!("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let manager = manager_with(ToolsConfig::default(), vec![Arc::new(EchoTool)]).await;
        let err = manager
            .execute(&RunContext::new(), "missing", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn invalid_args_rejected_before_execution() {
        let manager = manager_with(ToolsConfig::default(), vec![Arc::new(EchoTool)]).await;
        let err = manager
            .execute(&RunContext::new(), "echo", json!({ "text": 42 }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolInvalidArgs);
        assert_eq!(manager.metrics().total_executions, 0);
    }

    #[tokio::test]
    async fn cache_serves_repeat_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = manager_with(
            ToolsConfig::default(),
            vec![Arc::new(CountingTool {
                calls: calls.clone(),
            })],
        )
        .await;
        let ctx = RunContext::new();

        let first = manager.execute(&ctx, "counting", json!({})).await.unwrap();
        assert!(!first.cache_hit);
        let second = manager.execute(&ctx, "counting", json!({})).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let metrics = manager.metrics();
        assert_eq!(metrics.total_executions, 1);
        assert!(metrics.cache_hit_rate > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_tool_timeout() {
        let config = ToolsConfig {
            timeout: Duration::from_millis(20),
            ..ToolsConfig::default()
        };
        let manager = manager_with(config, vec![Arc::new(SlowTool)]).await;
        let err = manager
            .execute(&RunContext::new(), "slow", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_then_half_opens() {
        let config = ToolsConfig {
            circuit_breaker: BreakerConfig {
                failure_threshold: 3,
                success_threshold: 1,
                open_timeout: Duration::from_millis(50),
                half_open_max_calls: 1,
            },
            cache: crate::agent::config::CacheConfig {
                enabled: false,
                ..Default::default()
            },
            ..ToolsConfig::default()
        };
        let manager = manager_with(
            config,
            vec![Arc::new(FlakyTool {
                failures_left: AtomicU32::new(3),
            })],
        )
        .await;
        let ctx = RunContext::new();

        for _ in 0..3 {
            let err = manager.execute(&ctx, "flaky", json!({})).await.unwrap_err();
            assert_eq!(err.code(), ErrorCode::ToolExecute);
        }

        // Fourth call short-circuits without reaching the tool.
        let err = manager.execute(&ctx, "flaky", json!({})).await.unwrap_err();
        assert_eq!(err.detail("circuit_open"), Some(&true.into()));

        // After the open timeout a probe is admitted and succeeds.
        tokio::time::advance(Duration::from_millis(60)).await;
        let result = manager.execute(&ctx, "flaky", json!({})).await.unwrap();
        assert_eq!(result.content, json!("recovered"));

        // Circuit closed again.
        let result = manager.execute(&ctx, "flaky", json!({})).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn registry_snapshots() {
        let manager = manager_with(ToolsConfig::default(), vec![Arc::new(EchoTool)]).await;
        assert_eq!(manager.available(), vec!["echo".to_owned()]);
        assert!(manager.is_available("echo"));
        assert!(!manager.is_available("nope"));
        let infos = manager.list();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "echo");
        assert!(!infos[0].description.is_empty());
    }

    #[tokio::test]
    async fn duplicate_tool_names_rejected() {
        let err = ToolManager::builder()
            .tool(Arc::new(EchoTool))
            .tool(Arc::new(EchoTool))
            .build(&RunContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
    }

    mod providers {
        use super::*;

        struct StaticProvider {
            healthy: bool,
        }

        #[async_trait]
        impl ToolProvider for StaticProvider {
            fn name(&self) -> &str {
                "static"
            }

            async fn discover(&self, _ctx: &RunContext) -> Result<Vec<ToolInfo>> {
                Ok(vec![ToolInfo::new(
                    "remote_upper",
                    "Uppercases text.",
                    json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }),
                )])
            }

            async fn execute(&self, _ctx: &RunContext, name: &str, args: Value) -> Result<Value> {
                match name {
                    "remote_upper" => Ok(json!(
                        args["text"].as_str().unwrap_or_default().to_uppercase()
                    )),
                    other => Err(AgentError::tool_not_found(other)),
                }
            }

            async fn health_check(&self, _ctx: &RunContext) -> ProviderHealth {
                ProviderHealth {
                    healthy: self.healthy,
                    response_time: Duration::from_millis(1),
                    tool_count: 1,
                    error: (!self.healthy).then(|| "connection refused".to_owned()),
                }
            }
        }

        #[tokio::test]
        async fn discovery_registers_remote_tools() {
            let manager = ToolManager::builder()
                .tool(Arc::new(EchoTool))
                .provider(Arc::new(StaticProvider { healthy: true }))
                .build(&RunContext::new())
                .await
                .unwrap();

            assert!(manager.is_available("remote_upper"));
            let result = manager
                .execute(&RunContext::new(), "remote_upper", json!({ "text": "abc" }))
                .await
                .unwrap();
            assert_eq!(result.content, json!("ABC"));
        }

        #[tokio::test]
        async fn health_check_reports_all_providers() {
            let manager = ToolManager::builder()
                .tool(Arc::new(EchoTool))
                .provider(Arc::new(StaticProvider { healthy: false }))
                .build(&RunContext::new())
                .await
                .unwrap();

            let report = manager.health_check(&RunContext::new()).await;
            assert!(report["local"].healthy);
            assert_eq!(report["local"].tool_count, 1);
            assert!(!report["static"].healthy);
            assert!(report["static"].error.is_some());
        }

        #[tokio::test]
        async fn refresh_rebuilds_remote_entries() {
            let manager = ToolManager::builder()
                .provider(Arc::new(StaticProvider { healthy: true }))
                .build(&RunContext::new())
                .await
                .unwrap();
            assert!(manager.is_available("remote_upper"));

            manager.refresh(&RunContext::new()).await.unwrap();
            assert!(manager.is_available("remote_upper"));
            assert_eq!(manager.available().len(), 1);
        }
    }
}
