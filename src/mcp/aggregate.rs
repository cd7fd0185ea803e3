//! Multi-server MCP aggregation with namespaced routing.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use super::upstream::{SharedClient, SharedClientFactory};
use crate::config::{AggregatorConfig, ConflictResolution, ConnectionMode};
use crate::connection::{
    create_connection_strategy, ConnectionStatistics, PoolContext, SharedStrategy,
    StrategyDependencies, TemporaryStrategyOptions,
};
use crate::error::{MusterError, Result};
use crate::mapping::{
    MapStatistics, NamespacedPrompt, NamespacedResource, NamespacedTool, Registration,
    RemovalSummary, ResourceMaps,
};
use crate::types::{PromptDefinition, ResourceDefinition, ToolCallResult, ToolDefinition};
use crate::util::timeout::with_deadline;

/// What one discovery pass registered for a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryReport {
    pub server: String,
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
    /// Entries dropped by the first-wins policy.
    pub skipped: usize,
}

/// Outcome of [`McpAggregator::start`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartReport {
    pub discovered: Vec<DiscoveryReport>,
    /// Lenient servers that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorStatistics {
    pub maps: MapStatistics,
    pub connections: ConnectionStatistics,
}

/// Aggregates many upstream servers behind one namespace.
pub struct McpAggregator {
    config: AggregatorConfig,
    strategy: SharedStrategy,
    maps: ResourceMaps,
}

impl McpAggregator {
    pub fn new(config: AggregatorConfig, strategy: SharedStrategy) -> Self {
        Self {
            config,
            strategy,
            maps: ResourceMaps::new(),
        }
    }

    /// Build the strategy named by `config.connection_strategy` over `factory`.
    pub fn from_config(config: AggregatorConfig, factory: SharedClientFactory) -> Result<Self> {
        config.validate()?;
        let retry = config
            .retry
            .as_ref()
            .map(|settings| settings.to_retry_config())
            .transpose()?;
        let dependencies = StrategyDependencies::new(factory)
            .with_pool_context(PoolContext {
                retry: retry.clone(),
            })
            .with_temporary_options(TemporaryStrategyOptions {
                retry,
                operation_timeout: None,
            });
        let strategy = create_connection_strategy(config.connection_strategy, dependencies);
        Ok(Self::new(config, strategy))
    }

    /// Aggregator backed by real rmcp clients.
    #[cfg(feature = "mcp")]
    pub fn with_mcp_clients(config: AggregatorConfig) -> Result<Self> {
        Self::from_config(config, super::client::mcp_client_factory())
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn maps(&self) -> &ResourceMaps {
        &self.maps
    }

    pub fn strategy(&self) -> &SharedStrategy {
        &self.strategy
    }

    /// Register the enabled servers with the strategy and discover each one.
    ///
    /// A strict server that fails aborts the start; a lenient one is reported.
    pub async fn start(&self) -> Result<StartReport> {
        let servers = self.config.enabled_servers();
        self.strategy.initialize(servers.clone()).await?;

        let mut names: Vec<&String> = servers.keys().collect();
        names.sort();

        let mut report = StartReport::default();
        for name in names {
            match self.discover_server(name).await {
                Ok(discovery) => report.discovered.push(discovery),
                Err(error) => match servers[name].connection_mode {
                    ConnectionMode::Strict => {
                        tracing::error!(server = %name, error = %error, "strict server failed to start");
                        return Err(error);
                    }
                    ConnectionMode::Lenient => {
                        tracing::warn!(server = %name, error = %error, "server unavailable, continuing");
                        report.failed.push((name.clone(), error.to_string()));
                    }
                },
            }
        }
        tracing::info!(
            discovered = report.discovered.len(),
            failed = report.failed.len(),
            "aggregator started"
        );
        Ok(report)
    }

    /// List everything `server_name` exposes and (re)register it.
    pub async fn discover_server(&self, server_name: &str) -> Result<DiscoveryReport> {
        let (tools, prompts, resources) = self
            .with_server(server_name, |client| async move {
                let tools = client.list_tools().await?;
                let prompts = client.list_prompts().await?;
                let resources = client.list_resources().await?;
                Ok((tools, prompts, resources))
            })
            .await?;

        self.maps.remove_server(server_name).await;
        match self.register_all(server_name, tools, prompts, resources).await {
            Ok(report) => {
                tracing::debug!(
                    server = server_name,
                    tools = report.tools,
                    prompts = report.prompts,
                    resources = report.resources,
                    skipped = report.skipped,
                    "server discovered"
                );
                Ok(report)
            }
            Err(error) => {
                self.maps.remove_server(server_name).await;
                Err(error)
            }
        }
    }

    async fn register_all(
        &self,
        server_name: &str,
        tools: Vec<ToolDefinition>,
        prompts: Vec<PromptDefinition>,
        resources: Vec<ResourceDefinition>,
    ) -> Result<DiscoveryReport> {
        let policy: ConflictResolution = self.config.conflict_resolution;
        let mut report = DiscoveryReport {
            server: server_name.to_string(),
            ..Default::default()
        };
        for tool in tools {
            match self.maps.register_tool(server_name, tool, policy).await? {
                Registration::Added(_) => report.tools += 1,
                Registration::Skipped { .. } => report.skipped += 1,
            }
        }
        for prompt in prompts {
            match self.maps.register_prompt(server_name, prompt, policy).await? {
                Registration::Added(_) => report.prompts += 1,
                Registration::Skipped { .. } => report.skipped += 1,
            }
        }
        for resource in resources {
            match self
                .maps
                .register_resource(server_name, resource, policy)
                .await?
            {
                Registration::Added(_) => report.resources += 1,
                Registration::Skipped { .. } => report.skipped += 1,
            }
        }
        Ok(report)
    }

    /// Forget everything `server_name` registered.
    pub async fn remove_server(&self, server_name: &str) -> RemovalSummary {
        self.maps.remove_server(server_name).await
    }

    /// Call a tool by qualified name or unique bare name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult> {
        let record = self
            .maps
            .get_tool(name)
            .await
            .ok_or_else(|| MusterError::NotFound(format!("tool '{name}'")))?;
        let original = record.original_name.clone();
        self.with_server(&record.server_name, |client| async move {
            client.call_tool(&original, arguments).await
        })
        .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value> {
        let record = self
            .maps
            .get_prompt(name)
            .await
            .ok_or_else(|| MusterError::NotFound(format!("prompt '{name}'")))?;
        let original = record.original_name.clone();
        self.with_server(&record.server_name, |client| async move {
            client.get_prompt(&original, arguments).await
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        let record = self
            .maps
            .get_resource(uri)
            .await
            .ok_or_else(|| MusterError::NotFound(format!("resource '{uri}'")))?;
        let original = record.original_uri.clone();
        self.with_server(&record.server_name, |client| async move {
            client.read_resource(&original).await
        })
        .await
    }

    pub async fn list_tools(&self) -> Vec<Arc<NamespacedTool>> {
        self.maps.tools().records().await
    }

    pub async fn list_prompts(&self) -> Vec<Arc<NamespacedPrompt>> {
        self.maps.prompts().records().await
    }

    pub async fn list_resources(&self) -> Vec<Arc<NamespacedResource>> {
        self.maps.resources().records().await
    }

    pub async fn statistics(&self) -> AggregatorStatistics {
        let (maps, connections) = tokio::join!(self.maps.statistics(), self.strategy.statistics());
        AggregatorStatistics { maps, connections }
    }

    /// Shut the strategy down and drop every registration.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.strategy.shutdown().await;
        self.maps.clear().await;
        tracing::info!("aggregator shut down");
        result
    }

    /// Lease a connection, run `operation`, release.
    ///
    /// The aggregate timeout covers acquiring the connection (retries included)
    /// and the operation together.
    async fn with_server<F, Fut, T>(&self, server_name: &str, operation: F) -> Result<T>
    where
        F: FnOnce(SharedClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = self.config.timeout_duration();
        let deadline = tokio::time::Instant::now() + budget;
        let connection =
            with_deadline(deadline, budget, self.strategy.get_connection(server_name)).await?;
        let client = Arc::clone(connection.client());
        let outcome = with_deadline(deadline, budget, operation(client)).await;
        if let Err(error) = self
            .strategy
            .release_connection(server_name, Some(connection))
            .await
        {
            tracing::warn!(server = server_name, error = %error, "release failed");
        }
        outcome
    }
}
