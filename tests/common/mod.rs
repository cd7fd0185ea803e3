//! Shared test helpers and a scriptable upstream client.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use muster::config::ServerConfig;
use muster::error::{MusterError, Result};
use muster::mcp::{SharedClient, SharedClientFactory, UpstreamClient};
use muster::types::{PromptDefinition, ResourceDefinition, ToolCallResult, ToolDefinition};

/// How a fake server behaves.
#[derive(Debug, Clone, Default)]
pub struct ServerScript {
    pub tools: Vec<ToolDefinition>,
    pub prompts: Vec<PromptDefinition>,
    pub resources: Vec<ResourceDefinition>,
    pub connect_delay: Option<Duration>,
    /// Number of initial connect attempts that fail.
    pub failing_connects: u32,
    pub failing_disconnect: bool,
}

impl ServerScript {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names
                .iter()
                .map(|name| ToolDefinition::new(*name, format!("{name} tool")))
                .collect(),
            ..Default::default()
        }
    }
}

/// A fleet of fake servers plus counters describing what clients did.
#[derive(Default)]
pub struct MockUpstream {
    scripts: Mutex<HashMap<String, ServerScript>>,
    connect_attempts: Mutex<HashMap<String, u32>>,
    pub connects: AtomicU32,
    pub failed_connects: AtomicU32,
    pub disconnects: AtomicU32,
    calls: Mutex<Vec<(String, String, serde_json::Value)>>,
}

impl MockUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(self: &Arc<Self>, server: &str, script: ServerScript) -> Arc<Self> {
        self.scripts
            .lock()
            .unwrap()
            .insert(server.to_string(), script);
        Arc::clone(self)
    }

    pub fn factory(self: &Arc<Self>) -> SharedClientFactory {
        let upstream = Arc::clone(self);
        Arc::new(move |server: &str| -> SharedClient {
            Arc::new(MockClient {
                upstream: Arc::clone(&upstream),
                server: server.to_string(),
                connected: AtomicBool::new(false),
            })
        })
    }

    /// `(server, tool, arguments)` for every tool call, in order.
    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    fn script_for(&self, server: &str) -> Option<ServerScript> {
        self.scripts.lock().unwrap().get(server).cloned()
    }
}

struct MockClient {
    upstream: Arc<MockUpstream>,
    server: String,
    connected: AtomicBool,
}

impl MockClient {
    fn script(&self) -> Result<ServerScript> {
        self.upstream
            .script_for(&self.server)
            .ok_or_else(|| MusterError::connection_failed(&self.server, "no such server"))
    }
}

#[async_trait]
impl UpstreamClient for MockClient {
    async fn connect(&self, _config: &ServerConfig, server_name: &str) -> Result<()> {
        let script = self.script()?;
        if let Some(delay) = script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let attempt = {
            let mut attempts = self.upstream.connect_attempts.lock().unwrap();
            let entry = attempts.entry(server_name.to_string()).or_default();
            *entry += 1;
            *entry
        };
        if attempt <= script.failing_connects {
            self.upstream.failed_connects.fetch_add(1, Ordering::SeqCst);
            return Err(MusterError::connection_failed(
                server_name,
                format!("refused attempt {attempt}"),
            ));
        }
        self.upstream.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.upstream.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.script()?.failing_disconnect {
            return Err(MusterError::Transport("disconnect refused".into()));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.script()?.tools)
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDefinition>> {
        Ok(self.script()?.prompts)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>> {
        Ok(self.script()?.resources)
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallResult> {
        self.upstream.calls.lock().unwrap().push((
            self.server.clone(),
            name.to_string(),
            arguments,
        ));
        Ok(ToolCallResult {
            text_content: Some(format!("{}:{name}", self.server)),
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value> {
        Ok(json!({ "server": self.server, "prompt": name, "arguments": arguments }))
    }

    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        Ok(json!({ "server": self.server, "uri": uri }))
    }
}

/// A stdio config; the command is never spawned by the mock.
pub fn server_config() -> ServerConfig {
    ServerConfig::stdio("mock-server", Vec::new())
}

pub fn server_configs(names: &[&str]) -> HashMap<String, ServerConfig> {
    names
        .iter()
        .map(|name| (name.to_string(), server_config()))
        .collect()
}
