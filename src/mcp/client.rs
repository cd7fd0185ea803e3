//! MCP client for connecting to upstream MCP servers over rmcp.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, Content, JsonObject, ResourceContents};
use rmcp::service::{Peer, RoleClient, ServiceError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use super::transport::{connect_service, MCPRunningService};
use super::upstream::{SharedClient, SharedClientFactory, UpstreamClient};
use crate::config::ServerConfig;
use crate::error::{MusterError, Result};
use crate::types::{PromptDefinition, ResourceDefinition, ToolCallResult, ToolDefinition};

/// Client for one upstream Model Context Protocol server.
#[derive(Default)]
pub struct MCPClient {
    server_name: OnceLock<String>,
    session: Mutex<Option<MCPRunningService>>,
    connected: AtomicBool,
}

impl MCPClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-running rmcp service. The handshake is handled by rmcp `serve(...)`.
    pub fn from_running_service(server_name: impl Into<String>, session: MCPRunningService) -> Self {
        Self {
            server_name: OnceLock::from(server_name.into()),
            session: Mutex::new(Some(session)),
            connected: AtomicBool::new(true),
        }
    }

    /// Clone the request handle so no lock is held while a request is in flight.
    async fn peer(&self) -> Result<Peer<RoleClient>> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.peer().clone())
            .ok_or_else(|| self.not_connected())
    }

    fn name(&self) -> &str {
        self.server_name.get().map(String::as_str).unwrap_or("unknown")
    }

    fn protocol_error(&self, message: impl Into<String>) -> MusterError {
        MusterError::Protocol {
            server: self.name().to_string(),
            message: message.into(),
        }
    }

    fn map_service_error(&self, context: &str, error: ServiceError) -> MusterError {
        let server = self.name();
        match error {
            ServiceError::McpError(error) => self.protocol_error(format!(
                "{context}: MCP error {}: {}",
                error.code.0, error.message
            )),
            ServiceError::TransportSend(error) => {
                MusterError::Transport(format!("{server}: {context}: send failed: {error}"))
            }
            ServiceError::TransportClosed => {
                self.connected.store(false, Ordering::SeqCst);
                MusterError::Transport(format!("{server}: {context}: transport closed"))
            }
            ServiceError::UnexpectedResponse => {
                self.protocol_error(format!("{context}: unexpected MCP response"))
            }
            ServiceError::Cancelled { reason } => {
                let suffix = reason
                    .as_deref()
                    .map(|r| format!(" ({r})"))
                    .unwrap_or_default();
                MusterError::Cancelled(format!("{server}: {context}{suffix}"))
            }
            ServiceError::Timeout { timeout } => MusterError::Timeout(timeout.as_millis() as u64),
            other => self.protocol_error(format!("{context}: MCP service error: {other}")),
        }
    }

    fn not_connected(&self) -> MusterError {
        MusterError::connection_failed(self.name(), "client is not connected")
    }
}

#[async_trait]
impl UpstreamClient for MCPClient {
    async fn connect(&self, config: &ServerConfig, server_name: &str) -> Result<()> {
        let _ = self.server_name.set(server_name.to_string());
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|s| !s.is_closed()) {
            return Ok(());
        }
        let session = connect_service(server_name, &config.transport).await?;
        *slot = Some(session);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };
        session
            .cancel()
            .await
            .map_err(|e| MusterError::Transport(format!("{}: disconnect failed: {e}", self.name())))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn is_healthy(&self) -> bool {
        match self.session.lock().await.as_ref() {
            Some(session) => !session.is_closed(),
            None => false,
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let session = self.peer().await?;
        let tools = match session.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => {
                session
                    .list_tools(None)
                    .await
                    .map_err(|e| self.map_service_error("list_tools", e))?
                    .tools
            }
            Err(e) => return Err(self.map_service_error("list_tools", e)),
        };
        tools.iter().map(convert).collect()
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDefinition>> {
        let session = self.peer().await?;
        let prompts = session
            .list_all_prompts()
            .await
            .map_err(|e| self.map_service_error("list_prompts", e))?;
        prompts.iter().map(convert).collect()
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>> {
        let session = self.peer().await?;
        let resources = session
            .list_all_resources()
            .await
            .map_err(|e| self.map_service_error("list_resources", e))?;
        resources.iter().map(convert).collect()
    }

    async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> Result<ToolCallResult> {
        let arguments = coerce_tool_arguments(arguments)?;
        let session = self.peer().await?;
        let result = session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| self.map_service_error("call_tool", e))?;
        map_call_result(name, result)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value> {
        let session = self.peer().await?;
        let params = serde_json::from_value(serde_json::json!({
            "name": name,
            "arguments": arguments,
        }))?;
        let result = session
            .get_prompt(params)
            .await
            .map_err(|e| self.map_service_error("get_prompt", e))?;
        Ok(serde_json::to_value(result)?)
    }

    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        let session = self.peer().await?;
        let params = serde_json::from_value(serde_json::json!({ "uri": uri }))?;
        let result = session
            .read_resource(params)
            .await
            .map_err(|e| self.map_service_error("read_resource", e))?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Factory producing unconnected [`MCPClient`]s.
pub fn mcp_client_factory() -> SharedClientFactory {
    Arc::new(|_: &str| -> SharedClient { Arc::new(MCPClient::new()) })
}

/// rmcp model -> local definition, through the shared wire format.
fn convert<S: Serialize, D: DeserializeOwned>(value: &S) -> Result<D> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                MusterError::InvalidArgument(format!("tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(MusterError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
            continue;
        }
        if let Some(resource) = item.as_resource() {
            if let ResourceContents::TextResourceContents { text, .. } = &resource.resource {
                lines.push(text.clone());
            }
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<ToolCallResult> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or_else(|| text_content.clone())
            .unwrap_or_else(|| "tool returned an error result".into());

        return Err(MusterError::ToolExecution {
            tool_name: name.to_string(),
            message,
        });
    }

    Ok(ToolCallResult {
        structured_content: result.structured_content,
        text_content,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn coerce_tool_arguments_accepts_object_and_stringified_object() {
        let from_obj = coerce_tool_arguments(json!({"path": "/tmp"}))
            .unwrap()
            .unwrap();
        assert_eq!(from_obj.get("path"), Some(&json!("/tmp")));

        let from_str = coerce_tool_arguments(json!(r#"{"path":"/etc"}"#))
            .unwrap()
            .unwrap();
        assert_eq!(from_str.get("path"), Some(&json!("/etc")));

        assert!(coerce_tool_arguments(json!("  ")).unwrap().is_none());
    }

    #[test]
    fn coerce_tool_arguments_rejects_non_object() {
        let err = coerce_tool_arguments(json!(["bad"])).unwrap_err();
        assert!(matches!(err, MusterError::InvalidArgument(_)));

        let err = coerce_tool_arguments(json!(r#"{"path":"/tmp""#)).unwrap_err();
        assert!(matches!(err, MusterError::InvalidArgument(ref m) if m.contains("valid JSON")));
    }

    #[test]
    fn rmcp_tool_converts_to_definition() {
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), json!("object"));
        let tool = rmcp::model::Tool::new("read", "read a file", schema);

        let mapped: ToolDefinition = convert(&tool).unwrap();
        assert_eq!(mapped.name, "read");
        assert_eq!(mapped.description.as_deref(), Some("read a file"));
        assert_eq!(mapped.input_schema["type"], "object");
    }

    #[tokio::test]
    async fn operations_require_a_session() {
        let client = MCPClient::new();
        assert!(!client.is_connected());
        assert!(!client.is_healthy().await);
        assert!(client.disconnect().await.is_ok());

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, MusterError::ConnectionFailed { .. }));
    }

    #[test]
    fn service_errors_map_to_categories() {
        let client = MCPClient::new();
        let err = client.map_service_error(
            "call_tool",
            ServiceError::Timeout {
                timeout: Duration::from_millis(2750),
            },
        );
        assert!(matches!(err, MusterError::Timeout(2750)));

        let err = client.map_service_error("list_tools", ServiceError::UnexpectedResponse);
        assert!(matches!(err, MusterError::Protocol { ref message, .. } if message.contains("unexpected")));

        let err = client.map_service_error(
            "call_tool",
            ServiceError::Cancelled {
                reason: Some("client cancelled".into()),
            },
        );
        assert!(matches!(err, MusterError::Cancelled(ref m) if m.contains("client cancelled")));
    }

    #[test]
    fn error_payload_becomes_tool_execution_error() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [{ "type": "text", "text": "tool failed at runtime" }],
            "structuredContent": { "code": "TOOL_FAILURE" },
            "isError": true
        }))
        .unwrap();

        let err = map_call_result("search", result).unwrap_err();
        assert!(matches!(
            err,
            MusterError::ToolExecution { ref tool_name, ref message }
            if tool_name == "search" && message.contains("TOOL_FAILURE")
        ));
    }

    #[test]
    fn text_result_is_joined() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "line one" },
                { "type": "text", "text": "line two" }
            ]
        }))
        .unwrap();
        let mapped = map_call_result("echo", result).unwrap();
        assert_eq!(mapped.text_content.as_deref(), Some("line one\nline two"));
        assert_eq!(mapped.content.len(), 2);
    }
}
