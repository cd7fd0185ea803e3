//! The client-side seam every upstream MCP server is reached through.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ServerConfig;
use crate::error::{MusterError, Result};
use crate::types::{PromptDefinition, ResourceDefinition, ToolCallResult, ToolDefinition};

/// A connection to one upstream server.
///
/// Methods take `&self` so one client can be shared across tasks behind an
/// [`Arc`]. Implementations keep their session behind interior mutability.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Open the session described by `config`.
    async fn connect(&self, config: &ServerConfig, server_name: &str) -> Result<()>;

    /// Close the session. Closing an already closed client is not an error.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Liveness check used by pools before handing a client out.
    async fn is_healthy(&self) -> bool {
        self.is_connected()
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(Vec::new())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptDefinition>> {
        Ok(Vec::new())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDefinition>> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _arguments: serde_json::Value) -> Result<ToolCallResult> {
        Err(MusterError::UnsupportedOperation(format!(
            "client cannot call tool '{name}'"
        )))
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<serde_json::Value> {
        Err(MusterError::UnsupportedOperation(format!(
            "client cannot get prompt '{name}'"
        )))
    }

    async fn read_resource(&self, uri: &str) -> Result<serde_json::Value> {
        Err(MusterError::UnsupportedOperation(format!(
            "client cannot read resource '{uri}'"
        )))
    }
}

/// Shared handle to an upstream client.
pub type SharedClient = Arc<dyn UpstreamClient>;

/// Creates fresh, unconnected clients.
pub trait ClientFactory: Send + Sync {
    fn create(&self, server_name: &str) -> SharedClient;
}

impl<F> ClientFactory for F
where
    F: Fn(&str) -> SharedClient + Send + Sync,
{
    fn create(&self, server_name: &str) -> SharedClient {
        self(server_name)
    }
}

/// Shared handle to a client factory.
pub type SharedClientFactory = Arc<dyn ClientFactory>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Minimal {
        connected: AtomicBool,
    }

    #[async_trait]
    impl UpstreamClient for Minimal {
        async fn connect(&self, _config: &ServerConfig, _server_name: &str) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn defaults_follow_connection_state_and_reject_calls() {
        let factory = |_: &str| -> SharedClient { Arc::new(Minimal::default()) };
        let client = factory.create("fs");
        assert!(!client.is_healthy().await);

        client
            .connect(&ServerConfig::stdio("fs-server", Vec::new()), "fs")
            .await
            .unwrap();
        assert!(client.is_healthy().await);
        assert!(client.list_tools().await.unwrap().is_empty());

        let err = client
            .call_tool("read", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, MusterError::UnsupportedOperation(_)));
    }
}
