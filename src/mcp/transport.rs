//! Opening rmcp sessions for each configured transport.

use std::collections::HashMap;

use rmcp::model::ClientInfo;
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceExt};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::process::Command;

use crate::config::TransportConfig;
use crate::error::{MusterError, Result};

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type MCPRunningService = RunningService<RoleClient, DynClientService>;

/// Spawn or dial the server described by `transport` and run the MCP handshake.
pub async fn connect_service(
    server_name: &str,
    transport: &TransportConfig,
) -> Result<MCPRunningService> {
    match transport {
        TransportConfig::Stdio { command, args, env } => {
            let mut cmd = Command::new(command);
            cmd.args(args).envs(env.iter()).kill_on_drop(true);
            let child = TokioChildProcess::new(cmd).map_err(|e| {
                MusterError::connection_failed(server_name, format!("spawn '{command}': {e}"))
            })?;
            let session = ClientInfo::default()
                .into_dyn()
                .serve(child)
                .await
                .map_err(|e| map_client_initialize_error(server_name, e))?;
            tracing::debug!(server = server_name, command = %command, "connected stdio server");
            Ok(session)
        }
        TransportConfig::StreamableHttp { url, headers } => {
            let http = reqwest::Client::builder()
                .default_headers(build_headers(headers)?)
                .build()
                .map_err(|e| MusterError::Transport(format!("build HTTP client: {e}")))?;
            let transport = StreamableHttpClientTransport::with_client(
                http,
                StreamableHttpClientTransportConfig::with_uri(url.as_str()),
            );
            let session = ClientInfo::default()
                .into_dyn()
                .serve(transport)
                .await
                .map_err(|e| map_client_initialize_error(server_name, e))?;
            tracing::debug!(server = server_name, url = %url, "connected streamable HTTP server");
            Ok(session)
        }
        TransportConfig::Sse { .. } => Err(MusterError::UnsupportedOperation(format!(
            "server '{server_name}': the sse transport is not supported, use streamable-http"
        ))),
    }
}

fn build_headers(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| MusterError::Configuration(format!("invalid header name: {key}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| MusterError::Configuration(format!("invalid header value for {key}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

pub(crate) fn map_client_initialize_error(
    server_name: &str,
    error: ClientInitializeError,
) -> MusterError {
    match error {
        ClientInitializeError::ConnectionClosed(context) => MusterError::connection_failed(
            server_name,
            format!("connection closed during initialize: {context}"),
        ),
        ClientInitializeError::TransportError { error, context } => {
            MusterError::connection_failed(server_name, format!("transport error ({context}): {error}"))
        }
        ClientInitializeError::JsonRpcError(error) => MusterError::Protocol {
            server: server_name.to_string(),
            message: format!(
                "initialize JSON-RPC error {}: {}",
                error.code.0, error.message
            ),
        },
        ClientInitializeError::Cancelled => {
            MusterError::Cancelled(format!("initialize of '{server_name}' cancelled"))
        }
        other => MusterError::Protocol {
            server: server_name.to_string(),
            message: format!("initialize error: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sse_is_rejected() {
        let transport = TransportConfig::Sse {
            url: "http://localhost:9000/sse".into(),
            headers: HashMap::new(),
        };
        let err = connect_service("legacy", &transport).await.err().expect("expected connect_service to fail");
        assert!(matches!(err, MusterError::UnsupportedOperation(ref m) if m.contains("legacy")));
    }

    #[test]
    fn invalid_header_name_is_a_configuration_error() {
        let headers = HashMap::from([("bad header".to_string(), "x".to_string())]);
        let err = build_headers(&headers).unwrap_err();
        assert!(matches!(err, MusterError::Configuration(_)));
    }

    #[test]
    fn jsonrpc_initialize_error_maps_to_protocol() {
        let err = map_client_initialize_error(
            "fs",
            ClientInitializeError::JsonRpcError(rmcp::model::ErrorData::invalid_request(
                "bad initialize payload",
                None,
            )),
        );
        assert!(matches!(
            err,
            MusterError::Protocol { ref server, ref message }
            if server == "fs" && message.contains("bad initialize payload")
        ));
    }
}
