//! MCP client wrapper over the three supported transports

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{CallToolRequestParam, ReadResourceRequestParam, ResourceContents};
use rmcp::service::RunningService;
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use rmcp::transport::streamable_http_client::{
    StreamableHttpClientTransport, StreamableHttpClientTransportConfig,
};
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use tokio::process::Command;
use tokio::sync::RwLock;

use super::transport::{McpServerConfig, McpTransport};
use super::{McpError, ToolInfo};

/// Connection lifecycle of one MCP client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// One connected MCP server
pub struct McpClient {
    name: String,
    config: McpServerConfig,
    state: parking_lot::RwLock<ConnectionState>,
    service: RwLock<Option<RunningService<RoleClient, ()>>>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, config: McpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: parking_lot::RwLock::new(ConnectionState::Disconnected),
            service: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Connect to the server; idempotent
    ///
    /// The configured timeout bounds the transport setup and initial
    /// handshake. On failure the client transitions to `Failed` and can be
    /// re-connected later.
    pub async fn connect(&self) -> Result<(), McpError> {
        let mut service_guard = self.service.write().await;
        if service_guard.is_some() {
            return Ok(());
        }

        *self.state.write() = ConnectionState::Connecting;
        let timeout = self.config.timeout_duration();
        let connected = tokio::time::timeout(timeout, self.establish()).await;

        match connected {
            Ok(Ok(service)) => {
                *service_guard = Some(service);
                *self.state.write() = ConnectionState::Connected;
                log::debug!("mcp server '{}' connected", self.name);
                Ok(())
            }
            Ok(Err(err)) => {
                *self.state.write() = ConnectionState::Failed;
                Err(err)
            }
            Err(_) => {
                *self.state.write() = ConnectionState::Failed;
                Err(McpError::Timeout(format!(
                    "server '{}' did not complete the handshake within {:?}",
                    self.name, timeout
                )))
            }
        }
    }

    async fn establish(&self) -> Result<RunningService<RoleClient, ()>, McpError> {
        match &self.config.transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                for arg in args {
                    cmd.arg(arg);
                }
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    McpError::Connection(format!("failed to spawn '{}': {}", command, e))
                })?;
                ().serve(transport)
                    .await
                    .map_err(|e| McpError::Connection(format!("stdio handshake failed: {}", e)))
            }
            McpTransport::Sse { url, headers } => {
                let http_client = build_http_client(headers)?;
                let transport = SseClientTransport::start_with_client(
                    http_client,
                    SseClientConfig {
                        sse_endpoint: url.clone().into(),
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| McpError::Connection(format!("sse stream failed: {}", e)))?;
                ().serve(transport)
                    .await
                    .map_err(|e| McpError::Connection(format!("sse handshake failed: {}", e)))
            }
            McpTransport::Http { url, headers } => {
                let http_client = build_http_client(headers)?;
                let transport = StreamableHttpClientTransport::with_client(
                    http_client,
                    StreamableHttpClientTransportConfig::with_uri(url.clone()),
                );
                ().serve(transport)
                    .await
                    .map_err(|e| McpError::Connection(format!("http handshake failed: {}", e)))
            }
        }
    }

    /// List the server's tools, tagged with this server's id
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let service_guard = self.service.read().await;
        let service = service_guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("server '{}' not connected", self.name)))?;

        let result = service
            .list_tools(Default::default())
            .await
            .map_err(|e| McpError::Protocol(format!("list_tools failed: {}", e)))?;

        Ok(result
            .tools
            .into_iter()
            .map(|tool| ToolInfo {
                name: tool.name.to_string(),
                description: tool.description.unwrap_or_default().to_string(),
                parameters: serde_json::Value::Object((*tool.input_schema).clone()),
                server: self.name.clone(),
            })
            .collect())
    }

    /// Invoke a tool on this server
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let service_guard = self.service.read().await;
        let service = service_guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("server '{}' not connected", self.name)))?;

        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments: arguments.as_object().cloned(),
        };

        let timeout = self.config.timeout_duration();
        let result = tokio::time::timeout(timeout, service.call_tool(params))
            .await
            .map_err(|_| {
                McpError::Timeout(format!(
                    "tool '{}' on '{}' exceeded {:?}",
                    name, self.name, timeout
                ))
            })?
            .map_err(|e| McpError::Execution {
                server: self.name.clone(),
                message: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(McpError::Json)
    }

    /// Read a resource by URI, returning its textual content
    ///
    /// Binary contents are surfaced as their base64 blob.
    pub async fn read_resource(&self, uri: &str) -> Result<String, McpError> {
        let service_guard = self.service.read().await;
        let service = service_guard
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("server '{}' not connected", self.name)))?;

        let result = service
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string().into(),
            })
            .await
            .map_err(|e| McpError::Protocol(format!("read_resource failed: {}", e)))?;

        let mut out = String::new();
        for contents in result.contents {
            match contents {
                ResourceContents::TextResourceContents { text, .. } => out.push_str(&text),
                ResourceContents::BlobResourceContents { blob, .. } => out.push_str(&blob),
            }
        }
        Ok(out)
    }

    /// Disconnect; safe to call repeatedly
    pub async fn disconnect(&self) -> Result<(), McpError> {
        let mut service_guard = self.service.write().await;
        if let Some(service) = service_guard.take() {
            service
                .cancel()
                .await
                .map_err(|e| McpError::Connection(format!("disconnect failed: {}", e)))?;
        }
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }
}

fn build_http_client(headers: &std::collections::HashMap<String, String>) -> Result<reqwest::Client, McpError> {
    let mut header_map = HeaderMap::new();
    for (key, value) in headers {
        let name = HeaderName::try_from(key.as_str())
            .map_err(|e| McpError::Config(format!("invalid header name '{}': {}", key, e)))?;
        let value = HeaderValue::try_from(value.as_str())
            .map_err(|e| McpError::Config(format!("invalid header value for '{}': {}", key, e)))?;
        header_map.insert(name, value);
    }
    reqwest::Client::builder()
        .default_headers(header_map)
        .build()
        .map_err(|e| McpError::Connection(format!("failed to build HTTP client: {}", e)))
}
