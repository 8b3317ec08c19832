//! Registry of connected MCP servers, tool aggregation and routing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::events::{AgentEvent, EventBus, ToolSource};

use super::client::{ConnectionState, McpClient};
use super::transport::{ConnectionMode, McpServerConfig};
use super::{McpError, ToolExecutor, ToolInfo};

/// Maximum concurrent disconnects during shutdown
const DISCONNECT_CONCURRENCY: usize = 4;

/// Owner of the `server id → client` registry
///
/// Readers (tool listing, execution) take a shared lock; connect/remove take
/// the exclusive lock. Server ids iterate in lexicographic order, which
/// makes tool-name collision resolution deterministic.
pub struct McpManager {
    clients: RwLock<BTreeMap<String, Arc<McpClient>>>,
    failed: RwLock<HashMap<String, String>>,
    /// Aggregated `tool name → owning server`, refreshed on registry changes
    tool_index: RwLock<HashMap<String, String>>,
    events: EventBus,
}

impl McpManager {
    pub fn new(events: EventBus) -> Self {
        Self {
            clients: RwLock::new(BTreeMap::new()),
            failed: RwLock::new(HashMap::new()),
            tool_index: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Connect a server and register it; idempotent
    ///
    /// Re-adding an existing name disconnects the old client first. In
    /// lenient mode a connection failure is recorded in the failed map and
    /// `Ok` is returned; in strict mode it propagates.
    pub async fn connect_server(
        &self,
        name: &str,
        config: McpServerConfig,
    ) -> Result<(), McpError> {
        // Replace semantics: drop any previous client under this name.
        if let Some(old) = self.clients.write().await.remove(name) {
            if let Err(err) = old.disconnect().await {
                log::warn!("disconnecting replaced server '{}' failed: {}", name, err);
            }
        }
        self.failed.write().await.remove(name);

        let mode = config.connection_mode;
        let client = Arc::new(McpClient::new(name, config));

        match client.connect().await {
            Ok(()) => {
                self.clients
                    .write()
                    .await
                    .insert(name.to_string(), client);
                self.events.emit(AgentEvent::McpServerConnected {
                    name: name.to_string(),
                    success: true,
                    error: None,
                });
                self.refresh_tool_index().await;
                Ok(())
            }
            Err(err) => {
                self.events.emit(AgentEvent::McpServerConnected {
                    name: name.to_string(),
                    success: false,
                    error: Some(err.to_string()),
                });
                match mode {
                    ConnectionMode::Strict => Err(err),
                    ConnectionMode::Lenient => {
                        log::warn!("mcp server '{}' failed to connect (lenient): {}", name, err);
                        self.failed
                            .write()
                            .await
                            .insert(name.to_string(), err.to_string());
                        Ok(())
                    }
                }
            }
        }
    }

    /// Disconnect and forget a server, whether connected or failed
    pub async fn remove_client(&self, name: &str) -> Result<(), McpError> {
        let removed = self.clients.write().await.remove(name);
        let had_failed = self.failed.write().await.remove(name).is_some();
        match removed {
            Some(client) => {
                client.disconnect().await?;
                self.refresh_tool_index().await;
                Ok(())
            }
            None if had_failed => Ok(()),
            None => Err(McpError::Config(format!("no server named '{}'", name))),
        }
    }

    /// Disconnect every client in parallel, collecting failures
    pub async fn disconnect_all(&self) -> Vec<(String, String)> {
        let clients: Vec<(String, Arc<McpClient>)> = {
            let mut guard = self.clients.write().await;
            std::mem::take(&mut *guard).into_iter().collect()
        };
        self.tool_index.write().await.clear();

        let mut errors = Vec::new();
        let mut in_flight = FuturesUnordered::new();
        let mut pending = clients.into_iter();

        loop {
            while in_flight.len() < DISCONNECT_CONCURRENCY {
                match pending.next() {
                    Some((name, client)) => in_flight.push(async move {
                        let timeout = client.config().timeout_duration();
                        let result =
                            tokio::time::timeout(timeout, client.disconnect()).await;
                        (name, result)
                    }),
                    None => break,
                }
            }
            match in_flight.next().await {
                Some((name, Ok(Ok(())))) => log::debug!("mcp server '{}' disconnected", name),
                Some((name, Ok(Err(err)))) => errors.push((name, err.to_string())),
                Some((name, Err(_))) => errors.push((name, "disconnect timed out".to_string())),
                None => break,
            }
        }
        errors
    }

    /// Connected clients keyed by server id
    pub async fn clients(&self) -> BTreeMap<String, Arc<McpClient>> {
        self.clients.read().await.clone()
    }

    /// Connection state per registered server
    pub async fn connection_states(&self) -> BTreeMap<String, ConnectionState> {
        self.clients
            .read()
            .await
            .iter()
            .map(|(name, client)| (name.clone(), client.state()))
            .collect()
    }

    /// Servers that failed to connect in lenient mode, with their errors
    pub async fn failed_connections(&self) -> HashMap<String, String> {
        self.failed.read().await.clone()
    }

    /// Read a resource from the first server that can supply it
    pub async fn read_resource(&self, uri: &str) -> Result<String, McpError> {
        let clients = self.clients.read().await.clone();
        let mut last_err = McpError::Config(format!("no server provides resource '{}'", uri));
        for client in clients.values() {
            match client.read_resource(uri).await {
                Ok(text) => return Ok(text),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Aggregate tools across servers, resolving name collisions
    ///
    /// Servers are visited in lexicographic id order and the first
    /// definition of a name wins; shadowed definitions produce a
    /// `duplicateToolName` warning event.
    async fn aggregate(&self) -> Vec<ToolInfo> {
        let clients = self.clients.read().await.clone();
        let mut tools: Vec<ToolInfo> = Vec::new();
        let mut owners: HashMap<String, String> = HashMap::new();

        for (server, client) in &clients {
            let listed = match client.list_tools().await {
                Ok(listed) => listed,
                Err(err) => {
                    log::warn!("listing tools on '{}' failed: {}", server, err);
                    continue;
                }
            };
            for tool in listed {
                match owners.get(&tool.name) {
                    Some(kept) => {
                        self.events.emit(AgentEvent::DuplicateToolName {
                            tool_name: tool.name.clone(),
                            kept_server: kept.clone(),
                            shadowed_server: server.clone(),
                        });
                    }
                    None => {
                        owners.insert(tool.name.clone(), server.clone());
                        tools.push(tool);
                    }
                }
            }
        }

        *self.tool_index.write().await = owners;
        tools
    }

    async fn refresh_tool_index(&self) {
        let tools = self.aggregate().await;
        self.events.emit(AgentEvent::AvailableToolsUpdated {
            tools: tools.into_iter().map(|t| t.name).collect(),
            source: ToolSource::Mcp,
        });
    }
}

#[async_trait::async_trait]
impl ToolExecutor for McpManager {
    async fn all_tools(&self) -> Vec<ToolInfo> {
        self.aggregate().await
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        let owner = {
            let index = self.tool_index.read().await;
            index.get(name).cloned()
        };
        // The index may be stale after a server change; refresh once before
        // giving up.
        let owner = match owner {
            Some(owner) => owner,
            None => {
                self.aggregate().await;
                self.tool_index
                    .read()
                    .await
                    .get(name)
                    .cloned()
                    .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?
            }
        };

        let client = self
            .clients
            .read()
            .await
            .get(&owner)
            .cloned()
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        client.call_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpTransport;

    fn manager() -> McpManager {
        McpManager::new(EventBus::new(32))
    }

    #[tokio::test]
    async fn test_lenient_failure_recorded() {
        let mgr = manager();
        let config = McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server"));
        // Lenient is the default: the failure is swallowed and recorded.
        mgr.connect_server("server_bad", config).await.unwrap();

        let failed = mgr.failed_connections().await;
        assert!(failed.contains_key("server_bad"));
        assert!(mgr.clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_strict_failure_propagates() {
        let mgr = manager();
        let config =
            McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server")).strict();
        let err = mgr.connect_server("server_bad", config).await.unwrap_err();
        assert!(matches!(err, McpError::Connection(_)));
        assert!(mgr.failed_connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_events_emitted() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let mgr = McpManager::new(bus);

        let config = McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server"));
        mgr.connect_server("flaky", config).await.unwrap();

        match rx.try_recv() {
            Ok(AgentEvent::McpServerConnected { name, success, error }) => {
                assert_eq!(name, "flaky");
                assert!(!success);
                assert!(error.is_some());
            }
            other => panic!("expected McpServerConnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_unknown_client() {
        let mgr = manager();
        assert!(matches!(
            mgr.remove_client("ghost").await,
            Err(McpError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_clears_failed_entry() {
        let mgr = manager();
        let config = McpServerConfig::new(McpTransport::stdio("/nonexistent/mcp-server"));
        mgr.connect_server("server_bad", config).await.unwrap();
        assert!(mgr.failed_connections().await.contains_key("server_bad"));

        mgr.remove_client("server_bad").await.unwrap();
        assert!(mgr.failed_connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let mgr = manager();
        let err = mgr
            .execute_tool("echo", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_disconnect_all_empty() {
        let mgr = manager();
        assert!(mgr.disconnect_all().await.is_empty());
    }
}
