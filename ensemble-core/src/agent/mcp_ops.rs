//! MCP pass-throughs on the facade

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigError;
use crate::error::Result;
use crate::mcp::{McpClient, McpServerConfig, ToolExecutor, ToolInfo};
use crate::state::StateScope;

use super::Agent;

impl Agent {
    /// Connect a new MCP server and record it in the global overlay
    ///
    /// Lenient-mode failures are recorded in the failed-connections map; a
    /// strict-mode failure propagates without touching the state manager.
    pub async fn connect_mcp_server(&self, name: &str, config: McpServerConfig) -> Result<()> {
        self.ensure_started()?;
        let mut issues = Vec::new();
        config.validate_into(name, &mut issues);
        if !issues.is_empty() {
            return Err(ConfigError::new(issues).into());
        }

        self.mcp.connect_server(name, config.clone()).await?;
        self.state
            .add_mcp_server(name, config, StateScope::Global);
        Ok(())
    }

    /// Disconnect and forget an MCP server
    pub async fn remove_mcp_server(&self, name: &str) -> Result<()> {
        self.ensure_started()?;
        self.mcp.remove_client(name).await?;
        self.state.remove_mcp_server(name);
        Ok(())
    }

    /// Invoke an aggregated tool by name
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<Value> {
        self.ensure_started()?;
        Ok(self.mcp.execute_tool(name, args).await?)
    }

    /// The full aggregated tool set
    pub async fn get_all_tools(&self) -> Result<Vec<ToolInfo>> {
        self.ensure_started()?;
        Ok(self.mcp.all_tools().await)
    }

    /// Tools sourced from MCP servers
    ///
    /// Currently identical to [`Agent::get_all_tools`]; kept separate so
    /// callers distinguishing tool sources keep working when custom tools
    /// are registered.
    pub async fn get_all_mcp_tools(&self) -> Result<Vec<ToolInfo>> {
        self.get_all_tools().await
    }

    /// Connected MCP clients keyed by server id
    pub async fn get_mcp_clients(&self) -> Result<BTreeMap<String, Arc<McpClient>>> {
        self.ensure_started()?;
        Ok(self.mcp.clients().await)
    }

    /// Servers that failed to connect in lenient mode, with error strings
    pub async fn get_mcp_failed_connections(&self) -> Result<HashMap<String, String>> {
        self.ensure_started()?;
        Ok(self.mcp.failed_connections().await)
    }
}
