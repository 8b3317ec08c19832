//! MCP (Model Context Protocol) client integration
//!
//! The orchestrator consumes tools from external MCP servers over three
//! transports: child-process stdio, SSE, and streamable HTTP. The
//! [`manager::McpManager`] owns the client registry, aggregates tools across
//! servers, and routes invocations to the owning client.
//!
//! # Example
//!
//! ```rust,no_run
//! use ensemble_core::mcp::{McpServerConfig, McpTransport};
//!
//! // Stdio transport (most local MCP servers)
//! let config = McpServerConfig::new(
//!     McpTransport::stdio("npx").args(["-y", "@modelcontextprotocol/server-filesystem"]),
//! );
//!
//! // Streamable HTTP with authentication, strict connection mode
//! let config = McpServerConfig::new(
//!     McpTransport::http("https://api.example.com/mcp").header("Authorization", "Bearer token"),
//! )
//! .strict();
//! ```

pub mod client;
pub mod manager;
pub mod transport;

pub use client::{ConnectionState, McpClient};
pub use manager::McpManager;
pub use transport::{ConnectionMode, HttpBuilder, McpServerConfig, McpTransport, SseBuilder, StdioBuilder};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during MCP operations
#[derive(Debug, Error)]
pub enum McpError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed on server '{server}': {message}")]
    Execution { server: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, McpError::Connection(_) | McpError::Timeout(_))
    }
}

/// A tool aggregated from an MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input
    pub parameters: Value,
    /// Id of the owning server
    pub server: String,
}

/// The seam the chat session uses to discover and invoke tools
///
/// [`manager::McpManager`] is the production implementation; tests inject
/// scripted executors.
#[async_trait::async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The aggregated tool set, collision-resolved
    async fn all_tools(&self) -> Vec<ToolInfo>;

    /// Route a tool invocation to its owning server
    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, McpError>;
}
