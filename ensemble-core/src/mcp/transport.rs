//! MCP server configuration and transport types

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ValidationIssue, SECRET_MASK};

/// Default connect/handshake timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// How connection failures at startup are handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// A failed connection aborts agent startup
    Strict,
    /// A failed connection is recorded and startup continues
    #[default]
    Lenient,
}

/// MCP transport variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    /// Spawn a child process and speak MCP over its stdio
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Server-sent events stream
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Streamable HTTP (HTTP POST with SSE response streaming)
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl McpTransport {
    /// Start a stdio transport builder
    pub fn stdio(command: impl Into<String>) -> StdioBuilder {
        StdioBuilder::new(command)
    }

    /// Start an SSE transport builder
    pub fn sse(url: impl Into<String>) -> SseBuilder {
        SseBuilder::new(url)
    }

    /// Start a streamable-HTTP transport builder
    pub fn http(url: impl Into<String>) -> HttpBuilder {
        HttpBuilder::new(url)
    }
}

/// Configuration for one MCP server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(flatten)]
    pub transport: McpTransport,
    /// Connect/handshake timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(rename = "connectionMode", default)]
    pub connection_mode: ConnectionMode,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl McpServerConfig {
    pub fn new(transport: impl Into<McpTransport>) -> Self {
        Self {
            transport: transport.into(),
            timeout: DEFAULT_TIMEOUT_MS,
            connection_mode: ConnectionMode::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.as_millis() as u64;
        self
    }

    /// Fail agent startup when this server cannot connect
    pub fn strict(mut self) -> Self {
        self.connection_mode = ConnectionMode::Strict;
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Validate this server entry, appending findings to `issues`
    pub fn validate_into(&self, name: &str, issues: &mut Vec<ValidationIssue>) {
        match &self.transport {
            McpTransport::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    issues.push(ValidationIssue::error(
                        "missing_command",
                        format!("mcpServers.{}: stdio transport requires a command", name),
                    ));
                }
            }
            McpTransport::Sse { url, .. } | McpTransport::Http { url, .. } => {
                if url::Url::parse(url).is_err() {
                    issues.push(ValidationIssue::error(
                        "invalid_url",
                        format!("mcpServers.{}: '{}' is not a valid URL", name, url),
                    ));
                }
            }
        }
        if self.timeout == 0 {
            issues.push(ValidationIssue::error(
                "invalid_timeout",
                format!("mcpServers.{}: timeout must be at least 1ms", name),
            ));
        }
    }

    /// Mask header values and sensitive environment variables in place
    pub fn redact_secrets(&mut self) {
        match &mut self.transport {
            McpTransport::Stdio { env, .. } => {
                for (key, value) in env.iter_mut() {
                    let upper = key.to_uppercase();
                    if upper.contains("KEY")
                        || upper.contains("TOKEN")
                        || upper.contains("SECRET")
                        || upper.contains("PASSWORD")
                    {
                        *value = SECRET_MASK.to_string();
                    }
                }
            }
            McpTransport::Sse { headers, .. } | McpTransport::Http { headers, .. } => {
                for value in headers.values_mut() {
                    *value = SECRET_MASK.to_string();
                }
            }
        }
    }
}

/// Builder for stdio transports
#[derive(Debug, Clone)]
pub struct StdioBuilder {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> McpTransport {
        self.into()
    }
}

impl From<StdioBuilder> for McpTransport {
    fn from(builder: StdioBuilder) -> Self {
        McpTransport::Stdio {
            command: builder.command,
            args: builder.args,
            env: builder.env,
        }
    }
}

/// Builder for SSE transports
#[derive(Debug, Clone)]
pub struct SseBuilder {
    url: String,
    headers: HashMap<String, String>,
}

impl SseBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> McpTransport {
        self.into()
    }
}

impl From<SseBuilder> for McpTransport {
    fn from(builder: SseBuilder) -> Self {
        McpTransport::Sse {
            url: builder.url,
            headers: builder.headers,
        }
    }
}

/// Builder for streamable-HTTP transports
#[derive(Debug, Clone)]
pub struct HttpBuilder {
    url: String,
    headers: HashMap<String, String>,
}

impl HttpBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> McpTransport {
        self.into()
    }
}

impl From<HttpBuilder> for McpTransport {
    fn from(builder: HttpBuilder) -> Self {
        McpTransport::Http {
            url: builder.url,
            headers: builder.headers,
        }
    }
}
