//! # Ensemble
//!
//! A multi-session AI agent orchestrator for Rust: conversation state,
//! system-prompt composition, a bounded LLM↔tool loop, token-budget
//! compression, and dynamic tool aggregation from MCP servers over stdio,
//! SSE, and streamable HTTP.
//!
//! ## Quick start
//!
//! ```ignore
//! use ensemble_core::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> ensemble_core::Result<()> {
//!     let config: AgentConfig = serde_json::from_str(
//!         r#"{
//!             "systemPrompt": "You are a helpful assistant.",
//!             "llm": {"provider": "openai", "model": "gpt-4o-mini", "apiKey": "sk-..."}
//!         }"#,
//!     )?;
//!
//!     let agent = Agent::new(config)?;
//!     agent.start().await?;
//!
//!     let reply = agent.run("What is 2 + 2?", None, None, None, false).await?;
//!     println!("{}", reply.unwrap_or_default());
//!
//!     agent.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Adding MCP tools
//!
//! ```ignore
//! use ensemble_core::mcp::{McpServerConfig, McpTransport};
//!
//! agent.connect_mcp_server(
//!     "filesystem",
//!     McpServerConfig::new(
//!         McpTransport::stdio("npx").args(["-y", "@modelcontextprotocol/server-filesystem"]),
//!     ),
//! ).await?;
//! ```
//!
//! ## Switching models mid-conversation
//!
//! ```ignore
//! use ensemble_core::{LlmScope, LlmUpdates};
//!
//! // The conversation log is preserved across the swap.
//! agent.switch_llm(LlmUpdates::model("claude-4-sonnet"), LlmScope::Default).await?;
//! ```
//!
//! ## Observing execution
//!
//! Every subsystem publishes onto a bounded per-agent event bus:
//!
//! ```ignore
//! let mut events = agent.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{}: {:?}", event.topic(), event.session_id());
//! }
//! ```

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod llm;
pub mod mcp;
pub mod prompt;
pub mod search;
pub mod session;
pub mod state;
pub mod tokenizer;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use agent::{Agent, AgentBuilder, LlmScope};
pub use config::{
    AgentConfig, ConfigError, LlmConfig, LlmUpdates, SessionsConfig, Severity, StorageConfig,
    SystemPromptConfig, ValidationIssue,
};
pub use context::formatter::{AnthropicFormatter, FormattedRequest, Formatter, OpenAiFormatter};
pub use context::{ContextError, ContextManager};
pub use error::{Error, Result};
pub use events::{AgentEvent, EventBus, EventSink, ToolSource};
pub use llm::registry::LlmProvider;
pub use llm::{
    create_adapter, default_adapter_factory, AdapterFactory, LlmAdapter, LlmError, LlmRouter,
    StepResult, StepType,
};
pub use mcp::{
    ConnectionMode, McpClient, McpError, McpManager, McpServerConfig, McpTransport, ToolExecutor,
    ToolInfo,
};
pub use prompt::{DynamicSource, PromptContext, PromptContributor, PromptManager};
pub use search::{MessageMatch, SearchService};
pub use session::{
    ChatSession, InMemorySessionStore, SessionManager, SessionMetadata, SessionStore, StoreError,
    MAX_ITERATIONS_SENTINEL,
};
pub use state::{StateManager, StateScope};
pub use tokenizer::CharacterTokenizer;
pub use types::{
    FileInput, FinishReason, ImageInput, InternalMessage, MessageContent, MessagePart, Role,
    TokenUsage, ToolCall,
};
