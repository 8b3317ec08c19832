//! Builder for assembling an [`Agent`]

use std::sync::Arc;

use crate::config::{AgentConfig, ConfigError, LlmConfig, SystemPromptConfig, ValidationIssue};
use crate::error::Result;
use crate::llm::{default_adapter_factory, AdapterFactory, LlmAdapter};
use crate::mcp::McpServerConfig;
use crate::prompt::PromptContributor;
use crate::session::store::{InMemorySessionStore, SessionStore};

use super::Agent;

/// Assembles an [`Agent`] from a configuration and optional overrides
///
/// ```ignore
/// let agent = Agent::builder()
///     .config(config)
///     .with_mcp_server("filesystem", McpServerConfig::new(
///         McpTransport::stdio("npx").args(["-y", "@modelcontextprotocol/server-filesystem"]),
///     ))
///     .store(Arc::new(MyDurableStore::open(path)?))
///     .build()?;
/// agent.start().await?;
/// ```
///
/// Tests swap the LLM out through the adapter factory:
///
/// ```ignore
/// let mock = MockAdapter::new().with_text("Hi!");
/// let agent = Agent::builder()
///     .config(config)
///     .adapter_factory(move |_| Ok(Arc::new(mock.clone()) as Arc<dyn LlmAdapter>))
///     .build()?;
/// ```
#[derive(Default)]
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    store: Option<Arc<dyn SessionStore>>,
    adapter_factory: Option<AdapterFactory>,
    mcp_servers: Vec<(String, McpServerConfig)>,
    contributors: Vec<PromptContributor>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom persistence backend instead of the in-memory default
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override how sessions turn LLM configs into adapters
    ///
    /// The default builds registry-backed provider adapters; tests inject a
    /// factory returning scripted adapters so turns run without credentials.
    pub fn adapter_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&LlmConfig) -> std::result::Result<Arc<dyn LlmAdapter>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.adapter_factory = Some(Arc::new(factory));
        self
    }

    /// Add an MCP server on top of those in the configuration
    ///
    /// The server is connected during `start()`, honoring its connection
    /// mode like any configured server. A name already present in the
    /// configuration is replaced.
    pub fn with_mcp_server(mut self, name: impl Into<String>, config: McpServerConfig) -> Self {
        self.mcp_servers.push((name.into(), config));
        self
    }

    /// Append a system prompt contributor
    ///
    /// A plain-string `systemPrompt` in the configuration becomes the first
    /// static contributor, with appended ones composed after it by the usual
    /// (priority, id) ordering.
    pub fn with_contributor(mut self, contributor: PromptContributor) -> Self {
        self.contributors.push(contributor);
        self
    }

    /// Validate and assemble the agent (call `start()` afterwards)
    pub fn build(self) -> Result<Agent> {
        let mut config = self.config.ok_or_else(|| {
            ConfigError::single(ValidationIssue::error(
                "missing_config",
                "AgentBuilder requires a configuration",
            ))
        })?;

        for (name, server) in self.mcp_servers {
            config.mcp_servers.insert(name, server);
        }

        if !self.contributors.is_empty() {
            config.system_prompt = match config.system_prompt {
                SystemPromptConfig::Literal(text) => {
                    let mut contributors = Vec::with_capacity(self.contributors.len() + 1);
                    if !text.is_empty() {
                        contributors.push(PromptContributor::static_text("system", 0, text));
                    }
                    contributors.extend(self.contributors);
                    SystemPromptConfig::Contributors { contributors }
                }
                SystemPromptConfig::Contributors { mut contributors } => {
                    contributors.extend(self.contributors);
                    SystemPromptConfig::Contributors { contributors }
                }
            };
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let adapter_factory = self.adapter_factory.unwrap_or_else(default_adapter_factory);
        Agent::assemble(config, store, adapter_factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::registry::LlmProvider;
    use crate::mcp::McpTransport;
    use crate::test_utils::MockAdapter;

    fn config() -> AgentConfig {
        AgentConfig {
            system_prompt: SystemPromptConfig::Literal("Base prompt.".into()),
            llm: LlmConfig::new(LlmProvider::OpenAi, "gpt-4o-mini", "sk-test"),
            mcp_servers: Default::default(),
            sessions: Default::default(),
            storage: Default::default(),
        }
    }

    #[test]
    fn test_build_requires_config() {
        let err = AgentBuilder::new().build().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_mcp_servers_merged_into_config() {
        let agent = Agent::builder()
            .config(config())
            .with_mcp_server("files", McpServerConfig::new(McpTransport::stdio("npx")))
            .build()
            .unwrap();
        assert!(agent
            .state
            .base_config()
            .mcp_servers
            .contains_key("files"));
    }

    #[tokio::test]
    async fn test_contributors_compose_after_literal_prompt() {
        let agent = Agent::builder()
            .config(config())
            .with_contributor(PromptContributor::static_text("extra", 10, "Extra rules."))
            .build()
            .unwrap();
        agent.start().await.unwrap();

        assert_eq!(
            agent.get_system_prompt().await.unwrap(),
            "Base prompt.\n\nExtra rules."
        );
    }

    #[test]
    fn test_adapter_factory_injected() {
        let mock = MockAdapter::new().with_text("scripted");
        let agent = Agent::builder()
            .config(config())
            .adapter_factory(move |_| Ok(Arc::new(mock.clone()) as Arc<dyn LlmAdapter>))
            .build()
            .unwrap();
        // The factory is handed to the session manager; nothing provider-
        // backed is constructed at assembly time.
        assert!(agent.startup_warnings().is_empty());
    }
}
