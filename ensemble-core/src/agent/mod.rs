//! Agent facade: the single user-facing handle
//!
//! The [`Agent`] owns the orchestrator's lifecycle and routes every request
//! to the right subsystem: sessions, LLM switching, MCP servers, prompt
//! inspection, and search. Construction validates the configuration;
//! `start()` connects MCP servers and begins session expiry; `stop()` shuts
//! everything down and is terminal.
//!
//! ```ignore
//! use ensemble_core::{Agent, AgentConfig};
//!
//! # async fn example(config: AgentConfig) -> ensemble_core::Result<()> {
//! let agent = Agent::new(config)?;
//! agent.start().await?;
//!
//! let reply = agent.run("Hello", None, None, None, false).await?;
//! println!("{}", reply.unwrap_or_default());
//!
//! agent.stop().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod llm_ops;
mod mcp_ops;

pub use builder::AgentBuilder;
pub use llm_ops::LlmScope;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AgentConfig, ValidationIssue};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::llm::{default_adapter_factory, AdapterFactory};
use crate::mcp::{McpManager, ToolExecutor};
use crate::prompt::{PromptContext, PromptManager};
use crate::search::{MessageMatch, SearchService};
use crate::session::store::{InMemorySessionStore, SessionMetadata, SessionStore};
use crate::session::{ChatSession, SessionManager};
use crate::state::StateManager;
use crate::types::{FileInput, ImageInput, InternalMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Starting,
    Started,
    Stopped,
}

/// The user-facing orchestrator handle
pub struct Agent {
    pub(crate) state: Arc<StateManager>,
    pub(crate) events: EventBus,
    pub(crate) mcp: Arc<McpManager>,
    prompts: Arc<PromptManager>,
    store: Arc<dyn SessionStore>,
    sessions: Arc<SessionManager>,
    search: SearchService,
    lifecycle: parking_lot::RwLock<Lifecycle>,
    cancel: CancellationToken,
    startup_warnings: Vec<ValidationIssue>,
}

impl Agent {
    /// Validate the configuration and assemble the agent (not yet started)
    pub fn new(config: AgentConfig) -> Result<Self> {
        Self::assemble(
            config,
            Arc::new(InMemorySessionStore::new()),
            default_adapter_factory(),
        )
    }

    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub(crate) fn assemble(
        config: AgentConfig,
        store: Arc<dyn SessionStore>,
        adapter_factory: AdapterFactory,
    ) -> Result<Self> {
        let startup_warnings = config.validate()?;
        for warning in &startup_warnings {
            log::warn!("config: {}", warning.message);
        }

        let events = EventBus::default();
        let prompts = Arc::new(PromptManager::from_config(&config.system_prompt)?);
        let mcp = Arc::new(McpManager::new(events.clone()));
        let cancel = CancellationToken::new();

        let max_sessions = config.sessions.max_sessions;
        let session_ttl = Duration::from_millis(config.sessions.session_ttl_ms);
        let state = Arc::new(StateManager::new(config));

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            state.clone(),
            adapter_factory,
            mcp.clone() as Arc<dyn ToolExecutor>,
            Some(mcp.clone()),
            prompts.clone(),
            events.clone(),
            max_sessions,
            session_ttl,
            cancel.child_token(),
        ));
        let search = SearchService::new(store.clone());

        Ok(Self {
            state,
            events,
            mcp,
            prompts,
            store,
            sessions,
            search,
            lifecycle: parking_lot::RwLock::new(Lifecycle::Created),
            cancel,
            startup_warnings,
        })
    }

    /// Warnings surfaced by configuration validation
    pub fn startup_warnings(&self) -> &[ValidationIssue] {
        &self.startup_warnings
    }

    /// Subscribe to the agent's event bus
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::AgentEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Exactly-once initializer
    ///
    /// Connects configured MCP servers (honoring each server's connection
    /// mode: a strict failure aborts startup, lenient failures are
    /// recorded) and starts the session expiry sweep.
    pub async fn start(&self) -> Result<()> {
        {
            let mut lifecycle = self.lifecycle.write();
            match *lifecycle {
                Lifecycle::Created => *lifecycle = Lifecycle::Starting,
                Lifecycle::Starting | Lifecycle::Started => {
                    return Err(Error::Other("agent already started".into()))
                }
                Lifecycle::Stopped => return Err(Error::Stopped),
            }
        }

        let mut servers: Vec<_> = self
            .state
            .base_config()
            .mcp_servers
            .into_iter()
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, config) in servers {
            if let Err(err) = self.mcp.connect_server(&name, config).await {
                // Strict-mode failure: abort startup and allow a retry.
                *self.lifecycle.write() = Lifecycle::Created;
                return Err(err.into());
            }
        }

        self.sessions.start_expiry_task();
        *self.lifecycle.write() = Lifecycle::Started;
        log::info!("agent started");
        Ok(())
    }

    /// Graceful shutdown; the agent is terminal afterwards
    ///
    /// All shutdown errors are collected and surfaced as a single warning;
    /// the agent still transitions to stopped.
    pub async fn stop(&self) -> Result<()> {
        self.ensure_started()?;
        self.cancel.cancel();

        let mut failures: Vec<String> = Vec::new();
        failures.extend(self.sessions.cleanup().await);
        failures.extend(
            self.mcp
                .disconnect_all()
                .await
                .into_iter()
                .map(|(name, err)| format!("mcp {}: {}", name, err)),
        );
        if let Err(err) = self.store.close().await {
            failures.push(format!("store: {}", err));
        }

        if !failures.is_empty() {
            log::warn!("shutdown finished with errors: {}", failures.join("; "));
        }
        *self.lifecycle.write() = Lifecycle::Stopped;
        log::info!("agent stopped");
        Ok(())
    }

    pub(crate) fn ensure_started(&self) -> Result<()> {
        match *self.lifecycle.read() {
            Lifecycle::Created | Lifecycle::Starting => Err(Error::NotStarted),
            Lifecycle::Stopped => Err(Error::Stopped),
            Lifecycle::Started => Ok(()),
        }
    }

    // ========================================================================
    // Conversation
    // ========================================================================

    /// Run one turn against the named (or current default) session
    ///
    /// Returns the final assistant text, or `None` when it is empty or
    /// whitespace.
    pub async fn run(
        &self,
        text: &str,
        image: Option<ImageInput>,
        file: Option<FileInput>,
        session_id: Option<&str>,
        stream: bool,
    ) -> Result<Option<String>> {
        self.ensure_started()?;
        let session = self
            .sessions
            .get_or_create(session_id.map(str::to_string))
            .await?;
        session.run(text, image, file, stream).await
    }

    /// Build the current system prompt
    pub async fn get_system_prompt(&self) -> Result<String> {
        self.ensure_started()?;
        Ok(self
            .prompts
            .build(&PromptContext {
                mcp: Some(self.mcp.as_ref()),
            })
            .await)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    pub async fn create_session(&self, id: Option<&str>) -> Result<Arc<ChatSession>> {
        self.ensure_started()?;
        self.sessions.create_session(id.map(str::to_string)).await
    }

    pub async fn get_session(&self, id: &str) -> Result<Arc<ChatSession>> {
        self.ensure_started()?;
        self.sessions.get_session(id).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        self.ensure_started()?;
        self.sessions.list_sessions().await
    }

    /// Drop a session from memory; history and metadata survive
    pub async fn end_session(&self, id: &str) -> Result<()> {
        self.ensure_started()?;
        self.sessions.end_session(id).await
    }

    /// Drop a session and purge its persisted history
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.ensure_started()?;
        self.sessions.delete_session(id).await
    }

    /// Point the default session at `id` (None restores "default")
    pub async fn load_session(&self, id: Option<&str>) -> Result<()> {
        self.ensure_started()?;
        self.sessions.load_session(id).await
    }

    pub fn current_session_id(&self) -> Result<String> {
        self.ensure_started()?;
        Ok(self.sessions.current_session_id())
    }

    /// Truncate a session's log to its system snapshot
    pub async fn reset_conversation(&self, session_id: Option<&str>) -> Result<()> {
        self.ensure_started()?;
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| self.sessions.current_session_id());
        self.sessions.reset_session(&id).await
    }

    pub async fn get_session_metadata(&self, id: &str) -> Result<SessionMetadata> {
        self.ensure_started()?;
        self.sessions.get_session_metadata(id).await
    }

    /// The conversation log of the named (or current default) session
    pub async fn get_history(&self, session_id: Option<&str>) -> Result<Vec<InternalMessage>> {
        self.ensure_started()?;
        let id = session_id
            .map(str::to_string)
            .unwrap_or_else(|| self.sessions.current_session_id());
        match self.sessions.get_session(&id).await {
            Ok(session) => Ok(session.history().await),
            Err(Error::SessionNotFound(_)) => Ok(self.store.load_history(&id).await?),
            Err(err) => Err(err),
        }
    }

    // ========================================================================
    // Search
    // ========================================================================

    pub async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<MessageMatch>> {
        self.ensure_started()?;
        self.search.search_messages(query, session_id).await
    }

    pub async fn search_sessions(&self, query: &str) -> Result<Vec<String>> {
        self.ensure_started()?;
        self.search.search_sessions(query).await
    }

    pub(crate) fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }
}
