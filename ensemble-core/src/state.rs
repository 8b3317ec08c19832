//! Effective configuration with scoped overlays
//!
//! The state manager layers configuration: the base document, a global
//! overlay (`*` scope), and per-session overlays. Reading the effective
//! config for session S yields base ⊕ overlay(*) ⊕ overlay(S), later layers
//! winning per field. Readers get defensive deep copies; writers take the
//! exclusive lock.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::{AgentConfig, LlmConfig, LlmUpdates};
use crate::mcp::McpServerConfig;

/// Overlay target for configuration changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateScope {
    /// Applies to every session (`*`)
    Global,
    /// Applies to one session
    Session(String),
}

#[derive(Debug, Clone, Default)]
struct Overlay {
    llm: LlmUpdates,
    mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug)]
struct StateInner {
    base: AgentConfig,
    global: Overlay,
    sessions: HashMap<String, Overlay>,
}

/// Owner of the layered runtime configuration
pub struct StateManager {
    inner: RwLock<StateInner>,
}

impl StateManager {
    pub fn new(base: AgentConfig) -> Self {
        Self {
            inner: RwLock::new(StateInner {
                base,
                global: Overlay::default(),
                sessions: HashMap::new(),
            }),
        }
    }

    /// The effective LLM config for a session (or the base scope)
    pub fn effective_llm(&self, session_id: Option<&str>) -> LlmConfig {
        let inner = self.inner.read();
        let mut config = inner.global.llm.apply(&inner.base.llm);
        if let Some(session_id) = session_id {
            if let Some(overlay) = inner.sessions.get(session_id) {
                config = overlay.llm.apply(&config);
            }
        }
        config
    }

    /// Merge LLM updates into the overlay for `scope`
    ///
    /// Later updates win per field within a scope.
    pub fn update_llm(&self, updates: LlmUpdates, scope: StateScope) {
        let mut inner = self.inner.write();
        let overlay = match scope {
            StateScope::Global => &mut inner.global,
            StateScope::Session(id) => inner.sessions.entry(id).or_default(),
        };
        merge_updates(&mut overlay.llm, &updates);
    }

    /// The effective MCP server map for a session
    pub fn effective_mcp_servers(&self, session_id: Option<&str>) -> HashMap<String, McpServerConfig> {
        let inner = self.inner.read();
        let mut servers = inner.base.mcp_servers.clone();
        servers.extend(
            inner
                .global
                .mcp_servers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(session_id) = session_id {
            if let Some(overlay) = inner.sessions.get(session_id) {
                servers.extend(
                    overlay
                        .mcp_servers
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
            }
        }
        servers
    }

    /// Record an MCP server in the overlay for `scope`
    pub fn add_mcp_server(&self, name: &str, config: McpServerConfig, scope: StateScope) {
        let mut inner = self.inner.write();
        let overlay = match scope {
            StateScope::Global => &mut inner.global,
            StateScope::Session(id) => inner.sessions.entry(id).or_default(),
        };
        overlay.mcp_servers.insert(name.to_string(), config);
    }

    /// Remove an MCP server from every layer
    pub fn remove_mcp_server(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.base.mcp_servers.remove(name);
        inner.global.mcp_servers.remove(name);
        for overlay in inner.sessions.values_mut() {
            overlay.mcp_servers.remove(name);
        }
    }

    /// Drop a session's overlay (called when the session is deleted)
    pub fn clear_session(&self, session_id: &str) {
        self.inner.write().sessions.remove(session_id);
    }

    /// A defensive deep copy of the effective config for a session
    pub fn effective_config(&self, session_id: Option<&str>) -> AgentConfig {
        let mut config = self.inner.read().base.clone();
        config.llm = self.effective_llm(session_id);
        config.mcp_servers = self.effective_mcp_servers(session_id);
        config
    }

    /// A defensive deep copy of the base document
    pub fn base_config(&self) -> AgentConfig {
        self.inner.read().base.clone()
    }

    /// Session ids with an overlay in place
    pub fn overlaid_sessions(&self) -> Vec<String> {
        self.inner.read().sessions.keys().cloned().collect()
    }
}

fn merge_updates(base: &mut LlmUpdates, new: &LlmUpdates) {
    if new.provider.is_some() {
        base.provider = new.provider;
    }
    if new.model.is_some() {
        base.model = new.model.clone();
    }
    if new.api_key.is_some() {
        base.api_key = new.api_key.clone();
    }
    if new.router.is_some() {
        base.router = new.router;
    }
    if new.base_url.is_some() {
        base.base_url = new.base_url.clone();
    }
    if new.max_input_tokens.is_some() {
        base.max_input_tokens = new.max_input_tokens;
    }
    if new.max_output_tokens.is_some() {
        base.max_output_tokens = new.max_output_tokens;
    }
    if new.temperature.is_some() {
        base.temperature = new.temperature;
    }
    if new.max_iterations.is_some() {
        base.max_iterations = new.max_iterations;
    }
}
