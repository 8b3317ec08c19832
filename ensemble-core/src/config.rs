//! Configuration schema, validation, and redacted export
//!
//! The structs here mirror the external configuration document (camelCase
//! keys). Validation returns an ordered list of issues instead of failing on
//! the first problem, and export masks secrets so a dumped config can be
//! shared safely.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::registry::{self, LlmProvider};
use crate::llm::LlmRouter;
use crate::mcp::McpServerConfig;
use crate::prompt::PromptContributor;

/// Default iteration cap for the tool loop
pub const DEFAULT_MAX_ITERATIONS: usize = 50;
/// Default cap on live in-memory sessions
pub const DEFAULT_MAX_SESSIONS: usize = 100;
/// Default session idle TTL in milliseconds (1 hour)
pub const DEFAULT_SESSION_TTL_MS: u64 = 3_600_000;
/// Placeholder written in place of secrets on export
pub const SECRET_MASK: &str = "********";

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single configuration or input validation finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Stable machine-readable code, e.g. `incompatible_model`
    pub code: String,
    /// Human-readable description
    pub message: String,
    pub severity: Severity,
    /// Optional structured context (offending field, value, limits)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl ValidationIssue {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
            context: None,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Severity::Warning,
            context: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// Validation failure carrying the full ordered issue list
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid configuration: {}", summarize(.issues))]
pub struct ConfigError {
    pub issues: Vec<ValidationIssue>,
}

impl ConfigError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    pub fn single(issue: ValidationIssue) -> Self {
        Self {
            issues: vec![issue],
        }
    }
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|i| i.severity == Severity::Error)
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// LLM configuration for one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Tool-use routing strategy; resolved from the registry default when
    /// absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<LlmRouter>,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl LlmConfig {
    pub fn new(provider: LlmProvider, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            api_key: api_key.into(),
            router: None,
            base_url: None,
            max_input_tokens: None,
            max_output_tokens: None,
            temperature: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// The effective router after applying registry defaults
    ///
    /// Anthropic always routes in-built: the unified SDK path does not speak
    /// its wire protocol.
    pub fn resolved_router(&self) -> LlmRouter {
        if self.provider == LlmProvider::Anthropic {
            return LlmRouter::InBuilt;
        }
        self.router
            .unwrap_or(registry::provider_info(self.provider).default_router)
    }

    /// The context window used for compression decisions
    pub fn resolved_max_input_tokens(&self) -> usize {
        self.max_input_tokens
            .or_else(|| registry::max_input_tokens(self.provider, &self.model))
            .unwrap_or(registry::COMPATIBLE_DEFAULT_CONTEXT)
    }

    /// Validate this config in isolation, appending findings to `issues`
    pub fn validate_into(&self, issues: &mut Vec<ValidationIssue>) {
        if registry::find_model(self.provider, &self.model).is_none() {
            issues.push(
                ValidationIssue::error(
                    "incompatible_model",
                    format!(
                        "model '{}' is not supported by provider '{}'",
                        self.model, self.provider
                    ),
                )
                .with_context(serde_json::json!({
                    "provider": self.provider.as_str(),
                    "model": self.model,
                })),
            );
        }
        if self.api_key.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "missing_api_key",
                format!("no API key configured for provider '{}'", self.provider),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                issues.push(
                    ValidationIssue::error(
                        "temperature_out_of_range",
                        format!("temperature {} is outside [0, 1]", t),
                    )
                    .with_context(serde_json::json!({ "temperature": t })),
                );
            }
        }
        if self.max_iterations == 0 {
            issues.push(ValidationIssue::error(
                "invalid_max_iterations",
                "maxIterations must be at least 1",
            ));
        }
        let accepts_base_url = registry::provider_info(self.provider).accepts_base_url;
        match (&self.base_url, accepts_base_url) {
            (Some(url), false) => issues.push(
                ValidationIssue::error(
                    "base_url_not_allowed",
                    format!(
                        "baseURL is only permitted for openai-compatible (got provider '{}')",
                        self.provider
                    ),
                )
                .with_context(serde_json::json!({ "baseURL": url })),
            ),
            (Some(url), true) => {
                if url::Url::parse(url).is_err() {
                    issues.push(ValidationIssue::error(
                        "invalid_base_url",
                        format!("baseURL '{}' is not a valid URL", url),
                    ));
                }
            }
            (None, true) => issues.push(ValidationIssue::error(
                "missing_base_url",
                "openai-compatible requires baseURL",
            )),
            (None, false) => {}
        }
        if self.provider == LlmProvider::Anthropic && self.router == Some(LlmRouter::Unified) {
            issues.push(ValidationIssue::warning(
                "router_override",
                "anthropic only supports the in-built router; the unified setting is ignored",
            ));
        }
    }

    /// A copy with secrets masked for export
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api_key.is_empty() {
            copy.api_key = SECRET_MASK.to_string();
        }
        copy
    }
}

/// A partial LLM configuration change, merged over an existing config
///
/// Unset fields keep their current value; set fields win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LlmUpdates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<LlmProvider>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<LlmRouter>,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

impl LlmUpdates {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge these updates over `base`
    ///
    /// Changing the model without naming a provider re-infers the provider
    /// from the model name, so `switchLLM({model: "claude-4-sonnet"})` moves
    /// an openai session to anthropic.
    pub fn apply(&self, base: &LlmConfig) -> LlmConfig {
        let mut cfg = base.clone();
        if let Some(model) = &self.model {
            cfg.model = model.clone();
            if self.provider.is_none() {
                if let Some(inferred) = registry::infer_provider(model) {
                    if inferred != cfg.provider {
                        cfg.provider = inferred;
                        // Router and key belong to the old provider.
                        cfg.router = None;
                        cfg.base_url = None;
                    }
                }
            }
        }
        if let Some(provider) = self.provider {
            cfg.provider = provider;
        }
        if let Some(api_key) = &self.api_key {
            cfg.api_key = api_key.clone();
        }
        if let Some(router) = self.router {
            cfg.router = Some(router);
        }
        if let Some(base_url) = &self.base_url {
            cfg.base_url = Some(base_url.clone());
        }
        if let Some(v) = self.max_input_tokens {
            cfg.max_input_tokens = Some(v);
        }
        if let Some(v) = self.max_output_tokens {
            cfg.max_output_tokens = Some(v);
        }
        if let Some(v) = self.temperature {
            cfg.temperature = Some(v);
        }
        if let Some(v) = self.max_iterations {
            cfg.max_iterations = v;
        }
        cfg
    }
}

/// System prompt: a plain string or an ordered contributor list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPromptConfig {
    Literal(String),
    Contributors {
        contributors: Vec<PromptContributor>,
    },
}

impl Default for SystemPromptConfig {
    fn default() -> Self {
        SystemPromptConfig::Literal(String::new())
    }
}

/// Session manager tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SessionsConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(rename = "sessionTTL", default = "default_session_ttl")]
    pub session_ttl_ms: u64,
}

fn default_max_sessions() -> usize {
    DEFAULT_MAX_SESSIONS
}

fn default_session_ttl() -> u64 {
    DEFAULT_SESSION_TTL_MS
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            session_ttl_ms: DEFAULT_SESSION_TTL_MS,
        }
    }
}

/// Storage backend selection
///
/// The core only understands `in-memory`; durable engines plug in behind the
/// `SessionStore` trait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(rename = "type", default = "default_backend_type")]
    pub backend_type: String,
}

fn default_backend_type() -> String {
    "in-memory".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_type: default_backend_type(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default)]
    pub cache: BackendConfig,
    #[serde(default)]
    pub database: BackendConfig,
}

/// Top-level agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default)]
    pub system_prompt: SystemPromptConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AgentConfig {
    /// Validate the whole document
    ///
    /// Returns the warnings on success; on failure, the error carries every
    /// issue found (warnings included), in document order.
    pub fn validate(&self) -> Result<Vec<ValidationIssue>, ConfigError> {
        let mut issues = Vec::new();

        if let SystemPromptConfig::Contributors { contributors } = &self.system_prompt {
            if contributors.is_empty() {
                issues.push(ValidationIssue::error(
                    "empty_contributors",
                    "systemPrompt.contributors must contain at least one contributor",
                ));
            }
            for contributor in contributors {
                contributor.validate_into(&mut issues);
            }
        }

        self.llm.validate_into(&mut issues);

        for (name, server) in &self.mcp_servers {
            server.validate_into(name, &mut issues);
        }

        if self.sessions.max_sessions == 0 {
            issues.push(ValidationIssue::error(
                "invalid_max_sessions",
                "sessions.maxSessions must be at least 1",
            ));
        }
        if self.sessions.session_ttl_ms == 0 {
            issues.push(ValidationIssue::error(
                "invalid_session_ttl",
                "sessions.sessionTTL must be at least 1",
            ));
        }

        if issues.iter().any(|i| i.severity == Severity::Error) {
            Err(ConfigError::new(issues))
        } else {
            Ok(issues)
        }
    }

    /// A deep copy with every secret masked, for export or logging
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.llm = copy.llm.redacted();
        for server in copy.mcp_servers.values_mut() {
            server.redact_secrets();
        }
        copy
    }
}
