//! Top-level error types for ensemble
//!
//! Each subsystem has its own error enum (`LlmError`, `McpError`,
//! `StoreError`, `ConfigError`); this module flattens them into the
//! user-facing [`Error`] returned by the agent facade.

use thiserror::Error;

use crate::config::{ConfigError, ValidationIssue};
use crate::llm::LlmError;
use crate::mcp::McpError;
use crate::session::store::StoreError;

/// Top-level error type for agent operations
#[derive(Debug, Error)]
pub enum Error {
    /// A method was called before `start()`
    #[error("agent has not been started")]
    NotStarted,

    /// A method was called after `stop()`
    #[error("agent has been stopped")]
    Stopped,

    /// Configuration was rejected at start or reconfiguration time
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// User input violated the active model's constraints
    #[error("input validation failed for {provider}/{model}")]
    InputValidation {
        issues: Vec<ValidationIssue>,
        provider: String,
        model: String,
    },

    /// The named session does not exist
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// LLM provider failure
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// MCP connection or tool failure
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// Persistence backend failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true when the operation may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Llm(e) => e.is_retryable(),
            Error::Mcp(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::NotStarted | Error::Stopped)
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Error::SessionNotFound(_))
    }

    pub fn is_input_validation(&self) -> bool {
        matches!(self, Error::InputValidation { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, Error>;
