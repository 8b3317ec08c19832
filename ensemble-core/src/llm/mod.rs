//! LLM adapters
//!
//! One adapter per (provider × router) combination, behind the common
//! [`LlmAdapter`] trait. The chat session drives the tool loop and calls
//! [`LlmAdapter::generate`] once per step; adapters translate the formatted
//! message array into a provider call, map failures into the typed
//! [`LlmError`] taxonomy, and may emit streaming chunks on the event bus.
//!
//! Routers:
//! - [`LlmRouter::Unified`] — the vendor-agnostic SDK path (openai and
//!   openai-compatible endpoints via `async-openai`)
//! - [`LlmRouter::InBuilt`] — a direct wire client (anthropic)

pub mod anthropic;
pub mod openai;
pub mod registry;
pub mod retry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, LlmConfig, ValidationIssue};
use crate::context::formatter::{Formatter, FormattedRequest};
use crate::events::EventSink;
use crate::mcp::ToolInfo;
use crate::types::{FinishReason, TokenUsage, ToolCall};

pub use anthropic::AnthropicAdapter;
pub use openai::OpenAiAdapter;
pub use registry::LlmProvider;

/// Strategy used to drive multi-step tool use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LlmRouter {
    /// Vendor-agnostic SDK drives the provider
    #[serde(rename = "unified", alias = "vercel")]
    Unified,
    /// Provider SDK invoked directly, steps resolved in-adapter family
    #[serde(rename = "in-built", alias = "inbuilt")]
    InBuilt,
}

/// Where a step sits in the tool loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    Initial,
    Continue,
    ToolResult,
    Final,
}

/// Result of a single adapter invocation
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Text produced in this step (concatenated deltas when streaming)
    pub text: String,
    /// Tool invocations requested by the model, in order
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: Option<TokenUsage>,
    pub step_type: StepType,
}

impl StepResult {
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// Errors from LLM providers
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Authentication or authorization failed; never retried
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rate limiting or throttling
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network or connectivity issue
    #[error("network error: {0}")]
    Network(String),

    /// Service temporarily unavailable (5xx)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The model or provider rejected the request (unknown model, content
    /// policy, malformed input); never retried
    #[error("model rejected request: {0}")]
    ModelRejection(String),

    /// The turn was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// Anything else, with the provider message preserved
    #[error("llm error: {0}")]
    Other(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_) | LlmError::Network(_) | LlmError::Unavailable(_)
        )
    }
}

/// Common adapter contract
///
/// Adapters are stateless between turns apart from cached model metadata.
/// They never store the context manager; the formatted request is handed in
/// per call.
#[async_trait::async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Model identifier, e.g. `gpt-4o-mini`
    fn model_name(&self) -> &str;

    fn provider(&self) -> LlmProvider;

    fn router(&self) -> LlmRouter;

    /// Context window used for compression decisions
    fn max_input_tokens(&self) -> usize;

    /// Tool-loop iteration cap for this configuration
    fn max_iterations(&self) -> usize;

    fn supports_vision(&self) -> bool;

    /// The formatter producing this provider's wire shape
    fn formatter(&self) -> Arc<dyn Formatter>;

    /// Estimate token count for text (~4 characters per token by default)
    fn estimate_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }

    /// Execute one step: send the formatted conversation plus tools, return
    /// text and/or tool calls
    ///
    /// With `stream` set, adapters emit `llmservice:chunk` events on `events`
    /// as deltas arrive; the returned `text` is the full concatenation.
    async fn generate(
        &self,
        request: FormattedRequest,
        tools: &[ToolInfo],
        stream: bool,
        events: &EventSink,
    ) -> Result<StepResult, LlmError>;
}

#[async_trait::async_trait]
impl LlmAdapter for Arc<dyn LlmAdapter> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn provider(&self) -> LlmProvider {
        (**self).provider()
    }

    fn router(&self) -> LlmRouter {
        (**self).router()
    }

    fn max_input_tokens(&self) -> usize {
        (**self).max_input_tokens()
    }

    fn max_iterations(&self) -> usize {
        (**self).max_iterations()
    }

    fn supports_vision(&self) -> bool {
        (**self).supports_vision()
    }

    fn formatter(&self) -> Arc<dyn Formatter> {
        (**self).formatter()
    }

    fn estimate_tokens(&self, text: &str) -> usize {
        (**self).estimate_tokens(text)
    }

    async fn generate(
        &self,
        request: FormattedRequest,
        tools: &[ToolInfo],
        stream: bool,
        events: &EventSink,
    ) -> Result<StepResult, LlmError> {
        (**self).generate(request, tools, stream, events).await
    }
}

/// Build the adapter for a resolved LLM configuration
///
/// The config must already have passed validation; this only dispatches on
/// (provider, router).
pub fn create_adapter(config: &LlmConfig) -> Result<Arc<dyn LlmAdapter>, ConfigError> {
    match config.provider {
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicAdapter::new(config.clone()))),
        LlmProvider::OpenAi | LlmProvider::OpenAiCompatible => {
            OpenAiAdapter::new(config.clone()).map(|a| Arc::new(a) as Arc<dyn LlmAdapter>)
        }
    }
}

/// Factory producing adapters from resolved configurations
///
/// Sessions build and swap their adapters through one of these. The default
/// wraps [`create_adapter`]; tests inject factories that return scripted
/// adapters instead.
pub type AdapterFactory =
    Arc<dyn Fn(&LlmConfig) -> Result<Arc<dyn LlmAdapter>, ConfigError> + Send + Sync>;

/// The production factory: registry-backed adapters via [`create_adapter`]
pub fn default_adapter_factory() -> AdapterFactory {
    Arc::new(create_adapter)
}

/// Validate a turn's input against the active model's constraints
///
/// Called before any provider request; failures surface as
/// `inputValidationFailed` without consuming tokens.
pub fn validate_input(
    adapter: &dyn LlmAdapter,
    image: Option<&crate::types::ImageInput>,
    file: Option<&crate::types::FileInput>,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if image.is_some() && !adapter.supports_vision() {
        issues.push(ValidationIssue::error(
            "image_not_supported",
            format!("model '{}' does not accept image input", adapter.model_name()),
        ));
    }
    if let Some(file) = file {
        if file.data.len() > registry::MAX_ATTACHMENT_BYTES {
            issues.push(
                ValidationIssue::error(
                    "file_too_large",
                    format!(
                        "file attachment is {} bytes (limit {})",
                        file.data.len(),
                        registry::MAX_ATTACHMENT_BYTES
                    ),
                )
                .with_context(serde_json::json!({
                    "size": file.data.len(),
                    "limit": registry::MAX_ATTACHMENT_BYTES,
                })),
            );
        }
    }
    issues
}
