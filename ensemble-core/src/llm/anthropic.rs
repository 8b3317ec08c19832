//! In-built router: direct Anthropic Messages API client
//!
//! This adapter speaks the messages endpoint itself rather than going
//! through the unified SDK path: it posts the formatter's wire-shaped
//! entries, partitions the response content into text and `tool_use` blocks,
//! and converts the latter into canonical tool-call records.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::context::formatter::{AnthropicFormatter, FormattedRequest, Formatter};
use crate::events::EventSink;
use crate::mcp::ToolInfo;
use crate::types::{FinishReason, TokenUsage, ToolCall};

use super::registry::{self, LlmProvider};
use super::retry::{retry_with_backoff, RetryConfig};
use super::{LlmAdapter, LlmError, LlmRouter, StepResult, StepType};

const DEFAULT_API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter
pub struct AnthropicAdapter {
    config: LlmConfig,
    api_base: String,
    http: reqwest::Client,
    formatter: Arc<AnthropicFormatter>,
    retry: RetryConfig,
    max_input_tokens: usize,
    supports_vision: bool,
}

impl AnthropicAdapter {
    pub fn new(config: LlmConfig) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    /// Construct against a non-default endpoint (used by tests)
    pub fn with_api_base(config: LlmConfig, api_base: impl Into<String>) -> Self {
        let model = registry::find_model(LlmProvider::Anthropic, &config.model);
        let max_input_tokens = config
            .max_input_tokens
            .or(model.map(|m| m.max_input_tokens))
            .unwrap_or(registry::COMPATIBLE_DEFAULT_CONTEXT);
        let supports_vision = model.map(|m| m.supports_vision).unwrap_or(false);

        Self {
            config,
            api_base: api_base.into(),
            http: reqwest::Client::new(),
            formatter: Arc::new(AnthropicFormatter),
            retry: RetryConfig::default(),
            max_input_tokens,
            supports_vision,
        }
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.config.api_key)
                .map_err(|_| LlmError::Auth("api key contains invalid characters".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    async fn post_messages(&self, body: &MessagesRequest<'_>) -> Result<MessagesResponse, LlmError> {
        let url = format!("{}/v1/messages", self.api_base);
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<MessagesResponse>()
                .await
                .map_err(|e| LlmError::Other(format!("malformed response: {}", e)));
        }

        let detail = match response.json::<ApiErrorEnvelope>().await {
            Ok(envelope) => envelope.error.message,
            Err(_) => format!("http status {}", status),
        };
        Err(classify_status(status, detail))
    }
}

fn classify_status(status: StatusCode, detail: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::Auth(detail),
        404 => LlmError::ModelRejection(detail),
        429 => LlmError::RateLimited(detail),
        400 | 413 | 422 => LlmError::ModelRejection(detail),
        500..=599 => LlmError::Unavailable(detail),
        _ => LlmError::Other(detail),
    }
}

fn map_stop_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("max_tokens") => FinishReason::Length,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

#[async_trait::async_trait]
impl LlmAdapter for AnthropicAdapter {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::Anthropic
    }

    fn router(&self) -> LlmRouter {
        LlmRouter::InBuilt
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    fn formatter(&self) -> Arc<dyn Formatter> {
        self.formatter.clone()
    }

    async fn generate(
        &self,
        request: FormattedRequest,
        tools: &[ToolInfo],
        stream: bool,
        events: &EventSink,
    ) -> Result<StepResult, LlmError> {
        let tool_defs: Vec<AnthropicTool> = tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect();

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self
                .config
                .max_output_tokens
                .map(|v| v as u32)
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            system: request.system.as_deref(),
            messages: &request.messages,
            temperature: self.config.temperature,
            tools: if tool_defs.is_empty() {
                None
            } else {
                Some(tool_defs)
            },
        };

        let response = retry_with_backoff(|| self.post_messages(&body), &self.retry).await?;

        // Partition content blocks into text and tool_use.
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ResponseBlock::Text { text: t } => text.push_str(&t),
                ResponseBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    });
                }
                ResponseBlock::Other => {}
            }
        }

        if stream && !text.is_empty() {
            events.chunk(text.clone());
        }

        let finish_reason = if tool_calls.is_empty() {
            map_stop_reason(response.stop_reason.as_deref())
        } else {
            FinishReason::ToolCalls
        };
        let step_type = if tool_calls.is_empty() {
            StepType::Final
        } else {
            StepType::Continue
        };

        Ok(StepResult {
            text,
            tool_calls,
            finish_reason,
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            }),
            step_type,
        })
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<UsagePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct UsagePayload {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}
