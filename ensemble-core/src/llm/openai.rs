//! Unified router: OpenAI and OpenAI-compatible endpoints
//!
//! This adapter rides the vendor-agnostic SDK (`async-openai`), which speaks
//! the chat-completions protocol with native step-wise tool use. The same
//! adapter serves `openai` and any `openai-compatible` server via a custom
//! API base.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequestArgs, FinishReason as SdkFinishReason, FunctionObject,
};
use async_openai::Client;
use futures::StreamExt;

use crate::config::{ConfigError, LlmConfig, ValidationIssue};
use crate::context::formatter::{FormattedRequest, Formatter, OpenAiFormatter};
use crate::events::EventSink;
use crate::mcp::ToolInfo;
use crate::types::{FinishReason, TokenUsage, ToolCall};

use super::registry::{self, LlmProvider};
use super::retry::{retry_with_backoff, RetryConfig};
use super::{LlmAdapter, LlmError, LlmRouter, StepResult, StepType};

/// Chat-completions adapter for openai / openai-compatible providers
pub struct OpenAiAdapter {
    config: LlmConfig,
    client: Client<OpenAIConfig>,
    formatter: Arc<OpenAiFormatter>,
    retry: RetryConfig,
    max_input_tokens: usize,
    supports_vision: bool,
}

impl OpenAiAdapter {
    pub fn new(config: LlmConfig) -> Result<Self, ConfigError> {
        let mut sdk_config = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base_url) = &config.base_url {
            if config.provider != LlmProvider::OpenAiCompatible {
                return Err(ConfigError::single(ValidationIssue::error(
                    "base_url_not_allowed",
                    "baseURL is only permitted for openai-compatible",
                )));
            }
            sdk_config = sdk_config.with_api_base(base_url.clone());
        }

        let model = registry::find_model(config.provider, &config.model);
        let max_input_tokens = config
            .max_input_tokens
            .or(model.map(|m| m.max_input_tokens))
            .unwrap_or(registry::COMPATIBLE_DEFAULT_CONTEXT);
        let supports_vision = config.provider == LlmProvider::OpenAi
            && model.map(|m| m.supports_vision).unwrap_or(false);

        Ok(Self {
            config,
            client: Client::with_config(sdk_config),
            formatter: Arc::new(OpenAiFormatter),
            retry: RetryConfig::default(),
            max_input_tokens,
            supports_vision,
        })
    }

    fn build_request(
        &self,
        request: &FormattedRequest,
        tools: &[ToolInfo],
        stream: bool,
    ) -> Result<async_openai::types::CreateChatCompletionRequest, LlmError> {
        let messages: Vec<ChatCompletionRequestMessage> = request
            .messages
            .iter()
            .map(|entry| serde_json::from_value(entry.clone()))
            .collect::<Result<_, _>>()
            .map_err(|e| LlmError::Other(format!("message formatting failed: {}", e)))?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.config.model).messages(messages);
        if stream {
            args.stream(true);
        }
        if let Some(t) = self.config.temperature {
            args.temperature(t);
        }
        if let Some(max) = self.config.max_output_tokens {
            args.max_tokens(max as u32);
        }
        if !tools.is_empty() {
            let tool_defs: Vec<ChatCompletionTool> = tools
                .iter()
                .map(|t| ChatCompletionTool {
                    r#type: ChatCompletionToolType::Function,
                    function: FunctionObject {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                        strict: None,
                    },
                })
                .collect();
            args.tools(tool_defs);
        }

        args.build()
            .map_err(|e| LlmError::Other(format!("request build failed: {}", e)))
    }

    async fn generate_once(
        &self,
        request: &FormattedRequest,
        tools: &[ToolInfo],
    ) -> Result<StepResult, LlmError> {
        let sdk_request = self.build_request(request, tools, false)?;
        let response = self
            .client
            .chat()
            .create(sdk_request)
            .await
            .map_err(map_sdk_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Other("provider returned no choices".into()))?;

        let text = choice.message.content.unwrap_or_default();
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect::<Vec<_>>();

        Ok(StepResult {
            finish_reason: map_finish_reason(choice.finish_reason, !tool_calls.is_empty()),
            step_type: if tool_calls.is_empty() {
                StepType::Final
            } else {
                StepType::Continue
            },
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens as usize,
                output_tokens: u.completion_tokens as usize,
            }),
            text,
            tool_calls,
        })
    }

    async fn generate_streaming(
        &self,
        request: &FormattedRequest,
        tools: &[ToolInfo],
        events: &EventSink,
    ) -> Result<StepResult, LlmError> {
        let sdk_request = self.build_request(request, tools, true)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(sdk_request)
            .await
            .map_err(map_sdk_error)?;

        let mut text = String::new();
        // Tool-call fragments arrive indexed; accumulate name/arguments per
        // index and assemble once the stream ends.
        let mut partial_calls: BTreeMap<i32, (String, String, String)> = BTreeMap::new();
        let mut finish_reason = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_sdk_error)?;
            let Some(choice) = chunk.choices.into_iter().next() else {
                continue;
            };
            if let Some(delta) = choice.delta.content {
                if !delta.is_empty() {
                    events.chunk(delta.clone());
                    text.push_str(&delta);
                }
            }
            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let slot = partial_calls.entry(fragment.index).or_default();
                if let Some(id) = fragment.id {
                    slot.0 = id;
                }
                if let Some(function) = fragment.function {
                    if let Some(name) = function.name {
                        slot.1.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        slot.2.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }

        let tool_calls: Vec<ToolCall> = partial_calls
            .into_values()
            .map(|(id, name, arguments)| ToolCall {
                id,
                name,
                arguments: parse_arguments(&arguments),
            })
            .collect();

        Ok(StepResult {
            finish_reason: map_finish_reason(finish_reason, !tool_calls.is_empty()),
            step_type: if tool_calls.is_empty() {
                StepType::Final
            } else {
                StepType::Continue
            },
            usage: None,
            text,
            tool_calls,
        })
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

fn map_finish_reason(reason: Option<SdkFinishReason>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match reason {
        Some(SdkFinishReason::Stop) => FinishReason::Stop,
        Some(SdkFinishReason::Length) => FinishReason::Length,
        Some(SdkFinishReason::ToolCalls) => FinishReason::ToolCalls,
        Some(SdkFinishReason::ContentFilter) => FinishReason::ContentFilter,
        _ => FinishReason::Unknown,
    }
}

fn map_sdk_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) => LlmError::Network(e.to_string()),
        OpenAIError::StreamError(e) => LlmError::Network(e),
        OpenAIError::JSONDeserialize(e) => LlmError::Other(format!("malformed response: {}", e)),
        OpenAIError::InvalidArgument(e) => LlmError::ModelRejection(e),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.clone().unwrap_or_default();
            let message = api.message.clone();
            let lowered = format!("{} {}", kind, message).to_lowercase();
            if lowered.contains("rate limit") || lowered.contains("insufficient_quota") {
                LlmError::RateLimited(message)
            } else if lowered.contains("api key") || lowered.contains("authentication") {
                LlmError::Auth(message)
            } else if lowered.contains("does not exist") || lowered.contains("model_not_found") {
                LlmError::ModelRejection(message)
            } else if lowered.contains("server error") || lowered.contains("overloaded") {
                LlmError::Unavailable(message)
            } else {
                LlmError::Other(message)
            }
        }
        other => LlmError::Other(other.to_string()),
    }
}

#[async_trait::async_trait]
impl LlmAdapter for OpenAiAdapter {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    fn router(&self) -> LlmRouter {
        LlmRouter::Unified
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
        if stream {
            // Streams are not replayed; transient failures surface directly.
            self.generate_streaming(&request, tools, events).await
        } else {
            retry_with_backoff(|| self.generate_once(&request, tools), &self.retry).await
        }
    }
}
