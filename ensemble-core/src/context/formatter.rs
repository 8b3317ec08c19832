//! Per-provider message formatting
//!
//! Formatters translate the canonical [`InternalMessage`] log into each
//! provider's wire shape. SDK types never leak past the adapter boundary;
//! the output here is plain JSON in the provider's documented schema, which
//! adapters either post directly (anthropic wire client) or deserialize into
//! their SDK's request types (openai).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::types::{InternalMessage, MessageContent, MessagePart, Role};

/// A provider-shaped request body: message entries plus the system prompt in
/// whichever slot the provider expects it
#[derive(Debug, Clone, Default)]
pub struct FormattedRequest {
    /// System prompt for providers with a dedicated system field; `None`
    /// when the prompt is folded into `messages`
    pub system: Option<String>,
    /// Wire-shaped message entries, in order
    pub messages: Vec<Value>,
}

/// Translator between the canonical log and one provider's wire shape
pub trait Formatter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Format the log for transmission
    ///
    /// `system_prompt` overrides any system snapshot present in `messages`.
    /// Implementations must keep the provider's tool-call contract intact:
    /// every tool call is answered before the next assistant entry.
    fn format(&self, messages: &[InternalMessage], system_prompt: Option<&str>) -> FormattedRequest;
}

fn data_url(mime: &str, data: &[u8]) -> String {
    format!("data:{};base64,{}", mime, BASE64.encode(data))
}

/// Formats for the OpenAI chat-completions shape: system prompt as the
/// leading message entry, assistant `tool_calls`, and `tool` role entries
/// keyed by `tool_call_id`.
#[derive(Debug, Clone, Default)]
pub struct OpenAiFormatter;

impl OpenAiFormatter {
    fn content_value(content: &MessageContent) -> Value {
        match content {
            MessageContent::Null => Value::Null,
            MessageContent::Text(t) => Value::String(t.clone()),
            MessageContent::Parts(parts) => {
                let rendered: Vec<Value> = parts
                    .iter()
                    .map(|part| match part {
                        MessagePart::Text { text } => json!({"type": "text", "text": text}),
                        MessagePart::Image { data, mime_type } => json!({
                            "type": "image_url",
                            "image_url": {"url": data_url(mime_type, data)},
                        }),
                        // The chat-completions schema has no file part; the
                        // attachment is surfaced as an inline note.
                        MessagePart::File {
                            data,
                            mime_type,
                            filename,
                        } => json!({
                            "type": "text",
                            "text": format!(
                                "[attached file {} ({}, {} bytes)]",
                                filename.as_deref().unwrap_or("untitled"),
                                mime_type,
                                data.len()
                            ),
                        }),
                    })
                    .collect();
                Value::Array(rendered)
            }
        }
    }
}

impl Formatter for OpenAiFormatter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn format(&self, messages: &[InternalMessage], system_prompt: Option<&str>) -> FormattedRequest {
        let mut out = Vec::with_capacity(messages.len() + 1);

        let snapshot = messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text());
        let system = system_prompt
            .map(str::to_string)
            .or(snapshot)
            .filter(|s| !s.is_empty());
        if let Some(system) = &system {
            out.push(json!({"role": "system", "content": system}));
        }

        for message in messages {
            match message.role {
                Role::System => {} // folded into the leading entry above
                Role::User => out.push(json!({
                    "role": "user",
                    "content": Self::content_value(&message.content),
                })),
                Role::Assistant => {
                    let mut entry = json!({
                        "role": "assistant",
                        "content": Self::content_value(&message.content),
                    });
                    if !message.tool_calls.is_empty() {
                        let calls: Vec<Value> = message
                            .tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments.to_string(),
                                    },
                                })
                            })
                            .collect();
                        entry["tool_calls"] = Value::Array(calls);
                    }
                    out.push(entry);
                }
                Role::Tool => out.push(json!({
                    "role": "tool",
                    "tool_call_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.text(),
                })),
            }
        }

        FormattedRequest {
            system: None,
            messages: out,
        }
    }
}

/// Formats for the Anthropic messages shape: system prompt in a separate
/// field, assistant `tool_use` content blocks, and tool results folded into
/// the following user entry as `tool_result` blocks.
#[derive(Debug, Clone, Default)]
pub struct AnthropicFormatter;

impl AnthropicFormatter {
    fn user_blocks(content: &MessageContent) -> Vec<Value> {
        match content {
            MessageContent::Null => Vec::new(),
            MessageContent::Text(t) => vec![json!({"type": "text", "text": t})],
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    MessagePart::Text { text } => json!({"type": "text", "text": text}),
                    MessagePart::Image { data, mime_type } => json!({
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": BASE64.encode(data),
                        },
                    }),
                    MessagePart::File { data, mime_type, .. } => json!({
                        "type": "document",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": BASE64.encode(data),
                        },
                    }),
                })
                .collect(),
        }
    }
}

impl Formatter for AnthropicFormatter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn format(&self, messages: &[InternalMessage], system_prompt: Option<&str>) -> FormattedRequest {
        let snapshot = messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text());
        let system = system_prompt
            .map(str::to_string)
            .or(snapshot)
            .filter(|s| !s.is_empty());

        let mut out: Vec<Value> = Vec::with_capacity(messages.len());
        // Consecutive tool results accumulate here and flush as one user
        // entry, per the messages-API contract.
        let mut pending_results: Vec<Value> = Vec::new();

        for message in messages {
            if message.role != Role::Tool && !pending_results.is_empty() {
                out.push(json!({
                    "role": "user",
                    "content": std::mem::take(&mut pending_results),
                }));
            }
            match message.role {
                Role::System => {}
                Role::User => {
                    let blocks = Self::user_blocks(&message.content);
                    if !blocks.is_empty() {
                        out.push(json!({"role": "user", "content": blocks}));
                    }
                }
                Role::Assistant => {
                    let mut blocks: Vec<Value> = Vec::new();
                    let text = message.text();
                    if !text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text}));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    if !blocks.is_empty() {
                        out.push(json!({"role": "assistant", "content": blocks}));
                    }
                }
                Role::Tool => pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": [{"type": "text", "text": message.text()}],
                })),
            }
        }
        if !pending_results.is_empty() {
            out.push(json!({"role": "user", "content": pending_results}));
        }

        FormattedRequest {
            system,
            messages: out,
        }
    }
}
