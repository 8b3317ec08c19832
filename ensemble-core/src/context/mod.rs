//! Conversation state and token-budget management
//!
//! The [`ContextManager`] is the single source of truth for one session's
//! conversation: it owns the canonical message log, enforces the structural
//! invariants (tool-call closure, single leading system snapshot), tracks a
//! token estimate, and compresses history before it is formatted for a
//! provider.

pub mod compression;
pub mod formatter;

use std::collections::HashSet;

use serde_json::Value;

use crate::tokenizer::CharacterTokenizer;
use crate::types::{InternalMessage, MessagePart, Role, ToolCall};

use compression::{
    CompressionStrategy, MiddleWindowSummarizer, OldestTurnElision, SummarizerFn,
    ToolResultTruncation,
};
use formatter::{FormattedRequest, Formatter};

/// Fraction of the context window usable before compression kicks in
const TOKEN_MARGIN: f64 = 0.9;

/// Errors from invariant-violating appends
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// A tool result arrived without a matching open tool call
    #[error("tool result '{0}' does not answer any open tool call")]
    OrphanToolResult(String),

    /// A tool call id was answered twice
    #[error("tool call '{0}' already has a result")]
    DuplicateToolResult(String),

    /// An assistant message was appended while tool calls were unresolved
    #[error("{0} tool call(s) still awaiting results")]
    PendingToolCalls(usize),
}

/// Owner of one session's conversation log
pub struct ContextManager {
    messages: Vec<InternalMessage>,
    system_prompt: Option<String>,
    tokenizer: CharacterTokenizer,
    max_input_tokens: usize,
    strategies: Vec<Box<dyn CompressionStrategy>>,
    /// Tool call ids awaiting their result message
    open_tool_calls: HashSet<String>,
}

impl ContextManager {
    /// Create a manager with the default two-stage compression pipeline
    pub fn new(max_input_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            system_prompt: None,
            tokenizer: CharacterTokenizer::new(),
            max_input_tokens,
            strategies: vec![
                Box::new(OldestTurnElision),
                Box::new(ToolResultTruncation),
            ],
            open_tool_calls: HashSet::new(),
        }
    }

    /// Enable the optional third compression stage with an injected
    /// summarizer
    pub fn with_summarizer(mut self, summarize: SummarizerFn) -> Self {
        self.strategies
            .push(Box::new(MiddleWindowSummarizer::new(summarize)));
        self
    }

    /// Adjust the context window, e.g. after an LLM switch
    pub fn set_max_input_tokens(&mut self, max_input_tokens: usize) {
        self.max_input_tokens = max_input_tokens;
    }

    pub fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    /// Budget enforced by compression (90 % of the window)
    pub fn token_budget(&self) -> usize {
        (self.max_input_tokens as f64 * TOKEN_MARGIN) as usize
    }

    /// Append a user message with optional media attachments
    pub fn add_user_message(
        &mut self,
        text: &str,
        image: Option<crate::types::ImageInput>,
        file: Option<crate::types::FileInput>,
    ) {
        let message = if image.is_none() && file.is_none() {
            InternalMessage::user(text)
        } else {
            let mut parts = vec![MessagePart::Text { text: text.into() }];
            if let Some(image) = image {
                parts.push(MessagePart::Image {
                    data: image.data,
                    mime_type: image.mime_type,
                });
            }
            if let Some(file) = file {
                parts.push(MessagePart::File {
                    data: file.data,
                    mime_type: file.mime_type,
                    filename: file.filename,
                });
            }
            InternalMessage::user_with_parts(parts)
        };
        self.messages.push(message);
    }

    /// Append an assistant message, registering its tool calls as open
    pub fn add_assistant_message(
        &mut self,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Result<&InternalMessage, ContextError> {
        if !self.open_tool_calls.is_empty() {
            return Err(ContextError::PendingToolCalls(self.open_tool_calls.len()));
        }
        for call in &tool_calls {
            self.open_tool_calls.insert(call.id.clone());
        }
        self.messages
            .push(InternalMessage::assistant(content, tool_calls));
        Ok(self.messages.last().expect("just pushed"))
    }

    /// Append a tool result answering an open call
    ///
    /// Non-string payloads are serialized to JSON.
    pub fn add_tool_result(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        result: Value,
    ) -> Result<&InternalMessage, ContextError> {
        if !self.open_tool_calls.remove(tool_call_id) {
            let already_answered = self
                .messages
                .iter()
                .any(|m| m.tool_call_id.as_deref() == Some(tool_call_id));
            return Err(if already_answered {
                ContextError::DuplicateToolResult(tool_call_id.to_string())
            } else {
                ContextError::OrphanToolResult(tool_call_id.to_string())
            });
        }
        let content = match result {
            Value::String(s) => s,
            other => other.to_string(),
        };
        self.messages
            .push(InternalMessage::tool_result(tool_call_id, tool_name, content));
        Ok(self.messages.last().expect("just pushed"))
    }

    /// Replace the cached system snapshot, keeping it as the leading message
    pub fn set_system_prompt(&mut self, text: &str) {
        self.system_prompt = Some(text.to_string());
        match self.messages.first() {
            Some(m) if m.role == Role::System => {
                self.messages[0] = InternalMessage::system(text);
            }
            _ => self.messages.insert(0, InternalMessage::system(text)),
        }
    }

    /// The cached system prompt for the current turn
    pub fn formatted_system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn messages(&self) -> &[InternalMessage] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Tool call ids still awaiting results
    pub fn open_tool_calls(&self) -> usize {
        self.open_tool_calls.len()
    }

    /// Restore state from persisted history
    pub fn hydrate(&mut self, messages: Vec<InternalMessage>) {
        self.system_prompt = messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text());
        self.open_tool_calls.clear();
        for message in &messages {
            if message.role == Role::Assistant {
                for call in &message.tool_calls {
                    self.open_tool_calls.insert(call.id.clone());
                }
            }
            if let Some(id) = &message.tool_call_id {
                self.open_tool_calls.remove(id);
            }
        }
        self.messages = messages;
    }

    /// Empty the log entirely
    pub fn clear(&mut self) {
        self.messages.clear();
        self.system_prompt = None;
        self.open_tool_calls.clear();
    }

    /// Truncate to the (possibly empty) system snapshot
    pub fn reset(&mut self) {
        let snapshot = self
            .messages
            .first()
            .filter(|m| m.role == Role::System)
            .cloned();
        self.messages.clear();
        self.open_tool_calls.clear();
        if let Some(snapshot) = snapshot {
            self.messages.push(snapshot);
        }
    }

    /// Current token estimate for the whole log
    pub fn count_total_tokens(&self) -> usize {
        let mut total = self.tokenizer.estimate_messages(&self.messages);
        // A prompt not yet snapshotted into the log still ships with every
        // request.
        if self.messages.first().map(|m| m.role) != Some(Role::System) {
            if let Some(prompt) = &self.system_prompt {
                total += self.tokenizer.estimate_text(prompt);
            }
        }
        total
    }

    /// Apply compression strategies until the estimate fits the budget
    ///
    /// Returns the names of the strategies that changed anything.
    pub fn compress_if_needed(&mut self) -> Vec<&'static str> {
        let budget = self.token_budget();
        let mut applied = Vec::new();
        if self.count_total_tokens() <= budget {
            return applied;
        }
        let tokenizer = self.tokenizer.clone();
        let estimate = move |messages: &[InternalMessage]| tokenizer.estimate_messages(messages);
        for strategy in &self.strategies {
            if strategy.compress(&mut self.messages, budget, &estimate) {
                applied.push(strategy.name());
                log::warn!(
                    "conversation compressed via {} ({} tokens, budget {})",
                    strategy.name(),
                    estimate(&self.messages),
                    budget
                );
            }
            if estimate(&self.messages) <= budget {
                break;
            }
        }
        applied
    }

    /// Compress if needed, then format for the given provider shape
    pub fn get_formatted_messages(
        &mut self,
        formatter: &dyn Formatter,
        system_prompt: Option<&str>,
    ) -> FormattedRequest {
        if let Some(prompt) = system_prompt {
            self.set_system_prompt(prompt);
        }
        self.compress_if_needed();
        formatter.format(&self.messages, self.system_prompt.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::formatter::OpenAiFormatter;
    use serde_json::json;

    fn closed_tool_turn(ctx: &mut ContextManager, question: &str, payload: &str) {
        ctx.add_user_message(question, None, None);
        let call = ToolCall::new("fetch", json!({}));
        let id = call.id.clone();
        ctx.add_assistant_message(None, vec![call]).unwrap();
        ctx.add_tool_result(&id, "fetch", json!(payload)).unwrap();
        ctx.add_assistant_message(Some("done".into()), vec![])
            .unwrap();
    }

    #[test]
    fn test_append_order_and_snapshot() {
        let mut ctx = ContextManager::new(10_000);
        ctx.add_user_message("Hello", None, None);
        ctx.set_system_prompt("be kind");

        assert_eq!(ctx.messages()[0].role, Role::System);
        assert_eq!(ctx.messages()[1].text(), "Hello");

        // Re-setting replaces rather than stacking system messages.
        ctx.set_system_prompt("be terse");
        assert_eq!(ctx.messages()[0].text(), "be terse");
        assert_eq!(ctx.message_count(), 2);
    }

    #[test]
    fn test_tool_call_closure_enforced() {
        let mut ctx = ContextManager::new(10_000);
        ctx.add_user_message("go", None, None);
        let call = ToolCall::new("echo", json!({"m": 1}));
        let id = call.id.clone();
        ctx.add_assistant_message(None, vec![call]).unwrap();

        // Next assistant message is rejected until the call is answered.
        let err = ctx.add_assistant_message(Some("early".into()), vec![]);
        assert!(matches!(err, Err(ContextError::PendingToolCalls(1))));

        ctx.add_tool_result(&id, "echo", json!("out")).unwrap();
        assert!(ctx.add_assistant_message(Some("done".into()), vec![]).is_ok());
        assert_eq!(ctx.open_tool_calls(), 0);
    }

    #[test]
    fn test_orphan_and_duplicate_results_rejected() {
        let mut ctx = ContextManager::new(10_000);
        assert!(matches!(
            ctx.add_tool_result("nope", "echo", json!(1)),
            Err(ContextError::OrphanToolResult(_))
        ));

        ctx.add_user_message("go", None, None);
        let call = ToolCall::new("echo", json!({}));
        let id = call.id.clone();
        ctx.add_assistant_message(None, vec![call]).unwrap();
        ctx.add_tool_result(&id, "echo", json!(1)).unwrap();
        assert!(matches!(
            ctx.add_tool_result(&id, "echo", json!(2)),
            Err(ContextError::DuplicateToolResult(_))
        ));
    }

    #[test]
    fn test_non_string_results_serialized() {
        let mut ctx = ContextManager::new(10_000);
        ctx.add_user_message("go", None, None);
        let call = ToolCall::new("lookup", json!({}));
        let id = call.id.clone();
        ctx.add_assistant_message(None, vec![call]).unwrap();
        let msg = ctx
            .add_tool_result(&id, "lookup", json!({"hits": 3}))
            .unwrap();
        assert_eq!(msg.text(), r#"{"hits":3}"#);
    }

    #[test]
    fn test_reset_keeps_snapshot() {
        let mut ctx = ContextManager::new(10_000);
        ctx.set_system_prompt("sys");
        ctx.add_user_message("one", None, None);
        ctx.add_assistant_message(Some("two".into()), vec![]).unwrap();

        ctx.reset();
        assert_eq!(ctx.message_count(), 1);
        assert_eq!(ctx.messages()[0].role, Role::System);
    }

    #[test]
    fn test_reset_without_snapshot_empties() {
        let mut ctx = ContextManager::new(10_000);
        ctx.add_user_message("one", None, None);
        ctx.reset();
        assert_eq!(ctx.message_count(), 0);
    }

    #[test]
    fn test_compression_respects_budget_and_closure() {
        // ~1000-token window: budget is 900.
        let mut ctx = ContextManager::new(1000);
        for i in 0..6 {
            closed_tool_turn(&mut ctx, &format!("q{} {}", i, "x".repeat(600)), &"y".repeat(600));
        }
        ctx.add_user_message("final question", None, None);
        assert!(ctx.count_total_tokens() > ctx.token_budget());

        let applied = ctx.compress_if_needed();
        assert!(!applied.is_empty());
        assert!(ctx.count_total_tokens() <= ctx.token_budget());

        // Closure still holds: every result answers a call in the kept log.
        let mut open: HashSet<String> = HashSet::new();
        for message in ctx.messages() {
            for call in &message.tool_calls {
                open.insert(call.id.clone());
            }
            if let Some(id) = &message.tool_call_id {
                assert!(open.remove(id), "orphan tool result after compression");
            }
        }
        // The newest user message survives.
        assert!(ctx
            .messages()
            .iter()
            .any(|m| m.text() == "final question"));
    }

    #[test]
    fn test_formatting_compresses_first() {
        let mut ctx = ContextManager::new(500);
        for _ in 0..5 {
            ctx.add_user_message(&"a".repeat(500), None, None);
            ctx.add_assistant_message(Some("b".repeat(500)), vec![])
                .unwrap();
        }
        let request = ctx.get_formatted_messages(&OpenAiFormatter, Some("sys"));
        assert!(ctx.count_total_tokens() <= ctx.token_budget());
        assert_eq!(request.messages[0]["role"], "system");
    }

    #[test]
    fn test_hydrate_rebuilds_open_calls() {
        let call = ToolCall::new("echo", json!({}));
        let id = call.id.clone();
        let history = vec![
            InternalMessage::system("sys"),
            InternalMessage::user("go"),
            InternalMessage::assistant(None, vec![call]),
            InternalMessage::tool_result(id, "echo", "out"),
        ];
        let mut ctx = ContextManager::new(10_000);
        ctx.hydrate(history);
        assert_eq!(ctx.open_tool_calls(), 0);
        assert_eq!(ctx.formatted_system_prompt(), Some("sys"));
    }
}
