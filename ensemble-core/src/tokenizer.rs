//! Token estimation utilities
//!
//! Providers bill by tokens but the orchestrator only needs a conservative
//! estimate for compression decisions. The default heuristic is ~4 characters
//! per token.

use crate::types::{InternalMessage, MessageContent, MessagePart};

/// Simple character-based token estimator
#[derive(Debug, Clone)]
pub struct CharacterTokenizer {
    chars_per_token: usize,
}

/// Structural overhead per message (role marker, framing)
const MESSAGE_OVERHEAD: usize = 4;

impl CharacterTokenizer {
    /// Create a new tokenizer with the default 4 characters per token
    pub fn new() -> Self {
        Self { chars_per_token: 4 }
    }

    /// Create a tokenizer with a custom characters-per-token ratio
    pub fn with_chars_per_token(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Estimate the number of tokens in the given text
    pub fn estimate_text(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token)
    }

    /// Estimate tokens for a single message including structure overhead
    pub fn estimate_message(&self, message: &InternalMessage) -> usize {
        let mut total = MESSAGE_OVERHEAD;
        total += match &message.content {
            MessageContent::Null => 0,
            MessageContent::Text(t) => self.estimate_text(t),
            MessageContent::Parts(parts) => parts.iter().map(|p| self.estimate_part(p)).sum(),
        };
        for call in &message.tool_calls {
            total += self.estimate_text(&call.name)
                + self.estimate_text(&call.id)
                + self.estimate_text(&call.arguments.to_string())
                + 10;
        }
        if let Some(id) = &message.tool_call_id {
            total += self.estimate_text(id);
        }
        total
    }

    /// Estimate tokens for a whole conversation
    pub fn estimate_messages(&self, messages: &[InternalMessage]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }

    fn estimate_part(&self, part: &MessagePart) -> usize {
        match part {
            MessagePart::Text { text } => self.estimate_text(text),
            // Images cost roughly 1 token per 750 bytes plus base overhead
            MessagePart::Image { data, .. } => data.len() / 750 + 85,
            MessagePart::File { data, .. } => data.len() / 500 + 50,
        }
    }
}

impl Default for CharacterTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;
    use serde_json::json;

    #[test]
    fn test_text_estimation_rounds_up() {
        let tokenizer = CharacterTokenizer::new();
        assert_eq!(tokenizer.estimate_text("hell"), 1);
        assert_eq!(tokenizer.estimate_text("hello"), 2);
        assert_eq!(tokenizer.estimate_text(""), 0);
    }

    #[test]
    fn test_message_includes_overhead() {
        let tokenizer = CharacterTokenizer::new();
        let msg = InternalMessage::user("12345678");
        // 8 chars / 4 = 2 tokens + 4 overhead
        assert_eq!(tokenizer.estimate_message(&msg), 6);
    }

    #[test]
    fn test_tool_calls_counted() {
        let tokenizer = CharacterTokenizer::new();
        let plain = InternalMessage::assistant(Some("ok".into()), vec![]);
        let with_call = InternalMessage::assistant(
            Some("ok".into()),
            vec![ToolCall::new("search", json!({"q": "rust"}))],
        );
        assert!(tokenizer.estimate_message(&with_call) > tokenizer.estimate_message(&plain));
    }

    #[test]
    fn test_conversation_sums_messages() {
        let tokenizer = CharacterTokenizer::new();
        let messages = vec![InternalMessage::user("aaaa"), InternalMessage::user("bbbb")];
        assert_eq!(
            tokenizer.estimate_messages(&messages),
            tokenizer.estimate_message(&messages[0]) + tokenizer.estimate_message(&messages[1])
        );
    }

    #[test]
    fn test_custom_ratio() {
        let tokenizer = CharacterTokenizer::with_chars_per_token(2);
        assert_eq!(tokenizer.estimate_text("abcd"), 2);
    }
}
