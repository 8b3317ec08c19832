//! Compression strategies for keeping conversations inside token budgets
//!
//! Strategies run in order until the estimate fits the budget. They operate
//! on whole turn groups (a user message plus the assistant/tool messages
//! that answer it) so the tool-call closure invariant survives compression,
//! and they always preserve the leading system snapshot and the most recent
//! user turn.

use std::ops::Range;
use std::sync::Arc;

use crate::types::{InternalMessage, MessageContent, Role};

/// Token estimator over a message slice
pub type TokenEstimator<'a> = &'a dyn Fn(&[InternalMessage]) -> usize;

/// Callback that synthesizes a summary of a message span
pub type SummarizerFn = Arc<dyn Fn(&[InternalMessage]) -> String + Send + Sync>;

/// One stage of the compression pipeline
pub trait CompressionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shrink `messages` toward `budget`; returns true when anything changed
    fn compress(
        &self,
        messages: &mut Vec<InternalMessage>,
        budget: usize,
        estimate: TokenEstimator<'_>,
    ) -> bool;
}

/// Index ranges of user-led turn groups, excluding the system snapshot
///
/// Each group starts at a `User` message and runs until the next one, so an
/// assistant message and its tool results always share a group.
pub fn turn_groups(messages: &[InternalMessage]) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start: Option<usize> = None;
    for (i, message) in messages.iter().enumerate() {
        if message.role == Role::User {
            if let Some(s) = start.take() {
                groups.push(s..i);
            }
            start = Some(i);
        }
    }
    if let Some(s) = start {
        groups.push(s..messages.len());
    }
    groups
}

/// Drops the oldest complete turn groups until the budget fits
///
/// The most recent user turn is never dropped, nor is the system snapshot.
#[derive(Debug, Clone, Default)]
pub struct OldestTurnElision;

impl CompressionStrategy for OldestTurnElision {
    fn name(&self) -> &'static str {
        "oldest-turn-elision"
    }

    fn compress(
        &self,
        messages: &mut Vec<InternalMessage>,
        budget: usize,
        estimate: TokenEstimator<'_>,
    ) -> bool {
        let mut changed = false;
        while estimate(messages) > budget {
            let groups = turn_groups(messages);
            if groups.len() <= 1 {
                break;
            }
            let oldest = groups[0].clone();
            messages.drain(oldest);
            changed = true;
        }
        if changed {
            log::debug!("compression: elided oldest turns, {} messages remain", messages.len());
        }
        changed
    }
}

const TRUNCATION_KEEP_CHARS: usize = 120;

/// Replaces bulky tool-result bodies with an elided placeholder
///
/// Results in the most recent turn are left intact; the correlation id and
/// tool name survive so the closure rule still holds.
#[derive(Debug, Clone, Default)]
pub struct ToolResultTruncation;

impl CompressionStrategy for ToolResultTruncation {
    fn name(&self) -> &'static str {
        "tool-result-truncation"
    }

    fn compress(
        &self,
        messages: &mut Vec<InternalMessage>,
        budget: usize,
        estimate: TokenEstimator<'_>,
    ) -> bool {
        if estimate(messages) <= budget {
            return false;
        }
        let groups = turn_groups(messages);
        let protected_from = groups.last().map(|g| g.start).unwrap_or(messages.len());

        let mut changed = false;
        for i in 0..protected_from {
            if messages[i].role != Role::Tool {
                continue;
            }
            let text = messages[i].text();
            if text.len() <= TRUNCATION_KEEP_CHARS {
                continue;
            }
            let head: String = text.chars().take(TRUNCATION_KEEP_CHARS).collect();
            messages[i].content = MessageContent::Text(format!(
                "[result elided, {} chars] {}…",
                text.len(),
                head
            ));
            changed = true;
            if estimate(messages) <= budget {
                break;
            }
        }
        changed
    }
}

/// Replaces a contiguous middle span with a synthesized summary
///
/// The summary callback is injected; this strategy only participates when
/// one is configured. The first and last turn groups are kept verbatim.
#[derive(Clone)]
pub struct MiddleWindowSummarizer {
    summarize: SummarizerFn,
}

impl MiddleWindowSummarizer {
    pub fn new(summarize: SummarizerFn) -> Self {
        Self { summarize }
    }
}

impl CompressionStrategy for MiddleWindowSummarizer {
    fn name(&self) -> &'static str {
        "middle-window-summarization"
    }

    fn compress(
        &self,
        messages: &mut Vec<InternalMessage>,
        budget: usize,
        estimate: TokenEstimator<'_>,
    ) -> bool {
        if estimate(messages) <= budget {
            return false;
        }
        let groups = turn_groups(messages);
        if groups.len() < 3 {
            return false;
        }
        let span = groups[1].start..groups[groups.len() - 1].start;
        let summary = (self.summarize)(&messages[span.clone()]);
        let replacement = InternalMessage::assistant(
            Some(format!("[conversation summary] {}", summary)),
            Vec::new(),
        );
        messages.splice(span, std::iter::once(replacement));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::CharacterTokenizer;
    use crate::types::ToolCall;
    use serde_json::json;

    fn estimator() -> impl Fn(&[InternalMessage]) -> usize {
        let tokenizer = CharacterTokenizer::new();
        move |messages: &[InternalMessage]| tokenizer.estimate_messages(messages)
    }

    fn turn(text: &str, reply: &str) -> Vec<InternalMessage> {
        vec![
            InternalMessage::user(text),
            InternalMessage::assistant(Some(reply.into()), vec![]),
        ]
    }

    #[test]
    fn test_turn_groups_span_tool_results() {
        let call = ToolCall::new("echo", json!({}));
        let id = call.id.clone();
        let messages = vec![
            InternalMessage::system("sys"),
            InternalMessage::user("one"),
            InternalMessage::assistant(None, vec![call]),
            InternalMessage::tool_result(id, "echo", "out"),
            InternalMessage::user("two"),
            InternalMessage::assistant(Some("done".into()), vec![]),
        ];
        let groups = turn_groups(&messages);
        assert_eq!(groups, vec![1..4, 4..6]);
    }

    #[test]
    fn test_elision_drops_oldest_first() {
        let estimate = estimator();
        let mut messages = vec![InternalMessage::system("sys")];
        messages.extend(turn(&"a".repeat(400), &"b".repeat(400)));
        messages.extend(turn(&"c".repeat(400), &"d".repeat(400)));
        messages.extend(turn("latest question", "latest answer"));

        let changed = OldestTurnElision.compress(&mut messages, 60, &estimate);
        assert!(changed);
        // System snapshot and the newest turn always survive.
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].text(), "latest question");
    }

    #[test]
    fn test_elision_noop_when_within_budget() {
        let estimate = estimator();
        let mut messages = turn("hi", "hello");
        let changed = OldestTurnElision.compress(&mut messages, 10_000, &estimate);
        assert!(!changed);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_truncation_preserves_correlation() {
        let estimate = estimator();
        let call = ToolCall::new("fetch", json!({}));
        let id = call.id.clone();
        let mut messages = vec![
            InternalMessage::user("old"),
            InternalMessage::assistant(None, vec![call]),
            InternalMessage::tool_result(id.clone(), "fetch", "x".repeat(2000)),
            InternalMessage::user("new"),
            InternalMessage::assistant(Some("ok".into()), vec![]),
        ];

        let changed = ToolResultTruncation.compress(&mut messages, 100, &estimate);
        assert!(changed);
        assert_eq!(messages[2].tool_call_id.as_deref(), Some(id.as_str()));
        assert!(messages[2].text().starts_with("[result elided"));
        assert!(messages[2].text().len() < 300);
    }

    #[test]
    fn test_truncation_spares_latest_turn() {
        let estimate = estimator();
        let call = ToolCall::new("fetch", json!({}));
        let id = call.id.clone();
        let fresh = "y".repeat(2000);
        let mut messages = vec![
            InternalMessage::user("only turn"),
            InternalMessage::assistant(None, vec![call]),
            InternalMessage::tool_result(id, "fetch", fresh.clone()),
        ];

        ToolResultTruncation.compress(&mut messages, 10, &estimate);
        // The single (latest) turn is protected even though we are over
        // budget.
        assert_eq!(messages[2].text(), fresh);
    }

    #[test]
    fn test_summarizer_replaces_middle_span() {
        let estimate = estimator();
        let mut messages = vec![InternalMessage::system("sys")];
        messages.extend(turn("first", &"a".repeat(600)));
        messages.extend(turn("second", &"b".repeat(600)));
        messages.extend(turn("third", "short"));

        let strategy = MiddleWindowSummarizer::new(Arc::new(|span: &[InternalMessage]| {
            format!("{} messages elided", span.len())
        }));
        let changed = strategy.compress(&mut messages, 80, &estimate);
        assert!(changed);

        let summary = messages
            .iter()
            .find(|m| m.text().starts_with("[conversation summary]"))
            .expect("summary message present");
        assert!(summary.text().contains("messages elided"));
        // First and last turns survive.
        assert_eq!(messages[1].text(), "first");
        assert_eq!(messages.last().unwrap().text(), "short");
    }
}
