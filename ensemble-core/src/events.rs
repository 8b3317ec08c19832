//! Event bus for observing orchestrator execution
//!
//! One [`EventBus`] exists per agent instance (never process-global). It is a
//! bounded broadcast channel: publishing never blocks, and subscribers that
//! fall behind lose the oldest events rather than stalling the publisher.
//!
//! # Example
//! ```
//! use ensemble_core::events::{AgentEvent, EventBus};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(AgentEvent::Thinking { session_id: "s1".into() });
//! assert!(matches!(rx.try_recv(), Ok(AgentEvent::Thinking { .. })));
//! ```

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::ValidationIssue;

/// Default per-subscriber mailbox capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which subsystem produced a tool-list update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolSource {
    Mcp,
    Custom,
}

impl ToolSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolSource::Mcp => "mcp",
            ToolSource::Custom => "custom",
        }
    }
}

/// Events emitted during agent execution
///
/// Each variant corresponds to a named topic; see [`AgentEvent::topic`].
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A turn started and the model is being consulted
    Thinking { session_id: String },

    /// Incremental text delta while streaming
    Chunk { session_id: String, delta: String },

    /// The model requested a tool invocation
    ToolCall {
        session_id: String,
        tool_name: String,
        args: Value,
    },

    /// A tool invocation finished
    ToolResult {
        session_id: String,
        tool_name: String,
        /// Tool output on success
        result: Option<Value>,
        /// Error message on failure
        error: Option<String>,
    },

    /// Final text for a turn
    Response { session_id: String, text: String },

    /// A turn failed
    Error { session_id: String, error: String },

    /// The conversation log was reset
    ConversationReset { session_id: String },

    /// An MCP server finished (or failed) connecting
    McpServerConnected {
        name: String,
        success: bool,
        error: Option<String>,
    },

    /// The aggregated tool set changed
    AvailableToolsUpdated {
        tools: Vec<String>,
        source: ToolSource,
    },

    /// Two servers exposed the same tool name; the first (lexicographic by
    /// server id) won
    DuplicateToolName {
        tool_name: String,
        kept_server: String,
        shadowed_server: String,
    },

    /// User input was rejected before reaching the model
    InputValidationFailed {
        session_id: String,
        issues: Vec<ValidationIssue>,
        provider: String,
        model: String,
    },
}

impl AgentEvent {
    /// The wire-level topic name for this event
    pub fn topic(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "llmservice:thinking",
            AgentEvent::Chunk { .. } => "llmservice:chunk",
            AgentEvent::ToolCall { .. } => "llmservice:toolCall",
            AgentEvent::ToolResult { .. } => "llmservice:toolResult",
            AgentEvent::Response { .. } => "llmservice:response",
            AgentEvent::Error { .. } => "llmservice:error",
            AgentEvent::ConversationReset { .. } => "llmservice:conversationReset",
            AgentEvent::McpServerConnected { .. } => "mcpServerConnected",
            AgentEvent::AvailableToolsUpdated { .. } => "availableToolsUpdated",
            AgentEvent::DuplicateToolName { .. } => "duplicateToolName",
            AgentEvent::InputValidationFailed { .. } => "inputValidationFailed",
        }
    }

    /// Session this event belongs to, when session-scoped
    pub fn session_id(&self) -> Option<&str> {
        match self {
            AgentEvent::Thinking { session_id }
            | AgentEvent::Chunk { session_id, .. }
            | AgentEvent::ToolCall { session_id, .. }
            | AgentEvent::ToolResult { session_id, .. }
            | AgentEvent::Response { session_id, .. }
            | AgentEvent::Error { session_id, .. }
            | AgentEvent::ConversationReset { session_id }
            | AgentEvent::InputValidationFailed { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Bounded publish/subscribe bus for [`AgentEvent`]s
///
/// Cloning is cheap; all clones publish into the same channel. Publishing
/// with no live subscribers is a no-op.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to all subsequent events
    ///
    /// A receiver that lags more than the bus capacity drops its oldest
    /// pending events (`RecvError::Lagged`) and continues from there.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; never blocks
    pub fn emit(&self, event: AgentEvent) {
        log::trace!("event {}", event.topic());
        // send only fails when there are no subscribers
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// A session-scoped handle onto the bus
///
/// Adapters and chat sessions hold one of these so they can emit without
/// carrying the session id everywhere.
#[derive(Debug, Clone)]
pub struct EventSink {
    bus: EventBus,
    session_id: String,
}

impl EventSink {
    pub fn new(bus: EventBus, session_id: impl Into<String>) -> Self {
        Self {
            bus,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn emit(&self, event: AgentEvent) {
        self.bus.emit(event);
    }

    pub fn thinking(&self) {
        self.emit(AgentEvent::Thinking {
            session_id: self.session_id.clone(),
        });
    }

    pub fn chunk(&self, delta: impl Into<String>) {
        self.emit(AgentEvent::Chunk {
            session_id: self.session_id.clone(),
            delta: delta.into(),
        });
    }

    pub fn tool_call(&self, tool_name: impl Into<String>, args: Value) {
        self.emit(AgentEvent::ToolCall {
            session_id: self.session_id.clone(),
            tool_name: tool_name.into(),
            args,
        });
    }

    pub fn tool_result(&self, tool_name: impl Into<String>, result: Result<Value, String>) {
        let (result, error) = match result {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e)),
        };
        self.emit(AgentEvent::ToolResult {
            session_id: self.session_id.clone(),
            tool_name: tool_name.into(),
            result,
            error,
        });
    }

    pub fn response(&self, text: impl Into<String>) {
        self.emit(AgentEvent::Response {
            session_id: self.session_id.clone(),
            text: text.into(),
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(AgentEvent::Error {
            session_id: self.session_id.clone(),
            error: error.into(),
        });
    }

    pub fn conversation_reset(&self) {
        self.emit(AgentEvent::ConversationReset {
            session_id: self.session_id.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_match_wire_names() {
        let cases: Vec<(AgentEvent, &str)> = vec![
            (
                AgentEvent::Thinking {
                    session_id: "s".into(),
                },
                "llmservice:thinking",
            ),
            (
                AgentEvent::Chunk {
                    session_id: "s".into(),
                    delta: "d".into(),
                },
                "llmservice:chunk",
            ),
            (
                AgentEvent::Response {
                    session_id: "s".into(),
                    text: "t".into(),
                },
                "llmservice:response",
            ),
            (
                AgentEvent::ConversationReset {
                    session_id: "s".into(),
                },
                "llmservice:conversationReset",
            ),
            (
                AgentEvent::McpServerConnected {
                    name: "srv".into(),
                    success: true,
                    error: None,
                },
                "mcpServerConnected",
            ),
            (
                AgentEvent::AvailableToolsUpdated {
                    tools: vec![],
                    source: ToolSource::Mcp,
                },
                "availableToolsUpdated",
            ),
        ];
        for (event, topic) in cases {
            assert_eq!(event.topic(), topic);
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(8);
        bus.emit(AgentEvent::Thinking {
            session_id: "s".into(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_receives_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let sink = EventSink::new(bus.clone(), "s1");
        sink.thinking();
        sink.response("done");

        assert!(matches!(rx.try_recv(), Ok(AgentEvent::Thinking { .. })));
        match rx.try_recv() {
            Ok(AgentEvent::Response { session_id, text }) => {
                assert_eq!(session_id, "s1");
                assert_eq!(text, "done");
            }
            other => panic!("expected Response, got {:?}", other),
        }
    }

    #[test]
    fn test_lagging_subscriber_drops_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.emit(AgentEvent::Chunk {
                session_id: "s".into(),
                delta: i.to_string(),
            });
        }

        // The first recv reports the lag, subsequent receives see the newest
        // events only.
        let err = rx.try_recv().unwrap_err();
        assert!(matches!(
            err,
            tokio::sync::broadcast::error::TryRecvError::Lagged(_)
        ));
        match rx.try_recv() {
            Ok(AgentEvent::Chunk { delta, .. }) => assert_eq!(delta, "3"),
            other => panic!("expected Chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_error_shape() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let sink = EventSink::new(bus, "s1");

        sink.tool_result("echo", Err("boom".into()));
        match rx.try_recv() {
            Ok(AgentEvent::ToolResult { result, error, .. }) => {
                assert!(result.is_none());
                assert_eq!(error.as_deref(), Some("boom"));
            }
            other => panic!("expected ToolResult, got {:?}", other),
        }
    }
}
