//! End-to-end turn scenarios against a scripted adapter and tool executor

use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use ensemble_core::session::store::InMemorySessionStore;
use ensemble_core::test_utils::{EventCollector, MockAdapter, MockToolExecutor};
use ensemble_core::{
    AgentEvent, ChatSession, Error, EventBus, EventSink, McpError, PromptManager, Role,
    SessionMetadata, SessionStore, SystemPromptConfig, ToolExecutor, ToolInfo,
    MAX_ITERATIONS_SENTINEL,
};

struct Harness {
    session: Arc<ChatSession>,
    collector: EventCollector,
    store: Arc<InMemorySessionStore>,
}

fn harness(adapter: MockAdapter, tools: MockToolExecutor) -> Harness {
    let bus = EventBus::new(256);
    let collector = EventCollector::attach(&bus);
    let store = Arc::new(InMemorySessionStore::new());
    let prompts = Arc::new(
        PromptManager::from_config(&SystemPromptConfig::Literal("You are terse.".into()))
            .unwrap(),
    );
    let session = Arc::new(ChatSession::new(
        "s1",
        Arc::new(adapter),
        EventSink::new(bus, "s1"),
        Arc::new(tools),
        None,
        prompts,
        store.clone(),
        SessionMetadata::new("s1"),
        CancellationToken::new(),
    ));
    Harness {
        session,
        collector,
        store,
    }
}

fn echo_tools() -> MockToolExecutor {
    MockToolExecutor::new().with_tool("echo", "Echo a message back", |args: Value| {
        Ok(args.get("message").cloned().unwrap_or(Value::Null))
    })
}

// S1: echo without tools — one model call, [system, user, assistant] log.
#[tokio::test]
async fn test_single_turn_without_tools() {
    let adapter = MockAdapter::new().with_text("Hello! How can I help?");
    let h = harness(adapter.clone(), MockToolExecutor::new());

    let reply = h.session.run("Hello", None, None, false).await.unwrap();
    assert_eq!(reply.as_deref(), Some("Hello! How can I help?"));
    assert_eq!(adapter.call_count(), 1);

    let history = h.session.history().await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    assert_eq!(history[1].text(), "Hello");
}

// S2: single tool call — call, result, final answer; two model calls.
#[tokio::test]
async fn test_single_tool_call_round_trip() {
    let adapter = MockAdapter::new()
        .with_tool_call("echo", json!({"message": "banana"}))
        .with_text("The tool said banana.");
    let tools = echo_tools();
    let h = harness(adapter.clone(), tools.clone());

    let reply = h
        .session
        .run("please echo the word banana", None, None, false)
        .await
        .unwrap()
        .unwrap();
    assert!(reply.contains("banana"));
    assert_eq!(adapter.call_count(), 2);
    assert_eq!(tools.calls(), vec![("echo".to_string(), json!({"message": "banana"}))]);

    let history = h.session.history().await;
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
    );
    assert!(history[2].has_tool_calls());
    assert_eq!(history[3].text(), "banana");
    assert_eq!(history[3].tool_call_id, Some(history[2].tool_calls[0].id.clone()));
}

// S3: iteration cap — exactly max_iterations model calls, sentinel response.
#[tokio::test]
async fn test_iteration_cap_returns_sentinel() {
    let adapter = MockAdapter::new()
        .with_tool_call("loop", json!({}))
        .with_tool_call("loop", json!({}))
        .with_tool_call("loop", json!({}))
        .with_max_iterations(3);
    let tools =
        MockToolExecutor::new().with_tool("loop", "Always asks again", |_| Ok(json!("go on")));
    let h = harness(adapter.clone(), tools);

    let reply = h.session.run("start looping", None, None, false).await.unwrap();
    assert_eq!(reply.as_deref(), Some(MAX_ITERATIONS_SENTINEL));
    assert_eq!(adapter.call_count(), 3);

    let history = h.session.history().await;
    let assistants = history.iter().filter(|m| m.has_tool_calls()).count();
    let tool_results = history.iter().filter(|m| m.role == Role::Tool).count();
    assert_eq!(assistants, 3);
    assert_eq!(tool_results, 3);
}

// Tool failures become error payloads; the turn continues.
#[tokio::test]
async fn test_tool_error_does_not_abort_turn() {
    let adapter = MockAdapter::new()
        .with_tool_call("flaky", json!({}))
        .with_text("the tool failed, sorry");
    let tools =
        MockToolExecutor::new().with_tool("flaky", "Always fails", |_| Err("disk on fire".into()));
    let h = harness(adapter.clone(), tools);

    let reply = h.session.run("try it", None, None, false).await.unwrap().unwrap();
    assert!(reply.contains("failed"));

    let history = h.session.history().await;
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text().contains("error"));
    assert!(tool_msg.text().contains("disk on fire"));

    let events = h.collector.drain();
    let tool_result_error = events.iter().any(|e| {
        matches!(e, AgentEvent::ToolResult { error: Some(err), .. } if err.contains("disk on fire"))
    });
    assert!(tool_result_error);
}

// Adapter errors abort the loop without persisting a partial assistant
// message.
#[tokio::test]
async fn test_adapter_error_aborts_without_partial_message() {
    let adapter = MockAdapter::new(); // no scripted steps: first call errors
    let h = harness(adapter, MockToolExecutor::new());

    let err = h.session.run("hello", None, None, false).await.unwrap_err();
    assert!(matches!(err, Error::Llm(_)));

    let history = h.session.history().await;
    assert!(history.iter().all(|m| m.role != Role::Assistant));
    assert_eq!(h.collector.count("llmservice:error"), 1);
    assert_eq!(h.collector.count("llmservice:response"), 0);
}

// Streaming emits chunk events and persists the final text exactly once.
#[tokio::test]
async fn test_streaming_emits_chunks_and_persists_once() {
    let adapter = MockAdapter::new().with_text("streamed reply");
    let h = harness(adapter, MockToolExecutor::new());

    let reply = h.session.run("hi", None, None, true).await.unwrap();
    assert_eq!(reply.as_deref(), Some("streamed reply"));

    assert!(h.collector.count("llmservice:chunk") >= 1);
    assert_eq!(h.collector.count("llmservice:response"), 1);

    let persisted = h.store.load_history("s1").await.unwrap();
    let finals: Vec<_> = persisted
        .iter()
        .filter(|m| m.role == Role::Assistant && m.text() == "streamed reply")
        .collect();
    assert_eq!(finals.len(), 1);
}

// Event ordering within a turn: thinking → toolCall → toolResult → response.
#[tokio::test]
async fn test_event_order_within_turn() {
    let adapter = MockAdapter::new()
        .with_tool_call("echo", json!({"message": "x"}))
        .with_text("done");
    let h = harness(adapter, echo_tools());

    h.session.run("go", None, None, false).await.unwrap();

    let topics = h.collector.topics();
    let pos = |topic: &str| topics.iter().position(|t| *t == topic).unwrap();
    assert!(pos("llmservice:thinking") < pos("llmservice:toolCall"));
    assert!(pos("llmservice:toolCall") < pos("llmservice:toolResult"));
    assert!(pos("llmservice:toolResult") < pos("llmservice:response"));
}

// Whitespace-only final text maps to None.
#[tokio::test]
async fn test_blank_response_returns_none() {
    let adapter = MockAdapter::new().with_text("   ");
    let h = harness(adapter, MockToolExecutor::new());
    let reply = h.session.run("hi", None, None, false).await.unwrap();
    assert!(reply.is_none());
}

// Image input against a text-only model fails before any model call.
#[tokio::test]
async fn test_modality_validation_precedes_model_call() {
    let adapter = MockAdapter::new().with_text("never reached");
    let h = harness(adapter.clone(), MockToolExecutor::new());

    let image = ensemble_core::ImageInput {
        data: vec![1, 2, 3],
        mime_type: "image/png".into(),
    };
    let err = h
        .session
        .run("what is this", Some(image), None, false)
        .await
        .unwrap_err();
    assert!(err.is_input_validation());
    assert_eq!(adapter.call_count(), 0);
    assert_eq!(h.collector.count("inputValidationFailed"), 1);
    assert!(h.session.history().await.is_empty());
}

// Property 3: operations on one session never touch another's log.
#[tokio::test]
async fn test_session_isolation() {
    let a = harness(MockAdapter::new().with_text("for a"), MockToolExecutor::new());
    let b = harness(MockAdapter::new().with_text("for b"), MockToolExecutor::new());

    a.session.run("only for a", None, None, false).await.unwrap();
    assert!(b.session.history().await.is_empty());

    b.session.run("only for b", None, None, false).await.unwrap();
    let a_history = a.session.history().await;
    assert!(a_history.iter().all(|m| !m.text().contains("only for b")));
}

// Property 4: swapping the adapter preserves the conversation log.
#[tokio::test]
async fn test_adapter_swap_preserves_history() {
    let h = harness(
        MockAdapter::new().with_text("first answer"),
        MockToolExecutor::new(),
    );
    h.session.run("first question", None, None, false).await.unwrap();
    let before = h.session.history().await;

    h.session
        .switch_adapter(Arc::new(
            MockAdapter::new().with_model("replacement").with_text("second answer"),
        ))
        .await;
    assert_eq!(h.session.history().await, before);
    assert_eq!(h.session.adapter_model().await, "replacement");

    // The next turn sees the full prior log.
    h.session.run("second question", None, None, false).await.unwrap();
    let after = h.session.history().await;
    assert!(after.iter().any(|m| m.text() == "first question"));
    assert!(after.iter().any(|m| m.text() == "second answer"));
}

// Reset truncates to the system snapshot and emits conversationReset.
#[tokio::test]
async fn test_reset_truncates_to_snapshot() {
    let h = harness(MockAdapter::new().with_text("answer"), MockToolExecutor::new());
    h.session.run("question", None, None, false).await.unwrap();
    assert!(h.session.history().await.len() > 1);

    h.session.reset().await.unwrap();
    let history = h.session.history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::System);
    assert!(h.store.load_history("s1").await.unwrap().is_empty());
    assert_eq!(h.collector.count("llmservice:conversationReset"), 1);
}

// Cancellation aborts the turn; nothing from the in-flight step persists.
#[tokio::test]
async fn test_cancellation_aborts_turn() {
    let bus = EventBus::new(64);
    let store = Arc::new(InMemorySessionStore::new());
    let prompts = Arc::new(
        PromptManager::from_config(&SystemPromptConfig::Literal("sys".into())).unwrap(),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let session = ChatSession::new(
        "s1",
        Arc::new(MockAdapter::new().with_text("never delivered")),
        EventSink::new(bus, "s1"),
        Arc::new(MockToolExecutor::new()),
        None,
        prompts,
        store,
        SessionMetadata::new("s1"),
        cancel,
    );

    let err = session.run("hello", None, None, false).await.unwrap_err();
    assert!(matches!(err, Error::Llm(ensemble_core::LlmError::Cancelled)));
    let history = session.history().await;
    assert!(history.iter().all(|m| m.role != Role::Assistant));
}

/// A tool executor whose calls never complete, signalling once one starts
struct StallExecutor {
    started: tokio::sync::mpsc::Sender<()>,
}

#[async_trait::async_trait]
impl ToolExecutor for StallExecutor {
    async fn all_tools(&self) -> Vec<ToolInfo> {
        vec![ToolInfo {
            name: "stall".into(),
            description: "Never returns".into(),
            parameters: json!({"type": "object"}),
            server: "mock".into(),
        }]
    }

    async fn execute_tool(&self, _name: &str, _args: Value) -> Result<Value, McpError> {
        let _ = self.started.send(()).await;
        std::future::pending().await
    }
}

// Cancellation mid-tool-execution aborts the turn instead of waiting for the
// tool; the open call is closed with a cancellation marker and no final
// response is produced.
#[tokio::test]
async fn test_cancellation_aborts_in_flight_tool_call() {
    let bus = EventBus::new(64);
    let collector = EventCollector::attach(&bus);
    let store = Arc::new(InMemorySessionStore::new());
    let prompts = Arc::new(
        PromptManager::from_config(&SystemPromptConfig::Literal("sys".into())).unwrap(),
    );
    let cancel = CancellationToken::new();
    let (started_tx, mut started_rx) = tokio::sync::mpsc::channel(1);

    let adapter = MockAdapter::new()
        .with_tool_call("stall", json!({}))
        .with_text("never delivered");
    let session = Arc::new(ChatSession::new(
        "s1",
        Arc::new(adapter.clone()),
        EventSink::new(bus, "s1"),
        Arc::new(StallExecutor {
            started: started_tx,
        }),
        None,
        prompts,
        store.clone(),
        SessionMetadata::new("s1"),
        cancel.clone(),
    ));

    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run("go", None, None, false).await })
    };

    started_rx.recv().await.expect("tool call started");
    cancel.cancel();

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::Llm(ensemble_core::LlmError::Cancelled)
    ));
    // Only the first model call ran; the final-text step never did.
    assert_eq!(adapter.call_count(), 1);

    let history = session.history().await;
    let assistant = history.iter().find(|m| m.has_tool_calls()).unwrap();
    let tool_msg = history.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(
        tool_msg.tool_call_id,
        Some(assistant.tool_calls[0].id.clone())
    );
    assert!(tool_msg.text().contains("cancelled"));
    assert!(history.iter().all(|m| m.text() != "never delivered"));
    assert_eq!(collector.count("llmservice:response"), 0);
}

// Metadata tracks activity and message counts across turns.
#[tokio::test]
async fn test_metadata_updated_after_turn() {
    let h = harness(MockAdapter::new().with_text("ok"), MockToolExecutor::new());
    let before = h.session.metadata();

    h.session.run("hello", None, None, false).await.unwrap();
    let after = h.session.metadata();
    assert!(after.last_activity >= before.last_activity);
    assert_eq!(after.message_count, h.session.history().await.len());
}
