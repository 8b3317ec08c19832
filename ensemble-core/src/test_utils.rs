//! Test utilities
//!
//! Mock implementations for exercising the orchestrator without provider
//! credentials or live MCP servers. Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! ensemble-core = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::LlmConfig;
use crate::context::formatter::{FormattedRequest, Formatter, OpenAiFormatter};
use crate::events::{AgentEvent, EventBus, EventSink};
use crate::llm::registry::LlmProvider;
use crate::llm::{LlmAdapter, LlmError, LlmRouter, StepResult, StepType};
use crate::mcp::{McpError, ToolExecutor, ToolInfo};
use crate::types::{FinishReason, ToolCall};

/// A scripted LLM adapter
///
/// Returns pre-programmed step results in order; errors once the script is
/// exhausted.
///
/// ```
/// use ensemble_core::test_utils::MockAdapter;
/// use serde_json::json;
///
/// let adapter = MockAdapter::new()
///     .with_tool_call("echo", json!({"message": "banana"}))
///     .with_text("it said banana");
/// assert_eq!(adapter.call_count(), 0);
/// ```
#[derive(Clone)]
pub struct MockAdapter {
    steps: Arc<Mutex<Vec<StepResult>>>,
    call_count: Arc<Mutex<usize>>,
    model: String,
    max_input_tokens: usize,
    max_iterations: usize,
    supports_vision: bool,
    formatter: Arc<OpenAiFormatter>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self {
            steps: Arc::new(Mutex::new(Vec::new())),
            call_count: Arc::new(Mutex::new(0)),
            model: "mock-model".to_string(),
            max_input_tokens: 128_000,
            max_iterations: 50,
            supports_vision: false,
            formatter: Arc::new(OpenAiFormatter),
        }
    }

    /// Mirror limits from a real config
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            max_input_tokens: config.resolved_max_input_tokens(),
            max_iterations: config.max_iterations,
            ..Self::new()
        }
    }

    /// Queue a final text step
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.steps.lock().unwrap().push(StepResult {
            text: text.into(),
            tool_calls: vec![],
            finish_reason: FinishReason::Stop,
            usage: None,
            step_type: StepType::Final,
        });
        self
    }

    /// Queue a step requesting one tool call (with optional leading text)
    pub fn with_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        self.steps.lock().unwrap().push(StepResult {
            text: String::new(),
            tool_calls: vec![ToolCall::new(name, arguments)],
            finish_reason: FinishReason::ToolCalls,
            usage: None,
            step_type: StepType::Continue,
        });
        self
    }

    /// Queue an arbitrary step
    pub fn with_step(self, step: StepResult) -> Self {
        self.steps.lock().unwrap().push(step);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.max_input_tokens = max_input_tokens;
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.supports_vision = true;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Number of `generate` calls so far
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmAdapter for MockAdapter {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> LlmProvider {
        LlmProvider::OpenAi
    }

    fn router(&self) -> LlmRouter {
        LlmRouter::Unified
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn supports_vision(&self) -> bool {
        self.supports_vision
    }

    fn formatter(&self) -> Arc<dyn Formatter> {
        self.formatter.clone()
    }

    async fn generate(
        &self,
        _request: FormattedRequest,
        _tools: &[ToolInfo],
        stream: bool,
        events: &EventSink,
    ) -> Result<StepResult, LlmError> {
        *self.call_count.lock().unwrap() += 1;
        let mut steps = self.steps.lock().unwrap();
        if steps.is_empty() {
            return Err(LlmError::Other("MockAdapter: no more scripted steps".into()));
        }
        let step = steps.remove(0);
        if stream && !step.text.is_empty() {
            events.chunk(step.text.clone());
        }
        Ok(step)
    }
}

type ToolHandler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// A scripted tool executor standing in for the MCP manager
#[derive(Clone, Default)]
pub struct MockToolExecutor {
    tools: Vec<ToolInfo>,
    handlers: HashMap<String, ToolHandler>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool backed by a handler closure
    pub fn with_tool<F>(mut self, name: &str, description: &str, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.tools.push(ToolInfo {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({"type": "object"}),
            server: "mock".to_string(),
        });
        self.handlers.insert(name.to_string(), Arc::new(handler));
        self
    }

    /// Every `(name, args)` invocation observed so far
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn all_tools(&self) -> Vec<ToolInfo> {
        self.tools.clone()
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        match self.handlers.get(name) {
            Some(handler) => handler(args).map_err(|message| McpError::Execution {
                server: "mock".to_string(),
                message,
            }),
            None => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}

/// Collects bus events for assertions
///
/// Events are buffered by the underlying subscription; call
/// [`EventCollector::drain`] after the code under test to pick them up.
pub struct EventCollector {
    rx: Mutex<tokio::sync::broadcast::Receiver<AgentEvent>>,
    seen: Mutex<Vec<AgentEvent>>,
}

impl EventCollector {
    pub fn attach(bus: &EventBus) -> Self {
        Self {
            rx: Mutex::new(bus.subscribe()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Pull all pending events and return everything seen so far
    pub fn drain(&self) -> Vec<AgentEvent> {
        let mut rx = self.rx.lock().unwrap();
        let mut seen = self.seen.lock().unwrap();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen.clone()
    }

    /// Topic names seen so far, in order
    pub fn topics(&self) -> Vec<&'static str> {
        self.drain().iter().map(|e| e.topic()).collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.topics().iter().filter(|t| **t == topic).count()
    }
}
