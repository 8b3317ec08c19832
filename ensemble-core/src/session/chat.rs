//! One conversation: the turn loop
//!
//! A [`ChatSession`] owns its LLM adapter and context manager and executes
//! turns end-to-end: append the user message, resolve the system prompt,
//! hand the formatted history to the adapter, execute any requested tools,
//! and repeat until the model produces a final answer or the iteration cap
//! is reached. Turns within one session are strictly serialized.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::context::ContextManager;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::llm::{self, LlmAdapter, LlmError};
use crate::mcp::{McpManager, ToolExecutor};
use crate::prompt::{PromptContext, PromptManager};
use crate::types::{FileInput, ImageInput, InternalMessage, Role};

use super::store::{SessionMetadata, SessionStore};

/// Returned when the tool loop hits its iteration cap with no final answer
pub const MAX_ITERATIONS_SENTINEL: &str =
    "Reached maximum number of tool call iterations without a final response.";

/// A single conversation with its adapter, log, and event sink
pub struct ChatSession {
    id: String,
    llm: RwLock<Arc<dyn LlmAdapter>>,
    /// Guards the log for the whole turn; also serializes turns
    context: AsyncMutex<ContextManager>,
    events: EventSink,
    tools: Arc<dyn ToolExecutor>,
    /// Present in production for resource-backed prompt contributors
    mcp: Option<Arc<McpManager>>,
    prompts: Arc<PromptManager>,
    store: Arc<dyn SessionStore>,
    metadata: Mutex<SessionMetadata>,
    cancel: CancellationToken,
}

impl ChatSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        adapter: Arc<dyn LlmAdapter>,
        events: EventSink,
        tools: Arc<dyn ToolExecutor>,
        mcp: Option<Arc<McpManager>>,
        prompts: Arc<PromptManager>,
        store: Arc<dyn SessionStore>,
        metadata: SessionMetadata,
        cancel: CancellationToken,
    ) -> Self {
        let context = ContextManager::new(adapter.max_input_tokens());
        Self {
            id: id.into(),
            llm: RwLock::new(adapter),
            context: AsyncMutex::new(context),
            events,
            tools,
            mcp,
            prompts,
            store,
            metadata: Mutex::new(metadata),
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> SessionMetadata {
        self.metadata.lock().clone()
    }

    /// Restore the conversation log from persisted history
    pub async fn hydrate(&self, history: Vec<InternalMessage>) {
        self.context.lock().await.hydrate(history);
    }

    /// A snapshot of the conversation log
    pub async fn history(&self) -> Vec<InternalMessage> {
        self.context.lock().await.messages().to_vec()
    }

    /// Swap the adapter, preserving the conversation log
    pub async fn switch_adapter(&self, adapter: Arc<dyn LlmAdapter>) {
        let max_input = adapter.max_input_tokens();
        *self.llm.write().await = adapter;
        self.context.lock().await.set_max_input_tokens(max_input);
    }

    pub async fn adapter_model(&self) -> String {
        self.llm.read().await.model_name().to_string()
    }

    /// Truncate the log to the system snapshot; the adapter survives
    pub async fn reset(&self) -> Result<()> {
        {
            let mut ctx = self.context.lock().await;
            ctx.reset();
            self.store.truncate_history(&self.id).await?;
        }
        self.events.conversation_reset();
        self.save_metadata(0).await;
        Ok(())
    }

    /// Execute one conversational turn
    ///
    /// Returns the final assistant text, or `None` when it is empty or
    /// whitespace. Streaming mode emits `llmservice:chunk` events for
    /// intermediate text; the final concatenation is persisted exactly once
    /// when the turn ends cleanly, and nothing is persisted on error or
    /// cancellation.
    pub async fn run(
        &self,
        text: &str,
        image: Option<ImageInput>,
        file: Option<FileInput>,
        stream: bool,
    ) -> Result<Option<String>> {
        let adapter = self.llm.read().await.clone();

        let issues = llm::validate_input(adapter.as_ref(), image.as_ref(), file.as_ref());
        if !issues.is_empty() {
            let provider = adapter.provider().to_string();
            let model = adapter.model_name().to_string();
            self.events.emit(crate::events::AgentEvent::InputValidationFailed {
                session_id: self.id.clone(),
                issues: issues.clone(),
                provider: provider.clone(),
                model: model.clone(),
            });
            return Err(Error::InputValidation {
                issues,
                provider,
                model,
            });
        }

        // Holding the context lock across the turn serializes concurrent
        // runs on this session.
        let mut ctx = self.context.lock().await;

        ctx.add_user_message(text, image, file);
        self.persist_last(&ctx).await;
        self.events.thinking();

        let prompt = self
            .prompts
            .build(&PromptContext {
                mcp: self.mcp.as_deref(),
            })
            .await;
        ctx.set_system_prompt(&prompt);
        ctx.set_max_input_tokens(adapter.max_input_tokens());

        let tools = self.tools.all_tools().await;
        let max_iterations = adapter.max_iterations();

        let mut accumulated = String::new();
        let mut finished = false;

        for _ in 0..max_iterations {
            let request = ctx.get_formatted_messages(adapter.formatter().as_ref(), None);

            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(LlmError::Cancelled),
                result = adapter.generate(request, &tools, stream, &self.events) => result,
            };
            let step = match step {
                Ok(step) => step,
                Err(LlmError::Cancelled) => {
                    // No partial assistant output is persisted.
                    return Err(LlmError::Cancelled.into());
                }
                Err(err) => {
                    self.events.error(err.to_string());
                    return Err(err.into());
                }
            };

            let content = if step.text.is_empty() {
                None
            } else {
                Some(step.text.clone())
            };
            ctx.add_assistant_message(content, step.tool_calls.clone())
                .map_err(|e| Error::Other(e.to_string()))?;
            self.persist_last(&ctx).await;
            accumulated.push_str(&step.text);

            if step.tool_calls.is_empty() {
                finished = true;
                break;
            }

            for (idx, call) in step.tool_calls.iter().enumerate() {
                self.events.tool_call(call.name.as_str(), call.arguments.clone());
                let outcome = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    result = self.tools.execute_tool(&call.name, call.arguments.clone()) => {
                        Some(result)
                    }
                };
                let Some(result) = outcome else {
                    // The in-flight invocation is abandoned. Close this call
                    // and the ones never started so the kept log still
                    // satisfies the call/result correlation; no tool output
                    // or final text is persisted.
                    for open in &step.tool_calls[idx..] {
                        if ctx
                            .add_tool_result(&open.id, &open.name, json!({"error": "cancelled"}))
                            .is_ok()
                        {
                            self.persist_last(&ctx).await;
                        }
                    }
                    return Err(LlmError::Cancelled.into());
                };
                match result {
                    Ok(result) => {
                        ctx.add_tool_result(&call.id, &call.name, result.clone())
                            .map_err(|e| Error::Other(e.to_string()))?;
                        self.events.tool_result(call.name.as_str(), Ok(result));
                    }
                    Err(err) => {
                        // Tool failures never abort the turn; the model sees
                        // the error and may recover.
                        let message = err.to_string();
                        ctx.add_tool_result(&call.id, &call.name, json!({"error": message.clone()}))
                            .map_err(|e| Error::Other(e.to_string()))?;
                        self.events.tool_result(call.name.as_str(), Err(message));
                    }
                }
                self.persist_last(&ctx).await;
            }
        }

        let final_text = if finished || !accumulated.trim().is_empty() {
            accumulated
        } else {
            MAX_ITERATIONS_SENTINEL.to_string()
        };

        self.events.response(final_text.clone());
        let message_count = ctx.message_count();
        drop(ctx);
        self.save_metadata(message_count).await;

        if final_text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(final_text))
        }
    }

    /// Refresh activity metadata from the current log state
    pub async fn record_activity(&self) {
        let count = self.context.lock().await.message_count();
        self.save_metadata(count).await;
    }

    /// Persist the most recent log entry; system snapshots stay in memory
    async fn persist_last(&self, ctx: &ContextManager) {
        if let Some(last) = ctx.messages().last() {
            if last.role == Role::System {
                return;
            }
            if let Err(err) = self.store.append_message(&self.id, last).await {
                log::warn!("session {}: failed to persist message: {}", self.id, err);
            }
        }
    }

    async fn save_metadata(&self, message_count: usize) {
        let snapshot = {
            let mut metadata = self.metadata.lock();
            metadata.last_activity = chrono::Utc::now();
            metadata.message_count = message_count;
            metadata.clone()
        };
        if let Err(err) = self.store.save_metadata(&snapshot).await {
            log::warn!("session {}: failed to persist metadata: {}", self.id, err);
        }
    }
}
