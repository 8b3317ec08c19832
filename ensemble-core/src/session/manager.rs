//! Session lifecycle: cache, eviction, expiry
//!
//! The session manager owns `session id → ChatSession`, bounded by
//! `maxSessions` with least-recently-used eviction. Evicted or expired
//! sessions keep their persisted metadata and history and can be rehydrated
//! later; deleted sessions are purged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, EventSink};
use crate::llm::AdapterFactory;
use crate::mcp::{McpManager, ToolExecutor};
use crate::prompt::PromptManager;
use crate::state::StateManager;

use super::chat::ChatSession;
use super::store::{SessionMetadata, SessionStore};

/// Id used when the caller does not name a session
pub const DEFAULT_SESSION_ID: &str = "default";

/// How often the expiry sweep runs
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Owner of live sessions and their lifecycle
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    store: Arc<dyn SessionStore>,
    state: Arc<StateManager>,
    adapter_factory: AdapterFactory,
    tools: Arc<dyn ToolExecutor>,
    mcp: Option<Arc<McpManager>>,
    prompts: Arc<PromptManager>,
    events: EventBus,
    max_sessions: usize,
    session_ttl: Duration,
    current_session_id: parking_lot::RwLock<String>,
    cancel: CancellationToken,
    expiry_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SessionStore>,
        state: Arc<StateManager>,
        adapter_factory: AdapterFactory,
        tools: Arc<dyn ToolExecutor>,
        mcp: Option<Arc<McpManager>>,
        prompts: Arc<PromptManager>,
        events: EventBus,
        max_sessions: usize,
        session_ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            state,
            adapter_factory,
            tools,
            mcp,
            prompts,
            events,
            max_sessions: max_sessions.max(1),
            session_ttl,
            current_session_id: parking_lot::RwLock::new(DEFAULT_SESSION_ID.to_string()),
            cancel,
            expiry_task: parking_lot::Mutex::new(None),
        }
    }

    /// The session `run` targets when no id is given
    pub fn current_session_id(&self) -> String {
        self.current_session_id.read().clone()
    }

    /// Point the default at another session (None restores "default")
    pub async fn load_session(&self, id: Option<&str>) -> Result<()> {
        let id = id.unwrap_or(DEFAULT_SESSION_ID);
        // The target must exist, live or persisted.
        if !self.sessions.read().await.contains_key(id)
            && self.store.load_metadata(id).await?.is_none()
        {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        *self.current_session_id.write() = id.to_string();
        Ok(())
    }

    /// Get an existing live or persisted session, or create it
    ///
    /// Concurrent calls for the same id resolve to a single instance: the
    /// registry write lock is held across the check and the insert.
    pub async fn create_session(&self, id: Option<String>) -> Result<Arc<ChatSession>> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut sessions = self.sessions.write().await;

        if let Some(existing) = sessions.get(&id) {
            return Ok(existing.clone());
        }

        self.evict_if_full(&mut sessions).await;

        let (session, rehydrated) = self.build_session(&id).await?;
        let session = Arc::new(session);
        if !rehydrated {
            self.store.save_metadata(&session.metadata()).await?;
        }
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// Look up a session: live cache first, then the store
    pub async fn get_session(&self, id: &str) -> Result<Arc<ChatSession>> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Ok(session.clone());
        }
        if self.store.load_metadata(id).await?.is_none() {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        // Rehydrate under the write lock so concurrent lookups converge.
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            return Ok(session.clone());
        }
        self.evict_if_full(&mut sessions).await;
        let (session, _) = self.build_session(id).await?;
        let session = Arc::new(session);
        sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Sessions are created on demand: get, rehydrate, or create
    pub async fn get_or_create(&self, id: Option<String>) -> Result<Arc<ChatSession>> {
        let id = id.unwrap_or_else(|| self.current_session_id());
        match self.get_session(&id).await {
            Ok(session) => Ok(session),
            Err(Error::SessionNotFound(_)) => self.create_session(Some(id)).await,
            Err(err) => Err(err),
        }
    }

    /// Drop a session from memory, keeping its persisted state
    pub async fn end_session(&self, id: &str) -> Result<()> {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(session) => {
                self.store.save_metadata(&session.metadata()).await?;
                Ok(())
            }
            None if self.store.load_metadata(id).await?.is_some() => Ok(()),
            None => Err(Error::SessionNotFound(id.to_string())),
        }
    }

    /// Drop a session from memory and purge its persisted state
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let existed_live = self.sessions.write().await.remove(id).is_some();
        let existed_stored = self.store.load_metadata(id).await?.is_some();
        if !existed_live && !existed_stored {
            return Err(Error::SessionNotFound(id.to_string()));
        }
        self.store.delete_session(id).await?;
        self.state.clear_session(id);
        Ok(())
    }

    /// Truncate a session's log to its system snapshot
    pub async fn reset_session(&self, id: &str) -> Result<()> {
        self.get_session(id).await?.reset().await
    }

    /// Bump a session's activity and message count
    ///
    /// Live sessions recount from their log; evicted sessions get a plain
    /// stored-metadata bump.
    pub async fn increment_message_count(&self, id: &str) -> Result<()> {
        if let Some(session) = self.sessions.read().await.get(id).cloned() {
            session.record_activity().await;
            return Ok(());
        }
        let mut metadata = self
            .store
            .load_metadata(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        metadata.message_count += 1;
        metadata.last_activity = chrono::Utc::now();
        self.store.save_metadata(&metadata).await?;
        Ok(())
    }

    pub async fn get_session_metadata(&self, id: &str) -> Result<SessionMetadata> {
        if let Some(session) = self.sessions.read().await.get(id) {
            return Ok(session.metadata());
        }
        self.store
            .load_metadata(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Metadata for every known session, live and persisted
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut out = Vec::new();
        for id in self.store.list_session_ids().await? {
            if let Some(metadata) = self.store.load_metadata(&id).await? {
                out.push(metadata);
            }
        }
        // Live sessions may be newer than their last flush.
        let live = self.sessions.read().await;
        for (id, session) in live.iter() {
            match out.iter_mut().find(|m| &m.id == id) {
                Some(slot) => *slot = session.metadata(),
                None => out.push(session.metadata()),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Ids of sessions currently held in memory
    pub async fn live_session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    // ========================================================================
    // LLM switching
    // ========================================================================

    /// Swap the adapter for one live session, preserving its log
    pub async fn switch_llm_for_session(&self, id: &str, config: &LlmConfig) -> Result<()> {
        let session = self.get_session(id).await?;
        let adapter = (self.adapter_factory)(config)?;
        session.switch_adapter(adapter).await;
        Ok(())
    }

    /// Swap adapters for every live session from its effective config
    pub async fn switch_llm_for_all(&self) -> Result<()> {
        let sessions: Vec<(String, Arc<ChatSession>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        for (id, session) in sessions {
            let config = self.state.effective_llm(Some(&id));
            let adapter = (self.adapter_factory)(&config)?;
            session.switch_adapter(adapter).await;
        }
        Ok(())
    }

    // ========================================================================
    // Expiry & shutdown
    // ========================================================================

    /// Start the background TTL sweep
    pub fn start_expiry_task(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                let Some(manager) = manager.upgrade() else { break };
                manager.expire_idle_sessions().await;
            }
        });
        *self.expiry_task.lock() = Some(handle);
    }

    /// End sessions idle past the TTL ("end" semantics: history kept)
    pub async fn expire_idle_sessions(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.session_ttl).unwrap_or(chrono::Duration::hours(1));
        let now = chrono::Utc::now();
        let expired: Vec<String> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, session)| session.metadata().last_activity + ttl < now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut ended = 0;
        for id in expired {
            log::debug!("session '{}' expired after {:?} idle", id, self.session_ttl);
            if self.end_session(&id).await.is_ok() {
                ended += 1;
            }
        }
        ended
    }

    /// Cancel the expiry task and flush all live sessions to the store
    pub async fn cleanup(&self) -> Vec<String> {
        if let Some(handle) = self.expiry_task.lock().take() {
            handle.abort();
        }
        let sessions: Vec<Arc<ChatSession>> = {
            let mut guard = self.sessions.write().await;
            std::mem::take(&mut *guard).into_values().collect()
        };
        let mut errors = Vec::new();
        for session in sessions {
            if let Err(err) = self.store.save_metadata(&session.metadata()).await {
                errors.push(format!("session {}: {}", session.id(), err));
            }
        }
        errors
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Build (or rehydrate) a session; returns whether history was restored
    async fn build_session(&self, id: &str) -> Result<(ChatSession, bool)> {
        let config = self.state.effective_llm(Some(id));
        let adapter = (self.adapter_factory)(&config)?;

        let stored = self.store.load_metadata(id).await?;
        let rehydrated = stored.is_some();
        let metadata = stored.unwrap_or_else(|| SessionMetadata::new(id));

        let session = ChatSession::new(
            id,
            adapter,
            EventSink::new(self.events.clone(), id),
            self.tools.clone(),
            self.mcp.clone(),
            self.prompts.clone(),
            self.store.clone(),
            metadata,
            self.cancel.child_token(),
        );

        if rehydrated {
            let history = self.store.load_history(id).await?;
            if !history.is_empty() {
                session.hydrate(history).await;
            }
        }
        Ok((session, rehydrated))
    }

    /// Evict the least-recently-used live session when the cache is full
    async fn evict_if_full(&self, sessions: &mut HashMap<String, Arc<ChatSession>>) {
        while sessions.len() >= self.max_sessions {
            let Some(lru) = sessions
                .iter()
                .min_by_key(|(_, s)| s.metadata().last_activity)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            if let Some(session) = sessions.remove(&lru) {
                log::debug!("evicting LRU session '{}'", lru);
                if let Err(err) = self.store.save_metadata(&session.metadata()).await {
                    log::warn!("failed to flush metadata for '{}': {}", lru, err);
                }
            }
        }
    }
}
