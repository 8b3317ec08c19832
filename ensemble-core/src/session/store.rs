//! Session persistence interface
//!
//! The core depends only on this trait; durable engines (sqlite, redis, …)
//! live outside the crate. The bundled [`InMemorySessionStore`] backs the
//! default `in-memory` storage configuration.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::InternalMessage;

/// Per-session bookkeeping persisted across evictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
}

impl SessionMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_activity: now,
            message_count: 0,
        }
    }
}

/// Errors from session storage backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage backend contract for session metadata and history
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError>;

    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StoreError>;

    async fn load_history(&self, id: &str) -> Result<Vec<InternalMessage>, StoreError>;

    async fn append_message(&self, id: &str, message: &InternalMessage)
        -> Result<(), StoreError>;

    async fn truncate_history(&self, id: &str) -> Result<(), StoreError>;

    /// Purge the session entirely: metadata and history
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Flush and release backend resources; called once at agent stop
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
struct SessionRecord {
    metadata: Option<SessionMetadata>,
    history: Vec<InternalMessage>,
}

/// In-memory store; the default backend
#[derive(Default)]
pub struct InMemorySessionStore {
    records: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_metadata(&self, id: &str) -> Result<Option<SessionMetadata>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(id)
            .and_then(|r| r.metadata.clone()))
    }

    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(metadata.id.clone())
            .or_default()
            .metadata = Some(metadata.clone());
        Ok(())
    }

    async fn load_history(&self, id: &str) -> Result<Vec<InternalMessage>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(id)
            .map(|r| r.history.clone())
            .unwrap_or_default())
    }

    async fn append_message(
        &self,
        id: &str,
        message: &InternalMessage,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records
            .entry(id.to_string())
            .or_default()
            .history
            .push(message.clone());
        Ok(())
    }

    async fn truncate_history(&self, id: &str) -> Result<(), StoreError> {
        if let Some(record) = self.records.write().await.get_mut(id) {
            record.history.clear();
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn list_session_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let store = InMemorySessionStore::new();
        assert!(store.load_metadata("s1").await.unwrap().is_none());

        let metadata = SessionMetadata::new("s1");
        store.save_metadata(&metadata).await.unwrap();
        assert_eq!(store.load_metadata("s1").await.unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn test_history_append_and_truncate() {
        let store = InMemorySessionStore::new();
        store
            .append_message("s1", &InternalMessage::user("one"))
            .await
            .unwrap();
        store
            .append_message("s1", &InternalMessage::user("two"))
            .await
            .unwrap();
        assert_eq!(store.load_history("s1").await.unwrap().len(), 2);

        store.truncate_history("s1").await.unwrap();
        assert!(store.load_history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncate_keeps_metadata() {
        let store = InMemorySessionStore::new();
        store.save_metadata(&SessionMetadata::new("s1")).await.unwrap();
        store
            .append_message("s1", &InternalMessage::user("x"))
            .await
            .unwrap();
        store.truncate_history("s1").await.unwrap();
        assert!(store.load_metadata("s1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_purges_everything() {
        let store = InMemorySessionStore::new();
        store.save_metadata(&SessionMetadata::new("s1")).await.unwrap();
        store
            .append_message("s1", &InternalMessage::user("x"))
            .await
            .unwrap();

        store.delete_session("s1").await.unwrap();
        assert!(store.load_metadata("s1").await.unwrap().is_none());
        assert!(store.load_history("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_ids_sorted() {
        let store = InMemorySessionStore::new();
        store.save_metadata(&SessionMetadata::new("beta")).await.unwrap();
        store.save_metadata(&SessionMetadata::new("alpha")).await.unwrap();
        assert_eq!(
            store.list_session_ids().await.unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
    }
}
