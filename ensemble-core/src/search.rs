//! Search over persisted conversation history

use std::sync::Arc;

use regex::RegexBuilder;

use crate::error::{Error, Result};
use crate::session::store::SessionStore;
use crate::types::Role;

/// A message matching a search query
#[derive(Debug, Clone, PartialEq)]
pub struct MessageMatch {
    pub session_id: String,
    /// Index of the message within its session history
    pub index: usize,
    pub role: Role,
    /// The matched message text, trimmed to a readable window
    pub snippet: String,
}

const SNIPPET_CONTEXT: usize = 60;

/// Case-insensitive substring search across sessions
pub struct SearchService {
    store: Arc<dyn SessionStore>,
}

impl SearchService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Find messages containing `query`, optionally within one session
    pub async fn search_messages(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<Vec<MessageMatch>> {
        let pattern = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Other(format!("invalid search query: {}", e)))?;

        let ids = match session_id {
            Some(id) => vec![id.to_string()],
            None => self.store.list_session_ids().await?,
        };

        let mut matches = Vec::new();
        for id in ids {
            let history = self.store.load_history(&id).await?;
            for (index, message) in history.iter().enumerate() {
                let text = message.text();
                if let Some(found) = pattern.find(&text) {
                    matches.push(MessageMatch {
                        session_id: id.clone(),
                        index,
                        role: message.role,
                        snippet: snippet_around(&text, found.start(), found.end()),
                    });
                }
            }
        }
        Ok(matches)
    }

    /// Session ids whose history contains `query`
    pub async fn search_sessions(&self, query: &str) -> Result<Vec<String>> {
        let pattern = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::Other(format!("invalid search query: {}", e)))?;

        let mut out = Vec::new();
        for id in self.store.list_session_ids().await? {
            let history = self.store.load_history(&id).await?;
            if history.iter().any(|m| pattern.is_match(&m.text())) {
                out.push(id);
            }
        }
        Ok(out)
    }
}

fn snippet_around(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .take(SNIPPET_CONTEXT)
        .last()
        .map(|(i, _)| i)
        .unwrap_or(start);
    let to = text[end..]
        .char_indices()
        .take(SNIPPET_CONTEXT)
        .last()
        .map(|(i, c)| end + i + c.len_utf8())
        .unwrap_or(end);
    let mut snippet = String::new();
    if from > 0 {
        snippet.push('…');
    }
    snippet.push_str(&text[from..to]);
    if to < text.len() {
        snippet.push('…');
    }
    snippet
}
