//! LLM switching on the facade

use crate::config::{ConfigError, LlmConfig, LlmUpdates, Severity, ValidationIssue};
use crate::error::{Error, Result};
use crate::state::StateScope;

use super::Agent;

/// Target of a `switch_llm` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmScope {
    /// The current default session
    Default,
    /// A specific session
    Session(String),
    /// Every session (`*`)
    All,
}

impl Agent {
    /// Apply an LLM configuration change to the given scope
    ///
    /// Updates are validated against the merged result before anything is
    /// applied; on success the state manager records the overlay and every
    /// affected live session swaps its adapter while keeping its
    /// conversation log. Returns validation warnings.
    pub async fn switch_llm(
        &self,
        updates: LlmUpdates,
        scope: LlmScope,
    ) -> Result<Vec<ValidationIssue>> {
        self.ensure_started()?;
        if updates.is_empty() {
            return Err(ConfigError::single(ValidationIssue::error(
                "empty_updates",
                "switchLLM requires at least one field to change",
            ))
            .into());
        }

        match scope {
            LlmScope::Default => {
                let id = self.session_manager().current_session_id();
                self.switch_for_session(updates, id).await
            }
            LlmScope::Session(id) => {
                // The target must exist, live or persisted.
                self.session_manager().get_session_metadata(&id).await?;
                self.switch_for_session(updates, id).await
            }
            LlmScope::All => {
                let candidate = updates.apply(&self.state.effective_llm(None));
                let warnings = validate_candidate(&candidate)?;
                self.state.update_llm(updates, StateScope::Global);
                self.session_manager().switch_llm_for_all().await?;
                Ok(warnings)
            }
        }
    }

    async fn switch_for_session(
        &self,
        updates: LlmUpdates,
        id: String,
    ) -> Result<Vec<ValidationIssue>> {
        let candidate = updates.apply(&self.state.effective_llm(Some(&id)));
        let warnings = validate_candidate(&candidate)?;
        self.state
            .update_llm(updates, StateScope::Session(id.clone()));

        // Swap the live adapter; a session that only exists in the store
        // picks the new config up on rehydration.
        if self
            .session_manager()
            .live_session_ids()
            .await
            .contains(&id)
        {
            self.session_manager()
                .switch_llm_for_session(&id, &candidate)
                .await?;
        }
        Ok(warnings)
    }

    /// The effective LLM config for a session (or the base scope), secrets
    /// masked
    pub fn get_effective_llm(&self, session_id: Option<&str>) -> Result<LlmConfig> {
        self.ensure_started()?;
        Ok(self.state.effective_llm(session_id).redacted())
    }
}

fn validate_candidate(candidate: &LlmConfig) -> Result<Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    candidate.validate_into(&mut issues);
    if issues.iter().any(|i| i.severity == Severity::Error) {
        return Err(Error::Config(ConfigError::new(issues)));
    }
    Ok(issues)
}
