//! System prompt composition from prioritized contributors
//!
//! The system prompt is assembled from ordered contributors: static text
//! blocks, the current date/time, or MCP-resource-backed sections. The
//! build is deterministic (priority ascending, id ascending) and re-runs
//! every turn so dynamic sections stay fresh.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SystemPromptConfig, ValidationIssue};
use crate::mcp::McpManager;

/// Dynamic content source for a contributor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicSource {
    /// Current date/time, stable formatting
    DateTime,
    /// Content of an MCP resource, by URI
    Resource(String),
}

impl DynamicSource {
    pub fn as_string(&self) -> String {
        match self {
            DynamicSource::DateTime => "dateTime".to_string(),
            DynamicSource::Resource(uri) => format!("resource:{}", uri),
        }
    }
}

impl std::str::FromStr for DynamicSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "dateTime" {
            Ok(DynamicSource::DateTime)
        } else if let Some(uri) = s.strip_prefix("resource:") {
            if uri.is_empty() {
                Err("resource source requires a URI".to_string())
            } else {
                Ok(DynamicSource::Resource(uri.to_string()))
            }
        } else {
            Err(format!(
                "unknown dynamic source '{}' (expected 'dateTime' or 'resource:<uri>')",
                s
            ))
        }
    }
}

impl Serialize for DynamicSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_string())
    }
}

impl<'de> Deserialize<'de> for DynamicSource {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Contributor kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributorKind {
    Static,
    Dynamic,
}

/// One unit of the system prompt
///
/// `static` contributors carry `content`; `dynamic` contributors carry
/// `source`. Unknown fields are rejected at parse time, cross-variant
/// mismatches at validation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptContributor {
    pub id: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: ContributorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<DynamicSource>,
}

fn default_enabled() -> bool {
    true
}

impl PromptContributor {
    pub fn static_text(id: impl Into<String>, priority: i32, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            kind: ContributorKind::Static,
            content: Some(content.into()),
            source: None,
        }
    }

    pub fn dynamic(id: impl Into<String>, priority: i32, source: DynamicSource) -> Self {
        Self {
            id: id.into(),
            priority,
            enabled: true,
            kind: ContributorKind::Dynamic,
            content: None,
            source: Some(source),
        }
    }

    /// Validate variant/field consistency
    pub fn validate_into(&self, issues: &mut Vec<ValidationIssue>) {
        match self.kind {
            ContributorKind::Static => {
                if self.content.as_deref().map_or(true, str::is_empty) {
                    issues.push(ValidationIssue::error(
                        "missing_content",
                        format!("contributor '{}': static requires content", self.id),
                    ));
                }
                if self.source.is_some() {
                    issues.push(ValidationIssue::error(
                        "unexpected_source",
                        format!("contributor '{}': static must not set source", self.id),
                    ));
                }
            }
            ContributorKind::Dynamic => {
                if self.source.is_none() {
                    issues.push(ValidationIssue::error(
                        "missing_source",
                        format!("contributor '{}': dynamic requires source", self.id),
                    ));
                }
                if self.content.is_some() {
                    issues.push(ValidationIssue::error(
                        "unexpected_content",
                        format!("contributor '{}': dynamic must not set content", self.id),
                    ));
                }
            }
        }
    }
}

/// Context handed to the prompt build; resource-backed contributors read
/// through the MCP manager
#[derive(Default)]
pub struct PromptContext<'a> {
    pub mcp: Option<&'a McpManager>,
}

/// Builds the system prompt from contributors
pub struct PromptManager {
    contributors: Vec<PromptContributor>,
}

impl PromptManager {
    /// Build from the configured system prompt, validating contributors
    pub fn from_config(config: &SystemPromptConfig) -> Result<Self, ConfigError> {
        let contributors = match config {
            SystemPromptConfig::Literal(text) => {
                vec![PromptContributor::static_text("system", 0, text.clone())]
            }
            SystemPromptConfig::Contributors { contributors } => {
                let mut issues = Vec::new();
                if contributors.is_empty() {
                    issues.push(ValidationIssue::error(
                        "empty_contributors",
                        "at least one contributor is required",
                    ));
                }
                for contributor in contributors {
                    contributor.validate_into(&mut issues);
                }
                if !issues.is_empty() {
                    return Err(ConfigError::new(issues));
                }
                contributors.clone()
            }
        };
        Ok(Self { contributors })
    }

    pub fn contributors(&self) -> &[PromptContributor] {
        &self.contributors
    }

    /// Compose the prompt: enabled contributors, sorted by
    /// (priority asc, id asc), joined with a blank line
    ///
    /// Dynamic resolution failures degrade to empty sections with a logged
    /// warning; the build itself never fails.
    pub async fn build(&self, context: &PromptContext<'_>) -> String {
        let mut active: Vec<&PromptContributor> =
            self.contributors.iter().filter(|c| c.enabled).collect();
        active.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut sections = Vec::with_capacity(active.len());
        for contributor in active {
            let section = self.resolve(contributor, context).await;
            if !section.is_empty() {
                sections.push(section);
            }
        }
        sections.join("\n\n")
    }

    async fn resolve(
        &self,
        contributor: &PromptContributor,
        context: &PromptContext<'_>,
    ) -> String {
        match contributor.kind {
            ContributorKind::Static => contributor.content.clone().unwrap_or_default(),
            ContributorKind::Dynamic => match &contributor.source {
                Some(DynamicSource::DateTime) => {
                    format!(
                        "Current date and time: {}",
                        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
                    )
                }
                Some(DynamicSource::Resource(uri)) => match context.mcp {
                    Some(mcp) => match mcp.read_resource(uri).await {
                        Ok(text) => text,
                        Err(err) => {
                            log::warn!(
                                "contributor '{}': resource '{}' unavailable: {}",
                                contributor.id,
                                uri,
                                err
                            );
                            String::new()
                        }
                    },
                    None => {
                        log::warn!(
                            "contributor '{}': no MCP manager available for resource '{}'",
                            contributor.id,
                            uri
                        );
                        String::new()
                    }
                },
                None => String::new(),
            },
        }
    }
}
