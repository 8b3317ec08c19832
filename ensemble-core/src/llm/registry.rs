//! Static model/provider registry
//!
//! One table per provider listing the supported models, their context
//! windows, and capability flags. The registry backs configuration
//! validation, compression thresholds, and provider inference from bare
//! model names.

use serde::{Deserialize, Serialize};

use super::LlmRouter;

/// Supported LLM providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    /// Any server speaking the OpenAI chat-completions protocol; requires
    /// `base_url` and accepts arbitrary model names
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::OpenAiCompatible => "openai-compatible",
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(LlmProvider::OpenAi),
            "anthropic" => Ok(LlmProvider::Anthropic),
            "openai-compatible" => Ok(LlmProvider::OpenAiCompatible),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Metadata for a single supported model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub max_input_tokens: usize,
    pub is_default: bool,
    pub supports_vision: bool,
}

/// Registry entry for one provider
#[derive(Debug, Clone, Copy)]
pub struct ProviderInfo {
    pub provider: LlmProvider,
    pub models: &'static [ModelInfo],
    pub default_router: LlmRouter,
    pub accepts_base_url: bool,
}

/// Context window assumed for unknown openai-compatible models
pub const COMPATIBLE_DEFAULT_CONTEXT: usize = 32_768;

/// Upper bound for a single file attachment
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

const OPENAI_MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "gpt-4o-mini",
        max_input_tokens: 128_000,
        is_default: true,
        supports_vision: true,
    },
    ModelInfo {
        name: "gpt-4o",
        max_input_tokens: 128_000,
        is_default: false,
        supports_vision: true,
    },
    ModelInfo {
        name: "gpt-4.1",
        max_input_tokens: 1_047_576,
        is_default: false,
        supports_vision: true,
    },
    ModelInfo {
        name: "gpt-4.1-mini",
        max_input_tokens: 1_047_576,
        is_default: false,
        supports_vision: true,
    },
    ModelInfo {
        name: "o4-mini",
        max_input_tokens: 200_000,
        is_default: false,
        supports_vision: false,
    },
];

const ANTHROPIC_MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "claude-4-sonnet",
        max_input_tokens: 200_000,
        is_default: true,
        supports_vision: true,
    },
    ModelInfo {
        name: "claude-4-opus",
        max_input_tokens: 200_000,
        is_default: false,
        supports_vision: true,
    },
    ModelInfo {
        name: "claude-3-7-sonnet",
        max_input_tokens: 200_000,
        is_default: false,
        supports_vision: true,
    },
    ModelInfo {
        name: "claude-3-5-haiku",
        max_input_tokens: 200_000,
        is_default: false,
        supports_vision: true,
    },
];

const OPENAI_INFO: ProviderInfo = ProviderInfo {
    provider: LlmProvider::OpenAi,
    models: OPENAI_MODELS,
    default_router: LlmRouter::Unified,
    accepts_base_url: false,
};

const ANTHROPIC_INFO: ProviderInfo = ProviderInfo {
    provider: LlmProvider::Anthropic,
    models: ANTHROPIC_MODELS,
    default_router: LlmRouter::InBuilt,
    accepts_base_url: false,
};

const COMPATIBLE_INFO: ProviderInfo = ProviderInfo {
    provider: LlmProvider::OpenAiCompatible,
    models: &[],
    default_router: LlmRouter::Unified,
    accepts_base_url: true,
};

/// Look up the registry entry for a provider
pub fn provider_info(provider: LlmProvider) -> &'static ProviderInfo {
    match provider {
        LlmProvider::OpenAi => &OPENAI_INFO,
        LlmProvider::Anthropic => &ANTHROPIC_INFO,
        LlmProvider::OpenAiCompatible => &COMPATIBLE_INFO,
    }
}

/// Resolve a model under a provider
///
/// `openai-compatible` accepts any model name with a conservative default
/// context window; other providers only accept models from their table.
pub fn find_model(provider: LlmProvider, model: &str) -> Option<ModelInfo> {
    if provider == LlmProvider::OpenAiCompatible {
        return Some(ModelInfo {
            // The caller keeps the owned name; this entry only carries limits.
            name: "",
            max_input_tokens: COMPATIBLE_DEFAULT_CONTEXT,
            is_default: false,
            supports_vision: false,
        });
    }
    provider_info(provider)
        .models
        .iter()
        .find(|m| m.name == model)
        .copied()
}

/// The default model for a provider, if its table defines one
pub fn default_model(provider: LlmProvider) -> Option<&'static str> {
    provider_info(provider)
        .models
        .iter()
        .find(|m| m.is_default)
        .map(|m| m.name)
}

/// Infer the provider from a bare model name
pub fn infer_provider(model: &str) -> Option<LlmProvider> {
    if model.starts_with("claude-") {
        Some(LlmProvider::Anthropic)
    } else if model.starts_with("gpt-")
        || model.starts_with("chatgpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
    {
        Some(LlmProvider::OpenAi)
    } else {
        None
    }
}

/// Context window for a (provider, model) pair
pub fn max_input_tokens(provider: LlmProvider, model: &str) -> Option<usize> {
    find_model(provider, model).map(|m| m.max_input_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_models() {
        assert_eq!(default_model(LlmProvider::OpenAi), Some("gpt-4o-mini"));
        assert_eq!(
            default_model(LlmProvider::Anthropic),
            Some("claude-4-sonnet")
        );
        assert_eq!(default_model(LlmProvider::OpenAiCompatible), None);
    }

    #[test]
    fn test_find_model_known() {
        let info = find_model(LlmProvider::OpenAi, "gpt-4o").unwrap();
        assert_eq!(info.max_input_tokens, 128_000);
        assert!(info.supports_vision);
    }

    #[test]
    fn test_find_model_unknown_rejected() {
        assert!(find_model(LlmProvider::OpenAi, "claude-4-sonnet").is_none());
        assert!(find_model(LlmProvider::Anthropic, "gpt-4o").is_none());
    }

    #[test]
    fn test_compatible_accepts_anything() {
        let info = find_model(LlmProvider::OpenAiCompatible, "local-llama-70b").unwrap();
        assert_eq!(info.max_input_tokens, COMPATIBLE_DEFAULT_CONTEXT);
    }

    #[test]
    fn test_infer_provider() {
        assert_eq!(infer_provider("claude-4-sonnet"), Some(LlmProvider::Anthropic));
        assert_eq!(infer_provider("gpt-4o-mini"), Some(LlmProvider::OpenAi));
        assert_eq!(infer_provider("o3-mini"), Some(LlmProvider::OpenAi));
        assert_eq!(infer_provider("mystery-model"), None);
    }

    #[test]
    fn test_base_url_policy() {
        assert!(!provider_info(LlmProvider::OpenAi).accepts_base_url);
        assert!(!provider_info(LlmProvider::Anthropic).accepts_base_url);
        assert!(provider_info(LlmProvider::OpenAiCompatible).accepts_base_url);
    }

    #[test]
    fn test_default_routers() {
        assert_eq!(
            provider_info(LlmProvider::OpenAi).default_router,
            LlmRouter::Unified
        );
        assert_eq!(
            provider_info(LlmProvider::Anthropic).default_router,
            LlmRouter::InBuilt
        );
    }

    #[test]
    fn test_provider_string_round_trip() {
        for provider in [
            LlmProvider::OpenAi,
            LlmProvider::Anthropic,
            LlmProvider::OpenAiCompatible,
        ] {
            let parsed: LlmProvider = provider.as_str().parse().unwrap();
            assert_eq!(parsed, provider);
        }
    }
}
