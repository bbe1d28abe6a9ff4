//! LLM provider selection.
//!
//! The service does not talk to any model itself; the browser driver owns the
//! chat clients. This module only resolves the caller's provider/model choice
//! into a concrete selection the driver can construct a client from, and
//! serves the provider catalog for the `/providers` endpoint.

use serde::Serialize;

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Browser-driver optimized LLM (fastest)
    BrowserUse,
    /// Google Gemini models (free tier available)
    Gemini,
    /// OpenAI GPT models
    OpenAi,
    /// Anthropic Claude models
    Anthropic,
}

impl LlmProvider {
    /// Parse a provider name. Accepts `google` as an alias for Gemini.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "browseruse" => Some(Self::BrowserUse),
            "gemini" | "google" => Some(Self::Gemini),
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BrowserUse => "browseruse",
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Default model when the caller does not pick one.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::BrowserUse => "browseruse-default",
            Self::Gemini => "gemini-flash-latest",
            Self::OpenAi => "gpt-5-mini",
            Self::Anthropic => "claude-haiku-4-5",
        }
    }
}

/// A resolved provider + model pair handed to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSelection {
    pub provider: LlmProvider,
    pub model: String,
}

impl LlmSelection {
    /// Resolve a caller-supplied provider name and optional model.
    ///
    /// Unknown provider names fall back to Gemini rather than failing the
    /// task, matching the free-tier default.
    pub fn resolve(provider: &str, model: Option<&str>) -> Self {
        let provider = match LlmProvider::parse(provider) {
            Some(p) => p,
            None => {
                tracing::warn!("Unknown provider '{}', falling back to Gemini", provider);
                LlmProvider::Gemini
            }
        };
        let model = model
            .map(|m| m.to_string())
            .unwrap_or_else(|| provider.default_model().to_string());
        Self { provider, model }
    }
}

/// Catalog entry for the `/providers` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub description: &'static str,
    pub default_model: &'static str,
    pub requires: &'static str,
}

/// Static provider catalog.
pub fn catalog() -> Vec<(&'static str, ProviderInfo)> {
    vec![
        (
            "browseruse",
            ProviderInfo {
                description: "Browser Use optimized LLM (fastest, recommended)",
                default_model: LlmProvider::BrowserUse.default_model(),
                requires: "BROWSER_USE_API_KEY",
            },
        ),
        (
            "gemini",
            ProviderInfo {
                description: "Google Gemini models (free tier available)",
                default_model: LlmProvider::Gemini.default_model(),
                requires: "GOOGLE_API_KEY",
            },
        ),
        (
            "openai",
            ProviderInfo {
                description: "OpenAI GPT models",
                default_model: LlmProvider::OpenAi.default_model(),
                requires: "OPENAI_API_KEY",
            },
        ),
        (
            "anthropic",
            ProviderInfo {
                description: "Anthropic Claude models",
                default_model: LlmProvider::Anthropic.default_model(),
                requires: "ANTHROPIC_API_KEY",
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_uses_provider_default_model() {
        let selection = LlmSelection::resolve("anthropic", None);
        assert_eq!(selection.provider, LlmProvider::Anthropic);
        assert_eq!(selection.model, "claude-haiku-4-5");
    }

    #[test]
    fn resolve_keeps_explicit_model() {
        let selection = LlmSelection::resolve("openai", Some("gpt-5"));
        assert_eq!(selection.provider, LlmProvider::OpenAi);
        assert_eq!(selection.model, "gpt-5");
    }

    #[test]
    fn unknown_provider_falls_back_to_gemini() {
        let selection = LlmSelection::resolve("mistral", None);
        assert_eq!(selection.provider, LlmProvider::Gemini);
        assert_eq!(selection.model, "gemini-flash-latest");
    }

    #[test]
    fn google_is_an_alias_for_gemini() {
        assert_eq!(LlmProvider::parse("google"), Some(LlmProvider::Gemini));
        assert_eq!(LlmProvider::parse("GEMINI"), Some(LlmProvider::Gemini));
    }
}
