//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider sends a single prompt (plus an optional system prompt) to a
//! completion backend and returns the full text, either in one piece or
//! token by token through a callback.
//!
//! Implementations: OpenAI-compatible chat, Ollama generate, and the
//! auto-selecting wrapper that probes the local backend first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Per-call request options.
///
/// Built once per session from layered config (explicit override >
/// environment > config file) and never mutated afterwards; per-call
/// variations are made with the `with_*` builders on a clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AskOptions {
    /// Provider identifier (`ollama`, `openai`, or `auto`).
    pub provider: String,

    /// Model name. Empty means "use the backend's default".
    #[serde(default)]
    pub model: String,

    /// Base URL override. Empty means "use the backend's default".
    #[serde(default)]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Ask the backend for a JSON-only reply.
    #[serde(default)]
    pub json_mode: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl AskOptions {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Returns `model` unless empty, otherwise `fallback`.
    pub fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        let model = self.model.trim();
        if model.is_empty() { fallback } else { model }
    }

    /// Returns `base_url` without a trailing slash unless empty, otherwise `fallback`.
    pub fn base_url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        let base = self.base_url.trim();
        if base.is_empty() {
            fallback.trim_end_matches('/')
        } else {
            base.trim_end_matches('/')
        }
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text.
    pub text: String,

    /// Which backend actually answered (matters in auto mode).
    pub provider: String,

    /// Which model actually answered.
    pub model: String,
}

/// Token callback used by streaming completions. It runs synchronously on
/// the task reading the response, so it must not block for long.
pub type TokenSink<'a> = dyn FnMut(&str) + Send + 'a;

/// The core Provider trait.
///
/// The agent loop calls `complete()` or `complete_stream()` without knowing
/// which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// The model used when `AskOptions::model` is empty.
    fn default_model(&self) -> &str;

    /// Send a prompt and get the complete response.
    async fn complete(
        &self,
        prompt: &str,
        options: &AskOptions,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a prompt and receive tokens as they arrive.
    ///
    /// Default implementation calls `complete()` and hands the whole text to
    /// the callback once.
    async fn complete_stream(
        &self,
        prompt: &str,
        options: &AskOptions,
        on_token: &mut TokenSink<'_>,
    ) -> std::result::Result<Completion, ProviderError> {
        let completion = self.complete(prompt, options).await?;
        on_token(&completion.text);
        Ok(completion)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn default_model(&self) -> &str {
            "fixed-1"
        }

        async fn complete(
            &self,
            _prompt: &str,
            options: &AskOptions,
        ) -> std::result::Result<Completion, ProviderError> {
            Ok(Completion {
                text: "hello".into(),
                provider: "fixed".into(),
                model: options.model_or(self.default_model()).to_string(),
            })
        }
    }

    #[test]
    fn option_fallbacks() {
        let opts = AskOptions::new("openai");
        assert_eq!(opts.model_or("gpt-4o-mini"), "gpt-4o-mini");
        assert_eq!(opts.base_url_or("http://localhost:11434/"), "http://localhost:11434");

        let opts = opts.with_model(" llama3 ").with_base_url("https://example.com/v1/");
        assert_eq!(opts.model_or("gpt-4o-mini"), "llama3");
        assert_eq!(opts.base_url_or("unused"), "https://example.com/v1");
    }

    #[tokio::test]
    async fn default_stream_delivers_whole_text_once() {
        let provider = FixedProvider;
        let mut seen = Vec::new();
        let completion = provider
            .complete_stream("hi", &AskOptions::new("fixed"), &mut |t: &str| {
                seen.push(t.to_string())
            })
            .await
            .unwrap();
        assert_eq!(seen, vec!["hello".to_string()]);
        assert_eq!(completion.model, "fixed-1");
    }

    #[test]
    fn options_serialize_without_empty_optionals() {
        let json = serde_json::to_string(&AskOptions::new("ollama").with_json_mode(true)).unwrap();
        assert!(json.contains("\"json_mode\":true"));
        assert!(!json.contains("temperature"));
    }
}
