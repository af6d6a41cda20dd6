//! Provider router: selects the backend for a session from config.
//!
//! Resolves the provider identifier, validates base URLs and credentials up
//! front, and returns the provider together with the session's `AskOptions`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use stepwise_config::{AppConfig, validate_base_url};
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Provider};
use tracing::debug;

use crate::fallback::AutoProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Auto,
    Ollama,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ollama" => Ok(Self::Ollama),
            "" | "openai" => Ok(Self::OpenAi),
            other => Err(ProviderError::InvalidProvider(other.to_string())),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider and resolved options for one CLI session.
pub struct SessionProvider {
    pub kind: ProviderKind,
    pub provider: Arc<dyn Provider>,
    pub options: AskOptions,
}

/// Build the session provider from fully layered configuration.
pub fn build_from_config(config: &AppConfig) -> Result<SessionProvider, ProviderError> {
    let kind: ProviderKind = config.default_provider.parse()?;
    let retry = RetryPolicy::new(config.retry.max_retries, config.retry.base_delay());

    let (provider, options): (Arc<dyn Provider>, AskOptions) = match kind {
        ProviderKind::Ollama => {
            let backend = ollama(config, retry)?;
            let options = AskOptions::new(kind.as_str())
                .with_model(&config.ollama.model)
                .with_base_url(backend.base_url());
            (Arc::new(backend), options)
        }
        ProviderKind::OpenAi => {
            let backend = openai(config, retry)?;
            if !backend.has_api_key() {
                return Err(ProviderError::NotConfigured("missing OpenAI API key".into()));
            }
            let options = AskOptions::new(kind.as_str())
                .with_model(&config.openai.model)
                .with_base_url(config.openai.base_url.trim_end_matches('/'));
            (Arc::new(backend), options)
        }
        ProviderKind::Auto => {
            let local: Arc<dyn Provider> = Arc::new(ollama(config, retry)?);
            let hosted = openai(config, retry)?;
            let remote: Option<Arc<dyn Provider>> = if hosted.has_api_key() {
                Some(Arc::new(hosted))
            } else {
                None
            };
            // Each backend fills in its own model and base URL.
            (Arc::new(AutoProvider::new(local, remote)), AskOptions::new(kind.as_str()))
        }
    };

    debug!(provider = %kind, model = %options.model, "Resolved session provider");
    Ok(SessionProvider {
        kind,
        provider,
        options,
    })
}

fn ollama(config: &AppConfig, retry: RetryPolicy) -> Result<OllamaProvider, ProviderError> {
    validate_base_url(&config.ollama.base_url).map_err(ProviderError::NotConfigured)?;
    Ok(OllamaProvider::new(
        &config.ollama.base_url,
        &config.ollama.model,
        config.retry.request_timeout(),
    )?
    .with_retry(retry)
    .with_probe_timeout(config.retry.probe_timeout()))
}

fn openai(config: &AppConfig, retry: RetryPolicy) -> Result<OpenAiCompatProvider, ProviderError> {
    validate_base_url(&config.openai.base_url).map_err(ProviderError::NotConfigured)?;
    Ok(OpenAiCompatProvider::new(
        &config.openai.base_url,
        config.openai.api_key.clone(),
        &config.openai.model,
        config.retry.request_timeout(),
    )?
    .with_retry(retry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("AUTO".parse::<ProviderKind>().unwrap(), ProviderKind::Auto);
        assert_eq!("".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        let err = "claude".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.to_string(), "invalid provider \"claude\" (use auto|ollama|openai)");
    }

    #[test]
    fn openai_without_key_is_rejected_up_front() {
        let config = AppConfig::default();
        let err = build_from_config(&config).err().unwrap();
        assert_eq!(err.to_string(), "missing OpenAI API key");
    }

    #[test]
    fn openai_with_key_resolves_options() {
        let mut config = AppConfig::default();
        config.openai.api_key = Some("sk-test".into());
        config.openai.base_url = "https://gateway.example.com/v1/".into();
        let session = build_from_config(&config).unwrap();
        assert_eq!(session.kind, ProviderKind::OpenAi);
        assert_eq!(session.provider.name(), "openai");
        assert_eq!(session.options.model, "gpt-4o-mini");
        assert_eq!(session.options.base_url, "https://gateway.example.com/v1");
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        let session = build_from_config(&config).unwrap();
        assert_eq!(session.provider.name(), "ollama");
        assert_eq!(session.options.base_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn malformed_base_url_is_terminal() {
        let mut config = AppConfig::default();
        config.default_provider = "ollama".into();
        config.ollama.base_url = "ftp://models".into();
        let err = build_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn auto_mode_builds_without_key() {
        let mut config = AppConfig::default();
        config.default_provider = "auto".into();
        let session = build_from_config(&config).unwrap();
        assert_eq!(session.provider.name(), "auto");
        assert!(session.options.model.is_empty());
    }
}
