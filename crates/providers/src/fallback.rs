//! Auto provider: local backend first, hosted chat backend as fallback.
//!
//! The local backend is probed with a fast liveness check before each call.
//! When it is down, or fails before producing output, the request goes to
//! the remote backend, if one is configured. A stream that already emitted
//! tokens is not retried elsewhere: the caller has shown part of that reply.

use async_trait::async_trait;
use std::sync::Arc;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use tracing::{info, warn};

pub const NAME: &str = "auto";

pub struct AutoProvider {
    local: Arc<dyn Provider>,
    remote: Option<Arc<dyn Provider>>,
}

impl AutoProvider {
    /// `remote` is `None` when the hosted backend has no API key.
    pub fn new(local: Arc<dyn Provider>, remote: Option<Arc<dyn Provider>>) -> Self {
        Self { local, remote }
    }

    async fn local_is_alive(&self) -> bool {
        match self.local.health_check().await {
            Ok(alive) => alive,
            Err(e) => {
                info!(provider = %self.local.name(), error = %e, "Local backend unreachable");
                false
            }
        }
    }

    fn remote(&self) -> Result<&Arc<dyn Provider>, ProviderError> {
        self.remote.as_ref().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "{} unavailable and OpenAI API key is missing",
                self.local.name()
            ))
        })
    }

    /// Options for the fallback: the local model name means nothing there.
    fn remote_options(options: &AskOptions) -> AskOptions {
        AskOptions {
            model: String::new(),
            base_url: String::new(),
            ..options.clone()
        }
    }
}

#[async_trait]
impl Provider for AutoProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        self.local.default_model()
    }

    async fn complete(&self, prompt: &str, options: &AskOptions) -> Result<Completion, ProviderError> {
        if self.local_is_alive().await {
            match self.local.complete(prompt, options).await {
                Ok(completion) => return Ok(completion),
                Err(e) if self.remote.is_some() => {
                    warn!(provider = %self.local.name(), error = %e, "Local backend failed, falling back");
                }
                Err(e) => return Err(e),
            }
        }
        let remote = self.remote()?;
        info!(provider = %remote.name(), "Auto: using fallback backend");
        remote.complete(prompt, &Self::remote_options(options)).await
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &AskOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, ProviderError> {
        if self.local_is_alive().await {
            let mut emitted = false;
            let result = {
                let mut tracking = |token: &str| {
                    emitted = true;
                    on_token(token);
                };
                self.local.complete_stream(prompt, options, &mut tracking).await
            };
            match result {
                Ok(completion) => return Ok(completion),
                Err(e) if emitted => {
                    warn!(provider = %self.local.name(), error = %e, "Local backend stream broke after output");
                    return Err(e);
                }
                Err(e) if self.remote.is_some() => {
                    warn!(provider = %self.local.name(), error = %e, "Local backend stream failed, falling back");
                }
                Err(e) => return Err(e),
            }
        }
        let remote = self.remote()?;
        info!(provider = %remote.name(), "Auto: using fallback backend (streaming)");
        remote
            .complete_stream(prompt, &Self::remote_options(options), on_token)
            .await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        if self.local_is_alive().await {
            return Ok(true);
        }
        match &self.remote {
            Some(remote) => remote.health_check().await,
            None => Ok(false),
        }
    }
}
