//! Ollama generate-style provider.
//!
//! Talks to `POST /api/generate` with a single prompt plus an optional
//! inline system prompt. Streaming replies arrive as newline-delimited
//! JSON objects (`{"response": "...", "done": false}`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use tracing::{debug, trace};

use crate::retry::{RetryPolicy, send_with_retry, transport_error};
use crate::stream::for_each_line;

pub const NAME: &str = "ollama";

pub struct OllamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
    probe_timeout: Duration,
}

impl OllamaProvider {
    /// Create a provider with a shared client using `request_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            client,
            retry: RetryPolicy::default(),
            probe_timeout: Duration::from_secs(3),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_probe_timeout(mut self, probe_timeout: Duration) -> Self {
        self.probe_timeout = probe_timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body<'a>(&'a self, prompt: &'a str, options: &'a AskOptions, stream: bool) -> GenerateRequest<'a> {
        let tuning = (options.temperature.is_some() || options.max_tokens.is_some()).then(|| GenerateOptions {
            temperature: options.temperature,
            num_predict: options.max_tokens,
        });

        GenerateRequest {
            model: options.model_or(&self.model),
            prompt,
            stream,
            system: options.system_prompt.as_deref().filter(|s| !s.trim().is_empty()),
            format: options.json_mode.then_some("json"),
            options: tuning,
        }
    }

    async fn post(&self, body: &GenerateRequest<'_>, options: &AskOptions) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/api/generate", options.base_url_or(&self.base_url));
        debug!(provider = NAME, model = %body.model, stream = body.stream, "Sending generate request");
        send_with_retry(self.retry, NAME, || self.client.post(&url).json(body)).await
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &AskOptions) -> Result<Completion, ProviderError> {
        let body = self.request_body(prompt, options, false);
        let response = self.post(&body, options).await?;

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("ollama: {e}")))?;
        if let Some(error) = reply.error {
            return Err(ProviderError::InvalidResponse(format!("ollama: {error}")));
        }

        let text = reply.response.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse(NAME.into()));
        }

        Ok(Completion {
            text,
            provider: NAME.into(),
            model: body.model.to_string(),
        })
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &AskOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let body = self.request_body(prompt, options, true);
        let response = self.post(&body, options).await?;

        let mut text = String::new();
        for_each_line(response, |line| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(true);
            }
            let chunk: GenerateResponse = serde_json::from_str(line)
                .map_err(|e| ProviderError::StreamInterrupted(format!("ollama: bad chunk: {e}")))?;
            if let Some(error) = chunk.error {
                return Err(ProviderError::StreamInterrupted(format!("ollama: {error}")));
            }
            if !chunk.response.is_empty() {
                trace!(len = chunk.response.len(), "ollama token");
                on_token(&chunk.response);
                text.push_str(&chunk.response);
            }
            Ok(!chunk.done)
        })
        .await?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse(NAME.into()));
        }

        Ok(Completion {
            text,
            provider: NAME.into(),
            model: body.model.to_string(),
        })
    }

    /// Fast liveness probe: `GET /api/tags` with a short timeout.
    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(response.status().is_success())
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dead_url, serve};
    use axum::{Json, Router, extract::State, routing::{get, post}};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    fn provider(url: &str) -> OllamaProvider {
        OllamaProvider::new(url, "llama3", Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::new(1, Duration::from_millis(5)))
            .with_probe_timeout(Duration::from_millis(500))
    }

    /// Records each request body and answers with `reply`.
    async fn capture(reply: &'static str) -> (String, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/generate",
                post(move |State(seen): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body);
                    reply
                }),
            )
            .route("/api/tags", get(|| async { "{\"models\":[]}" }))
            .with_state(seen.clone());
        (serve(app).await, seen)
    }

    #[test]
    fn body_includes_only_requested_fields() {
        let p = provider("http://127.0.0.1:1");
        let plain = serde_json::to_value(p.request_body("hi", &AskOptions::new(NAME), false)).unwrap();
        assert_eq!(plain, json!({"model": "llama3", "prompt": "hi", "stream": false}));

        let opts = AskOptions::new(NAME)
            .with_model("qwen")
            .with_json_mode(true)
            .with_temperature(0.5)
            .with_max_tokens(1024)
            .with_system_prompt("be terse");
        let full = serde_json::to_value(p.request_body("hi", &opts, true)).unwrap();
        assert_eq!(full["model"], "qwen");
        assert_eq!(full["format"], "json");
        assert_eq!(full["system"], "be terse");
        assert_eq!(full["options"]["num_predict"], 1024);
        assert_eq!(full["options"]["temperature"], 0.5);
        assert_eq!(full["stream"], true);
    }

    #[tokio::test]
    async fn complete_returns_response_field() {
        let (url, seen) = capture(r#"{"response":"  {\"action\":\"answer\"}  ","done":true}"#).await;
        let completion = provider(&url).complete("hello", &AskOptions::new(NAME)).await.unwrap();
        assert_eq!(completion.text, "{\"action\":\"answer\"}");
        assert_eq!(completion.provider, "ollama");
        assert_eq!(completion.model, "llama3");
        assert_eq!(seen.lock().unwrap()[0]["prompt"], "hello");
    }

    #[tokio::test]
    async fn empty_response_is_an_error() {
        let (url, _) = capture(r#"{"response":"   ","done":true}"#).await;
        let err = provider(&url).complete("hello", &AskOptions::new(NAME)).await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn stream_decodes_ndjson_tokens() {
        let body = concat!(
            "{\"response\":\"{\\\"answer\\\":\",\"done\":false}\n",
            "{\"response\":\"\\\"hi\\\"\",\"done\":false}\n",
            "{\"response\":\"}\",\"done\":true}\n",
        );
        let (url, seen) = capture(body).await;
        let mut tokens = Vec::new();
        let completion = provider(&url)
            .complete_stream("q", &AskOptions::new(NAME), &mut |t: &str| tokens.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(tokens, vec!["{\"answer\":", "\"hi\"", "}"]);
        assert_eq!(completion.text, "{\"answer\":\"hi\"}");
        assert_eq!(seen.lock().unwrap()[0]["stream"], true);
    }

    #[tokio::test]
    async fn stream_surfaces_backend_errors() {
        let (url, _) = capture("{\"error\":\"model not found\"}\n").await;
        let err = provider(&url)
            .complete_stream("q", &AskOptions::new(NAME), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn health_check_reflects_liveness() {
        let (url, _) = capture("{}").await;
        assert!(provider(&url).health_check().await.unwrap());
        assert!(provider(&dead_url()).health_check().await.is_err());
    }
}
