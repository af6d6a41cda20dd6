//! OpenAI-compatible chat-completion provider.
//!
//! Works with OpenAI and any endpoint exposing `/chat/completions`:
//! - Non-streaming and SSE streaming replies
//! - JSON response mode (`response_format: {"type": "json_object"}`)
//! - Bearer-token authentication; a missing key fails before any request

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use tracing::{debug, trace, warn};

use crate::retry::{RetryPolicy, send_with_retry};
use crate::stream::for_each_line;

pub const NAME: &str = "openai";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a pragmatic coding assistant.";

pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider. A blank key is treated as
    /// missing.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: NAME.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty()),
            model: model.into(),
            client,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Rename for logs and output, e.g. for self-hosted gateways.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("missing OpenAI API key".into()))
    }

    fn request_body<'a>(&'a self, prompt: &'a str, options: &'a AskOptions, stream: bool) -> ChatRequest<'a> {
        let system = options
            .system_prompt
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);

        ChatRequest {
            model: options.model_or(&self.model),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            stream,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options.json_mode.then_some(ResponseFormat { r#type: "json_object" }),
        }
    }

    async fn post(
        &self,
        body: &ChatRequest<'_>,
        options: &AskOptions,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key()?;
        let url = format!("{}/chat/completions", options.base_url_or(&self.base_url));
        debug!(provider = %self.name, model = %body.model, stream = body.stream, "Sending completion request");

        send_with_retry(self.retry, &self.name, || {
            let request = self.client.post(&url).bearer_auth(api_key).json(body);
            if body.stream {
                request.header("Accept", "text/event-stream")
            } else {
                request
            }
        })
        .await
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, options: &AskOptions) -> Result<Completion, ProviderError> {
        let body = self.request_body(prompt, options, false);
        let response = self.post(&body, options).await?;

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("{}: {e}", self.name)))?;

        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default()
            .trim()
            .to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse(self.name.clone()));
        }

        Ok(Completion {
            text,
            provider: self.name.clone(),
            model: reply.model.filter(|m| !m.is_empty()).unwrap_or_else(|| body.model.to_string()),
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
        let mut model: Option<String> = None;
        for_each_line(response, |line| {
            // Skip blank separators and SSE comments
            let Some(data) = line.strip_prefix("data:") else {
                return Ok(true);
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(false);
            }
            match serde_json::from_str::<StreamResponse>(data) {
                Ok(chunk) => {
                    if model.is_none() {
                        model = chunk.model.filter(|m| !m.is_empty());
                    }
                    let delta = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta.content)
                        .unwrap_or_default();
                    if !delta.is_empty() {
                        trace!(len = delta.len(), "chat token");
                        on_token(&delta);
                        text.push_str(&delta);
                    }
                }
                Err(e) => warn!(error = %e, "Skipping malformed stream chunk"),
            }
            Ok(true)
        })
        .await?;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse(self.name.clone()));
        }

        Ok(Completion {
            text,
            provider: self.name.clone(),
            model: model.unwrap_or_else(|| body.model.to_string()),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    fn provider(url: &str, key: Option<&str>) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(url, key.map(String::from), "gpt-4o-mini", Duration::from_secs(5))
            .unwrap()
            .with_retry(RetryPolicy::new(1, Duration::from_millis(5)))
    }

    /// Records (authorization header, body) and answers with `reply`.
    async fn capture(reply: &'static str) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/chat/completions",
                post(move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    seen.lock().unwrap().push((auth, body));
                    reply
                }),
            )
            .with_state(seen.clone());
        (serve(app).await, seen)
    }

    #[test]
    fn body_uses_default_system_prompt_and_json_mode() {
        let p = provider("http://127.0.0.1:1", Some("sk"));
        let body = serde_json::to_value(p.request_body("hi", &AskOptions::new(NAME).with_json_mode(true), false)).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["response_format"], json!({"type": "json_object"}));
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[tokio::test]
    async fn missing_key_fails_without_request() {
        let (url, seen) = capture("{}").await;
        let err = provider(&url, Some("   ")).complete("hi", &AskOptions::new(NAME)).await.unwrap_err();
        assert_eq!(err.to_string(), "missing OpenAI API key");
        assert!(!err.is_retryable());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_sends_bearer_and_reads_first_choice() {
        let (url, seen) = capture(
            r#"{"model":"gpt-4o-mini-2024","choices":[{"message":{"role":"assistant","content":"done"}}]}"#,
        )
        .await;
        let opts = AskOptions::new(NAME).with_temperature(0.2).with_max_tokens(1024);
        let completion = provider(&url, Some("sk-test")).complete("hi", &opts).await.unwrap();
        assert_eq!(completion.text, "done");
        assert_eq!(completion.model, "gpt-4o-mini-2024");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-test"));
        assert_eq!(seen[0].1["max_tokens"], 1024);
        assert_eq!(seen[0].1["stream"], false);
    }

    #[tokio::test]
    async fn empty_choices_are_an_error() {
        let (url, _) = capture(r#"{"choices":[]}"#).await;
        let err = provider(&url, Some("sk")).complete("hi", &AskOptions::new(NAME)).await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn stream_reads_sse_until_done() {
        let body = concat!(
            ": keep-alive\n\n",
            "data: {\"model\":\"gpt-x\",\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        );
        let (url, seen) = capture(body).await;
        let mut tokens = Vec::new();
        let completion = provider(&url, Some("sk"))
            .complete_stream("hi", &AskOptions::new(NAME), &mut |t: &str| tokens.push(t.to_string()))
            .await
            .unwrap();
        assert_eq!(tokens, vec!["Hel", "lo"]);
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.model, "gpt-x");
        assert_eq!(seen.lock().unwrap()[0].1["stream"], true);
    }
}
