//! Decider: one planning call from prompt to `Decision`.
//!
//! Cache lookup first, then a streamed completion. Output that does not
//! parse gets a single repair round-trip; if that fails too, the raw text
//! is treated as a plain answer so the operator still sees something.

use std::sync::Arc;
use std::time::Instant;

use stepwise_core::decision::Decision;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use tracing::{debug, warn};

use crate::codec::{build_system_prompt, build_user_prompt, decision_options, parse_decision, repair_prompt};
use crate::decision_cache::DecisionCache;

/// Everything a planning call depends on.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub prompt: &'a str,
    pub unit_catalog: &'a str,
    pub tool_catalog: &'a str,
    pub env_context: &'a str,
}

pub struct Decider {
    provider: Arc<dyn Provider>,
    options: AskOptions,
    cache: Option<Arc<DecisionCache>>,
}

impl Decider {
    pub fn new(provider: Arc<dyn Provider>, options: AskOptions) -> Self {
        Self {
            provider,
            options,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &AskOptions {
        &self.options
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub async fn decide(
        &self,
        request: &DecisionRequest<'_>,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Decision, ProviderError> {
        let key = self.cache.as_ref().map(|_| {
            DecisionCache::key(
                request.prompt,
                request.unit_catalog,
                request.tool_catalog,
                &self.options,
                request.env_context,
            )
        });
        if let (Some(cache), Some(key)) = (&self.cache, &key)
            && let Some(hit) = cache.get(key, Instant::now())
        {
            debug!(action = %hit.kind(), "Decision cache hit");
            return Ok(hit);
        }

        let options = decision_options(
            &self.options,
            build_system_prompt(request.unit_catalog, request.tool_catalog),
        );
        let user_prompt = build_user_prompt(request.prompt, request.env_context);
        let completion = self
            .provider
            .complete_stream(&user_prompt, &options, on_token)
            .await?;

        let parsed = match parse_decision(&completion.text) {
            Ok(decision) => Some(stamp(decision, &completion)),
            Err(e) => {
                warn!(error = %e, "Decision did not parse, requesting repair");
                self.repair(&completion.text, &options).await
            }
        };

        match parsed {
            Some(decision) => {
                if let (Some(cache), Some(key)) = (&self.cache, &key) {
                    cache.set(key, &decision, Instant::now());
                }
                debug!(action = %decision.kind(), provider = %decision.provider, "Decision");
                Ok(decision)
            }
            None => Ok(stamp(Decision::answer(completion.text.trim()), &completion)),
        }
    }

    async fn repair(&self, raw: &str, options: &AskOptions) -> Option<Decision> {
        let completion = match self.provider.complete(&repair_prompt(raw), options).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(error = %e, "Repair request failed");
                return None;
            }
        };
        match parse_decision(&completion.text) {
            Ok(decision) => Some(stamp(decision, &completion)),
            Err(e) => {
                warn!(error = %e, "Repaired decision still invalid, answering with raw text");
                None
            }
        }
    }
}

fn stamp(mut decision: Decision, completion: &Completion) -> Decision {
    decision.provider = completion.provider.clone();
    decision.model = completion.model.clone();
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;
    use stepwise_core::decision::Action;

    fn request() -> DecisionRequest<'static> {
        DecisionRequest {
            prompt: "find my reports",
            unit_catalog: "(none)",
            tool_catalog: "- search(name): find files",
            env_context: "- Working directory: /work",
        }
    }

    async fn decide(decider: &Decider) -> (Decision, String) {
        let mut streamed = String::new();
        let decision = decider
            .decide(&request(), &mut |t: &str| streamed.push_str(t))
            .await
            .unwrap();
        (decision, streamed)
    }

    #[tokio::test]
    async fn parses_streamed_decision() {
        let reply = r#"{"action":"run_tool","tool":"search","tool_args":{"name":"report"},"reason":"look"}"#;
        let provider = ScriptedProvider::new([reply]);
        let decider = Decider::new(provider.clone(), AskOptions::new("ollama").with_model("llama3"));
        let (decision, streamed) = decide(&decider).await;

        assert_eq!(streamed, reply);
        assert_eq!(decision.kind().as_str(), "run_tool");
        assert_eq!(decision.provider, "scripted");
        assert_eq!(decision.model, "llama3");
        let prompt = provider.prompts.lock().unwrap()[0].clone();
        assert!(prompt.starts_with("Environment context:\n- Working directory: /work"));
        assert!(prompt.ends_with("User request:\nfind my reports"));
    }

    #[tokio::test]
    async fn one_repair_round_trip() {
        let provider = ScriptedProvider::new([
            "I would search for it.",
            r#"{"action":"answer","answer":"fixed"}"#,
        ]);
        let decider = Decider::new(provider.clone(), AskOptions::new("ollama"));
        let (decision, _) = decide(&decider).await;
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.answer, "fixed");
        assert_eq!(provider.calls(), 2);
        assert!(provider.prompts.lock().unwrap()[1].ends_with("Text:\nI would search for it."));
    }

    #[tokio::test]
    async fn degrades_to_plain_answer() {
        let provider = ScriptedProvider::new(["  not json  ", "still not json"]);
        let decider = Decider::new(provider.clone(), AskOptions::new("ollama"));
        let (decision, _) = decide(&decider).await;
        assert_eq!(decision.action, Action::Answer);
        assert_eq!(decision.answer, "not json");
        assert_eq!(decision.provider, "scripted");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cache_skips_second_call() {
        let provider = ScriptedProvider::new([r#"{"action":"answer","answer":"hi"}"#]);
        let cache = Arc::new(DecisionCache::new());
        let decider = Decider::new(provider.clone(), AskOptions::new("ollama")).with_cache(cache.clone());

        let (first, _) = decide(&decider).await;
        let (second, streamed) = decide(&decider).await;
        assert_eq!(first, second);
        assert!(streamed.is_empty());
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn degraded_answers_are_not_cached() {
        let provider = ScriptedProvider::new(["nope", "nope", r#"{"action":"answer","answer":"ok"}"#]);
        let cache = Arc::new(DecisionCache::new());
        let decider = Decider::new(provider.clone(), AskOptions::new("ollama")).with_cache(cache.clone());
        decide(&decider).await;
        assert!(cache.is_empty());
        let (decision, _) = decide(&decider).await;
        assert_eq!(decision.answer, "ok");
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let provider = ScriptedProvider::new(Vec::<String>::new());
        let decider = Decider::new(provider, AskOptions::new("ollama"));
        let err = decider
            .decide(&request(), &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyResponse(_)));
    }
}
