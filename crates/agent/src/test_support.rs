//! Scripted collaborators for loop and planner tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stepwise_core::error::ProviderError;
use stepwise_core::provider::{AskOptions, Completion, Provider, TokenSink};
use stepwise_core::risk::RiskLevel;

use crate::confirm::Confirmer;
use crate::output::{OutputWriter, StepInfo, StepReport};

/// Replies with queued texts in order, streaming each in small chunks.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn next(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::EmptyResponse("scripted".into()))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-1"
    }

    async fn complete(&self, prompt: &str, options: &AskOptions) -> Result<Completion, ProviderError> {
        let text = self.next(prompt)?;
        Ok(Completion {
            text,
            provider: self.name().into(),
            model: options.model_or(self.default_model()).into(),
        })
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &AskOptions,
        on_token: &mut TokenSink<'_>,
    ) -> Result<Completion, ProviderError> {
        let text = self.next(prompt)?;
        let chars: Vec<char> = text.chars().collect();
        for chunk in chars.chunks(5) {
            on_token(&chunk.iter().collect::<String>());
        }
        Ok(Completion {
            text,
            provider: self.name().into(),
            model: options.model_or(self.default_model()).into(),
        })
    }
}

/// Records every writer call as a short event string.
#[derive(Default)]
pub struct RecordingWriter {
    pub events: Vec<String>,
    pub streamed: String,
    pub steps: Vec<StepReport>,
}

impl RecordingWriter {
    pub fn has(&self, prefix: &str) -> bool {
        self.events.iter().any(|e| e.starts_with(prefix))
    }
}

impl OutputWriter for RecordingWriter {
    fn provider_info(&mut self, provider: &str, model: &str) {
        self.events.push(format!("provider:{provider}/{model}"));
    }

    fn step_info(&mut self, info: &StepInfo<'_>) {
        self.events.push(format!("step:{}:{}:{}", info.step, info.summary, info.risk.level));
    }

    fn answer_delta(&mut self, text: &str) {
        self.streamed.push_str(text);
    }

    fn action_output(&mut self, text: &str) {
        self.events.push(format!("output:{text}"));
    }

    fn action_error(&mut self, message: &str) {
        self.events.push(format!("action_error:{message}"));
    }

    fn answer(&mut self, text: &str) {
        self.events.push(format!("answer:{text}"));
    }

    fn partial_answer(&mut self, text: &str) {
        self.events.push(format!("partial:{text}"));
    }

    fn error(&mut self, message: &str, answer: &str) {
        self.events.push(format!("error:{message}|{answer}"));
    }

    fn canceled(&mut self, answer: &str) {
        self.events.push(format!("canceled:{answer}"));
    }

    fn loop_detected(&mut self, answer: &str) {
        self.events.push(format!("loop:{answer}"));
    }

    fn max_steps_reached(&mut self, answer: &str) {
        self.events.push(format!("max_steps:{answer}"));
    }

    fn add_step(&mut self, step: StepReport) {
        self.steps.push(step);
    }

    fn finalize(&mut self) {
        self.events.push("finalize".into());
    }
}

/// Answers confirmations from fixed lists; runs out to "yes".
#[derive(Default)]
pub struct ScriptedConfirmer {
    pub actions: VecDeque<bool>,
    pub more: VecDeque<bool>,
    pub asked: Vec<String>,
}

impl ScriptedConfirmer {
    pub fn new(actions: &[bool], more: &[bool]) -> Self {
        Self {
            actions: actions.iter().copied().collect(),
            more: more.iter().copied().collect(),
            asked: Vec::new(),
        }
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm_action(&mut self, risk: RiskLevel) -> bool {
        self.asked.push(format!("action:{risk}"));
        self.actions.pop_front().unwrap_or(true)
    }

    fn confirm_more(&mut self, prompt: &str) -> bool {
        self.asked.push(format!("more:{prompt}"));
        self.more.pop_front().unwrap_or(true)
    }
}
