//! Output writers: how a turn is presented.
//!
//! The loop reports through `OutputWriter` and never prints directly.
//! `TtyWriter` renders plain text as things happen; `JsonWriter` collects
//! the turn into one document emitted at `finalize`.

use std::io::{self, IsTerminal, Stdout, Write};

use serde::Serialize;
use stepwise_core::decision::ActionKind;
use stepwise_core::risk::{Assessment, RiskLevel};
use tracing::debug;

use crate::spinner::Spinner;

pub const MAX_STEPS_MESSAGE: &str = "Reached max agent steps; stopping.";
pub const LOOP_MESSAGE: &str = "Agent repeated the same action; stopped to avoid loop.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Canceled,
    Error,
    Ok,
}

/// One dispatched step, as reported in JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub action: ActionKind,
    pub target: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub args: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub risk: RiskLevel,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub risk_reason: String,
    pub status: StepStatus,
}

/// What is about to run, shown before confirmation.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo<'a> {
    pub step: usize,
    pub max_steps: usize,
    pub summary: &'a str,
    pub reason: &'a str,
    pub risk: &'a Assessment,
}

pub trait OutputWriter: Send {
    fn provider_info(&mut self, provider: &str, model: &str);
    fn step_info(&mut self, info: &StepInfo<'_>);

    /// A planning call started.
    fn begin_thinking(&mut self) {}
    fn end_thinking(&mut self) {}

    /// Answer text decoded while the decision is still streaming.
    fn answer_delta(&mut self, _text: &str) {}

    /// Output of a tool run.
    fn action_output(&mut self, _text: &str) {}

    /// Short description of a failed unit or tool run.
    fn action_error(&mut self, _message: &str) {}

    fn answer(&mut self, text: &str);
    fn partial_answer(&mut self, text: &str);
    fn error(&mut self, message: &str, answer: &str);
    fn canceled(&mut self, answer: &str);
    fn loop_detected(&mut self, answer: &str);
    fn max_steps_reached(&mut self, answer: &str);
    fn add_step(&mut self, step: StepReport);
    fn finalize(&mut self);
}

/// Plain-text writer for interactive use.
pub struct TtyWriter<W: Write + Send> {
    out: W,
    spinner: Spinner,
    animate: bool,
    streaming: bool,
    streamed: String,
}

impl TtyWriter<Stdout> {
    /// Writes to stdout, animating a spinner when stderr is a terminal.
    pub fn stdout() -> Self {
        let mut writer = Self::new(io::stdout());
        writer.animate = io::stderr().is_terminal();
        writer
    }
}

impl<W: Write + Send> TtyWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            spinner: Spinner::idle(),
            animate: false,
            streaming: false,
            streamed: String::new(),
        }
    }

    pub fn into_inner(mut self) -> W {
        self.spinner.stop();
        self.out
    }

    fn already_streamed(&self, text: &str) -> bool {
        !self.streamed.trim().is_empty() && self.streamed.trim() == text.trim()
    }

    fn block(&mut self, text: &str) {
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "{text}");
    }

    /// Prints `answer` below a status line unless it was already streamed.
    fn trailing_answer(&mut self, answer: &str) {
        if !answer.trim().is_empty() && !self.already_streamed(answer) {
            let _ = writeln!(self.out, "{answer}");
        }
    }
}

impl<W: Write + Send> OutputWriter for TtyWriter<W> {
    fn provider_info(&mut self, provider: &str, model: &str) {
        debug!(provider, model, "Decision provider");
    }

    fn step_info(&mut self, info: &StepInfo<'_>) {
        debug!(
            step = info.step,
            max_steps = info.max_steps,
            reason = info.reason,
            risk = %info.risk.level,
            risk_reason = %info.risk.reason,
            "Agent step"
        );
        let _ = writeln!(self.out);
        let _ = writeln!(self.out, "  > {}", info.summary);
        if info.risk.level != RiskLevel::Low {
            let _ = writeln!(
                self.out,
                "  Risk: {} ({})",
                info.risk.level.as_str().to_ascii_uppercase(),
                info.risk.reason
            );
        }
    }

    fn begin_thinking(&mut self) {
        self.streaming = false;
        self.streamed.clear();
        if self.animate {
            self.spinner = Spinner::start("Thinking...");
        }
    }

    fn end_thinking(&mut self) {
        self.spinner.stop();
        if self.streaming {
            let _ = writeln!(self.out);
            self.streaming = false;
        }
        let _ = self.out.flush();
    }

    fn answer_delta(&mut self, text: &str) {
        if !self.streaming {
            self.spinner.stop();
            let _ = writeln!(self.out);
            self.streaming = true;
        }
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
        self.streamed.push_str(text);
    }

    fn action_output(&mut self, text: &str) {
        let text = text.trim_end();
        if !text.is_empty() {
            let _ = writeln!(self.out, "{text}");
        }
    }

    fn action_error(&mut self, message: &str) {
        eprintln!("  Error: {message}");
    }

    fn answer(&mut self, text: &str) {
        if !self.already_streamed(text) {
            self.block(text);
        }
    }

    fn partial_answer(&mut self, text: &str) {
        if !text.trim().is_empty() && !self.already_streamed(text) {
            self.block(text);
        }
    }

    fn error(&mut self, message: &str, answer: &str) {
        self.block(&format!("Error: {message}"));
        self.trailing_answer(answer);
    }

    fn canceled(&mut self, answer: &str) {
        self.block("Canceled.");
        self.trailing_answer(answer);
    }

    fn loop_detected(&mut self, answer: &str) {
        self.block("Stopped to avoid repeated action.");
        self.trailing_answer(answer);
    }

    fn max_steps_reached(&mut self, _answer: &str) {
        self.block("Reached max steps.");
    }

    fn add_step(&mut self, _step: StepReport) {}

    fn finalize(&mut self) {
        self.spinner.stop();
        let _ = self.out.flush();
    }
}

/// The document a JSON-mode turn produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JsonOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub answer: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Machine-readable writer. Emits exactly one document per turn.
pub struct JsonWriter<W: Write + Send> {
    out: W,
    result: JsonOutput,
    emitted: bool,
}

impl JsonWriter<Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> JsonWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            result: JsonOutput {
                action: "answer".into(),
                ..JsonOutput::default()
            },
            emitted: false,
        }
    }

    pub fn result(&self) -> &JsonOutput {
        &self.result
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> OutputWriter for JsonWriter<W> {
    fn provider_info(&mut self, provider: &str, model: &str) {
        self.result.provider = provider.to_string();
        self.result.model = model.to_string();
    }

    fn step_info(&mut self, _info: &StepInfo<'_>) {}

    fn answer(&mut self, text: &str) {
        self.result.action = "answer".into();
        self.result.answer = text.to_string();
    }

    fn partial_answer(&mut self, text: &str) {
        if !text.trim().is_empty() {
            self.result.answer = text.to_string();
        }
    }

    fn error(&mut self, message: &str, answer: &str) {
        self.result.action = "error".into();
        self.result.error = message.to_string();
        self.result.answer = answer.trim().to_string();
    }

    fn canceled(&mut self, answer: &str) {
        self.result.action = "answer".into();
        self.result.answer = answer.trim().to_string();
    }

    fn loop_detected(&mut self, answer: &str) {
        self.result.action = "answer".into();
        self.result.answer = match answer.trim() {
            "" => LOOP_MESSAGE.to_string(),
            text => text.to_string(),
        };
    }

    fn max_steps_reached(&mut self, answer: &str) {
        self.result.action = "answer".into();
        if !answer.trim().is_empty() {
            self.result.answer = answer.to_string();
        }
        if self.result.answer.trim().is_empty() {
            self.result.answer = MAX_STEPS_MESSAGE.to_string();
        }
    }

    fn add_step(&mut self, step: StepReport) {
        self.result.steps.push(step);
    }

    fn finalize(&mut self) {
        if self.emitted {
            return;
        }
        self.emitted = true;
        if let Err(e) = serde_json::to_writer_pretty(&mut self.out, &self.result) {
            tracing::error!(error = %e, "Failed to write JSON output");
            return;
        }
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(status: StepStatus) -> StepReport {
        StepReport {
            step: 1,
            action: ActionKind::RunTool,
            target: "search".into(),
            args: "name=x".into(),
            reason: "look".into(),
            risk: RiskLevel::Low,
            risk_reason: "read-only built-in tool".into(),
            status,
        }
    }

    fn tty_text(writer: TtyWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn tty_renders_steps_and_answers() {
        let mut writer = TtyWriter::new(Vec::new());
        let risk = Assessment::new(RiskLevel::High, "deletes empty folders");
        writer.step_info(&StepInfo {
            step: 1,
            max_steps: 4,
            summary: "Running tool clean (apply=true)",
            reason: "tidy",
            risk: &risk,
        });
        writer.action_output("  1) a\n");
        writer.partial_answer("Cleaning up.");
        writer.max_steps_reached("");
        let text = tty_text(writer);
        assert_eq!(
            text,
            "\n  > Running tool clean (apply=true)\n  Risk: HIGH (deletes empty folders)\n  1) a\n\nCleaning up.\n\nReached max steps.\n"
        );
    }

    #[test]
    fn streamed_answer_is_not_printed_twice() {
        let mut writer = TtyWriter::new(Vec::new());
        writer.begin_thinking();
        writer.answer_delta("Hel");
        writer.answer_delta("lo");
        writer.end_thinking();
        writer.answer("Hello");
        assert_eq!(tty_text(writer), "\nHello\n");

        let mut writer = TtyWriter::new(Vec::new());
        writer.begin_thinking();
        writer.answer_delta("partial");
        writer.end_thinking();
        writer.answer("something else entirely");
        assert_eq!(tty_text(writer), "\npartial\n\nsomething else entirely\n");
    }

    #[test]
    fn tty_status_lines() {
        let mut writer = TtyWriter::new(Vec::new());
        writer.canceled("Nothing was deleted.");
        writer.loop_detected("");
        writer.error("boom", "");
        assert_eq!(
            tty_text(writer),
            "\nCanceled.\nNothing was deleted.\n\nStopped to avoid repeated action.\n\nError: boom\n"
        );
    }

    #[test]
    fn json_emits_once_with_steps() {
        let mut writer = JsonWriter::new(Vec::new());
        writer.provider_info("ollama", "llama3");
        writer.answer_delta("ignored");
        writer.add_step(step(StepStatus::Ok));
        writer.partial_answer("Found one file.");
        writer.max_steps_reached("");
        writer.finalize();
        writer.finalize();

        let text = String::from_utf8(writer.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["provider"], "ollama");
        assert_eq!(value["action"], "answer");
        assert_eq!(value["answer"], "Found one file.");
        assert_eq!(value["steps"][0]["action"], "run_tool");
        assert_eq!(value["steps"][0]["status"], "ok");
        assert_eq!(value["steps"][0]["risk"], "low");
        assert!(value.get("error").is_none());
        assert_eq!(text.matches("\"provider\"").count(), 1);
    }

    #[test]
    fn json_fallback_messages() {
        let mut writer = JsonWriter::new(Vec::new());
        writer.max_steps_reached("  ");
        assert_eq!(writer.result().answer, MAX_STEPS_MESSAGE);

        let mut writer = JsonWriter::new(Vec::new());
        writer.loop_detected("");
        assert_eq!(writer.result().answer, LOOP_MESSAGE);

        let mut writer = JsonWriter::new(Vec::new());
        writer.error("tool execution failed: clean", " partial ");
        assert_eq!(writer.result().action, "error");
        assert_eq!(writer.result().error, "tool execution failed: clean");
        assert_eq!(writer.result().answer, "partial");
    }
}
