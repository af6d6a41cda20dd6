//! Planner context: everything the model sees besides the catalogs.
//!
//! The planner prompt stacks the original request, earlier prompts of the
//! session, results carried over from earlier turns and the steps already
//! taken in this turn. When the stack outgrows the token budget, the
//! oldest material goes first; the request itself is never cut.

pub mod token;

use std::path::{Path, PathBuf};

use crate::error::ContextError;
use crate::history::ActionRecord;

pub use token::{DEFAULT_TOKEN_BUDGET, estimate_tokens, fits};

/// Largest file that may be attached to the environment context.
pub const FILE_CONTEXT_MAX_BYTES: u64 = 32 * 1024;

const CLOSING_INSTRUCTION: &str =
    "Decide the next best step. If the task is complete, return action=answer with the final response.";

/// Environment block for the planner's user message.
pub fn env_context(working_dir: &Path) -> String {
    format!("- Working directory: {}", working_dir.display())
}

/// Reads `paths` into an attachment block for the environment context.
pub fn attach_files(paths: &[PathBuf]) -> Result<String, ContextError> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let meta = std::fs::metadata(path).map_err(|e| ContextError::Unreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if meta.is_dir() {
            return Err(ContextError::IsDirectory(path.clone()));
        }
        if meta.len() > FILE_CONTEXT_MAX_BYTES {
            return Err(ContextError::TooLarge {
                path: path.clone(),
                size: meta.len(),
                max: FILE_CONTEXT_MAX_BYTES,
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ContextError::Unreadable {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        parts.push(format!("--- file: {} ---\n{content}\n--- end ---", path.display()));
    }
    Ok(format!("Attached file context:\n{}", parts.join("\n")))
}

/// The prompt for one planning step.
#[derive(Debug, Clone)]
pub struct PlannerPrompt {
    request: String,
    previous: Vec<(usize, String)>,
    session: Vec<String>,
    steps: Vec<String>,
    bare: bool,
}

impl PlannerPrompt {
    pub fn new(
        request: &str,
        turn: &[ActionRecord],
        previous_prompts: &[String],
        session_records: &[ActionRecord],
    ) -> Self {
        let previous: Vec<(usize, String)> = previous_prompts
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.trim().is_empty())
            .map(|(i, p)| (i + 1, p.trim().to_string()))
            .collect();
        Self {
            request: request.trim().to_string(),
            bare: turn.is_empty() && previous.is_empty() && session_records.is_empty(),
            previous,
            session: session_records.iter().map(|r| format!("- {}", r.describe())).collect(),
            steps: turn
                .iter()
                .map(|r| format!("- step {}: {}", r.step, r.describe()))
                .collect(),
        }
    }

    /// Drops the oldest session results, then the oldest previous prompts,
    /// then the oldest steps of this turn (the latest step always stays)
    /// until the prompt fits `budget`.
    pub fn fit(mut self, budget: usize) -> Self {
        while !fits(&self.render(), budget) {
            if !self.session.is_empty() {
                self.session.remove(0);
            } else if !self.previous.is_empty() {
                self.previous.remove(0);
            } else if self.steps.len() > 1 {
                self.steps.remove(0);
            } else {
                break;
            }
        }
        self
    }

    pub fn render(&self) -> String {
        if self.bare {
            return self.request.clone();
        }
        let mut lines = vec!["Original user request:".to_string(), self.request.clone()];
        if !self.previous.is_empty() {
            lines.push(String::new());
            lines.push("Previous prompts in this interactive session:".into());
            lines.extend(self.previous.iter().map(|(n, p)| format!("- prev {n}: {p}")));
        }
        if !self.session.is_empty() {
            lines.push(String::new());
            lines.push("Results from previous turns (context):".into());
            lines.extend(self.session.iter().cloned());
        }
        if !self.steps.is_empty() {
            lines.push(String::new());
            lines.push("Actions already executed in THIS turn:".into());
            lines.extend(self.steps.iter().cloned());
        }
        lines.push(String::new());
        lines.push(CLOSING_INSTRUCTION.into());
        lines.join("\n")
    }
}

/// Builds the planner prompt for one step, trimmed to `budget`.
pub fn build_planner_prompt(
    request: &str,
    turn: &[ActionRecord],
    previous_prompts: &[String],
    session_records: &[ActionRecord],
    budget: usize,
) -> String {
    PlannerPrompt::new(request, turn, previous_prompts, session_records)
        .fit(budget)
        .render()
}
