//! Decision: the structured output of one planning call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Loosely typed argument map as it arrives from the model. Kept ordered so
/// formatting and signatures are canonical.
pub type ArgMap = BTreeMap<String, String>;

/// The action a decision asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Reply directly; terminates the turn.
    Answer,

    /// Run an external automation unit.
    RunUnit {
        name: String,
        #[serde(default)]
        params: ArgMap,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Run a built-in tool.
    RunTool {
        name: String,
        #[serde(default)]
        args: ArgMap,
    },

    /// Ask for a new unit to be authored.
    ProposeUnit { description: String },
}

/// Action discriminant, used in history records and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Answer,
    RunUnit,
    RunTool,
    ProposeUnit,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::RunUnit => "run_unit",
            Self::RunTool => "run_tool",
            Self::ProposeUnit => "propose_unit",
        }
    }

    /// Parses a wire action name. Unknown or empty names become `Answer`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "run_unit" | "run_plugin" => Self::RunUnit,
            "run_tool" => Self::RunTool,
            "propose_unit" | "create_function" => Self::ProposeUnit,
            _ => Self::Answer,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Answer => ActionKind::Answer,
            Self::RunUnit { .. } => ActionKind::RunUnit,
            Self::RunTool { .. } => ActionKind::RunTool,
            Self::ProposeUnit { .. } => ActionKind::ProposeUnit,
        }
    }

    /// The unit or tool name, or the description for proposals.
    pub fn target(&self) -> &str {
        match self {
            Self::Answer => "",
            Self::RunUnit { name, .. } | Self::RunTool { name, .. } => name,
            Self::ProposeUnit { description } => description,
        }
    }
}

/// One planning result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,

    /// Free-text answer. Final for `Answer`, a progress note otherwise.
    #[serde(default)]
    pub answer: String,

    #[serde(default)]
    pub reason: String,

    /// Backend that produced the decision.
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub model: String,
}

impl Decision {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            action: Action::Answer,
            answer: text.into(),
            reason: String::new(),
            provider: String::new(),
            model: String::new(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_actions_become_answer() {
        assert_eq!(ActionKind::parse("RUN_TOOL "), ActionKind::RunTool);
        assert_eq!(ActionKind::parse("run_plugin"), ActionKind::RunUnit);
        assert_eq!(ActionKind::parse("create_function"), ActionKind::ProposeUnit);
        assert_eq!(ActionKind::parse("dance"), ActionKind::Answer);
        assert_eq!(ActionKind::parse(""), ActionKind::Answer);
    }

    #[test]
    fn target_per_action() {
        let unit = Action::RunUnit {
            name: "Get-Disk".into(),
            params: ArgMap::new(),
            args: vec![],
        };
        assert_eq!(unit.target(), "Get-Disk");
        assert_eq!(unit.kind(), ActionKind::RunUnit);
        assert_eq!(Action::Answer.target(), "");
    }
}
