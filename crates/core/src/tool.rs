//! Tool trait: built-in, in-process capabilities.
//!
//! Tools are distinct from external units: they are compiled into the
//! binary, take a flat string argument map, and classify their own risk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::decision::ArgMap;
use crate::error::ToolError;
use crate::risk::{Assessment, RiskLevel};

/// The result of a tool run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: i32,

    /// Combined output text.
    pub output: String,

    /// More results are available.
    #[serde(default)]
    pub can_continue: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub continue_prompt: String,

    /// Arguments to re-invoke the tool with for the next page.
    #[serde(default, skip_serializing_if = "ArgMap::is_empty")]
    pub continue_params: ArgMap,
}

impl RunResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search").
    fn name(&self) -> &str;

    /// One-line description shown in the planner catalog.
    fn description(&self) -> &str;

    /// Accepted argument keys, in catalog order.
    fn arg_keys(&self) -> &[&str];

    /// Classifies the risk of running with `args`.
    fn risk(&self, _args: &ArgMap) -> Assessment {
        Assessment::new(RiskLevel::Low, "read-only built-in tool")
    }

    /// Execute the tool.
    async fn execute(&self, base_dir: &Path, args: &ArgMap) -> Result<RunResult, ToolError>;
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Render the tool catalog for the planner prompt
/// 2. Classify and execute tools chosen by the model
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_ascii_lowercase();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .get(&name.trim().to_ascii_lowercase())
            .map(|t| t.as_ref())
    }

    pub fn is_known_tool(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Risk for running `name`; unknown tools are medium risk.
    pub fn tool_risk(&self, name: &str, args: &ArgMap) -> Assessment {
        match self.get(name) {
            Some(tool) => tool.risk(args),
            None => Assessment::new(RiskLevel::Medium, "unknown tool"),
        }
    }

    /// Catalog text, one line per tool, sorted by name.
    pub fn catalog(&self) -> String {
        let mut names = self.names();
        names.sort_unstable();
        names
            .into_iter()
            .filter_map(|n| self.get(n))
            .map(|t| format!("- {}({}): {}", t.name(), t.arg_keys().join(", "), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Execute a tool by name. Failures become a non-zero `RunResult`.
    pub async fn run_by_name(&self, base_dir: &Path, name: &str, args: &ArgMap) -> RunResult {
        let Some(tool) = self.get(name) else {
            return RunResult::failed(1, ToolError::NotFound(name.to_string()).to_string());
        };
        match tool.execute(base_dir, args).await {
            Ok(result) => result,
            Err(e) => RunResult::failed(1, e.to_string()),
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
