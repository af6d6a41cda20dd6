//! Risk classification of planned actions.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use stepwise_core::catalog::CatalogProvider;
use stepwise_core::decision::{Action, Decision};
use stepwise_core::risk::{Assessment, RiskLevel};
use stepwise_core::tool::ToolRegistry;

const DESTRUCTIVE_NAME_HINTS: [&str; 4] = ["reset", "delete", "drop", "rm"];

// Negated forms are checked before the plain words they contain.
static NEGATED_SAFE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(unsafe|non-?safe|not\s+(safe|read-?only|low))\b").expect("negated safety pattern is valid")
});
static NEGATED_HIGH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(non-?destructive|not\s+(destructive|dangerous))\b").expect("negated danger pattern is valid")
});
static HIGH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(destructive|high|dangerous)\b").expect("high safety pattern is valid"));
static LOW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(read-?only|safe|low)\b").expect("low safety pattern is valid"));

/// Classifies what running `decision` would risk.
pub fn assess_risk(
    decision: &Decision,
    catalog: &dyn CatalogProvider,
    tools: &ToolRegistry,
    base_dir: &Path,
) -> Assessment {
    match &decision.action {
        Action::Answer => Assessment::new(RiskLevel::Low, "response only"),
        Action::RunTool { name, args } => tools.tool_risk(name, args),
        Action::ProposeUnit { .. } => Assessment::new(RiskLevel::High, "writes new unit code"),
        Action::RunUnit { name, .. } => unit_risk(name, catalog, base_dir),
    }
}

fn unit_risk(name: &str, catalog: &dyn CatalogProvider, base_dir: &Path) -> Assessment {
    let lower = name.to_ascii_lowercase();
    if DESTRUCTIVE_NAME_HINTS.iter().any(|hint| lower.contains(hint)) {
        return Assessment::new(RiskLevel::High, "unit may perform destructive operations");
    }

    let safety = catalog
        .get_info(base_dir, name)
        .ok()
        .and_then(|info| info.safety)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match safety {
        Some(text) => Assessment::new(safety_level(&text), text),
        None => Assessment::new(RiskLevel::Medium, "external unit execution"),
    }
}

/// Maps a unit's `# Safety:` header to a level.
fn safety_level(text: &str) -> RiskLevel {
    if NEGATED_SAFE_RE.is_match(text) {
        RiskLevel::High
    } else if NEGATED_HIGH_RE.is_match(text) {
        RiskLevel::Low
    } else if HIGH_RE.is_match(text) {
        RiskLevel::High
    } else if LOW_RE.is_match(text) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}
