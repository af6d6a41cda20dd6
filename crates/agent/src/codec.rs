//! Decision codec: planner prompts in, structured decisions out.
//!
//! Models are asked for a single JSON object, but replies still arrive
//! wrapped in prose or code fences. Parsing therefore looks for the first
//! balanced object, reads it leniently (unknown keys, legacy key names,
//! non-string scalars) and sanitizes the argument maps before anything
//! downstream sees them.

use serde::Deserialize;
use serde_json::{Map, Value};
use stepwise_core::decision::{Action, ActionKind, ArgMap, Decision};
use stepwise_core::provider::AskOptions;

use crate::error::ParseError;

pub const DECISION_TEMPERATURE: f32 = 0.2;
pub const DECISION_MAX_TOKENS: u32 = 1024;

const SCHEMA_ANSWER: &str = r#"{"action":"answer","answer":"text"}"#;
const SCHEMA_RUN_UNIT: &str = r#"{"action":"run_unit","unit":"name","unit_args":{"ParamName":"value","SwitchParam":"true"},"reason":"why","answer":"optional text"}"#;
const SCHEMA_RUN_TOOL: &str = r#"{"action":"run_tool","tool":"name","tool_args":{"key":"value"},"reason":"why","answer":"optional text"}"#;
const SCHEMA_PROPOSE_UNIT: &str = r#"{"action":"propose_unit","description":"what the new unit should do, its inputs and outputs","reason":"why no existing unit fits"}"#;

fn or_none(catalog: &str) -> &str {
    if catalog.trim().is_empty() { "(none)" } else { catalog }
}

/// System prompt for a planning call. Both catalogs are embedded verbatim.
pub fn build_system_prompt(unit_catalog: &str, tool_catalog: &str) -> String {
    [
        "You are an execution planner for a command-line assistant.",
        "You can answer directly, run a unit (a PowerShell function), run a built-in tool, or propose a new unit.",
        "",
        "Available units (PowerShell functions), grouped by toolkit:",
        or_none(unit_catalog),
        "",
        "Available tools:",
        or_none(tool_catalog),
        "",
        "Return ONLY valid JSON. Use one of these schemas:",
        SCHEMA_ANSWER,
        SCHEMA_RUN_UNIT,
        SCHEMA_RUN_TOOL,
        SCHEMA_PROPOSE_UNIT,
        "",
        "Catalog notation: Name* = required, Flag? = switch, Param=val = default value, Param=a|b|c = allowed values.",
        "",
        "Unit argument rules:",
        "- Put named parameters in unit_args (an object), not in the args array.",
        "- Keys are parameter names without the leading dash (\"Host\", not \"-Host\").",
        "- For switch parameters (marked ? in the catalog) use the value \"true\".",
        "- Always include every required parameter (marked * in the catalog) of the chosen unit.",
        "- Map values from the user request onto the parameter names in the catalog.",
        "  Example: 'find mario in the user table' with params Table*, Value*, Limit=20",
        "  => unit_args: {\"Table\":\"user\",\"Value\":\"mario\"}",
        "- If a required parameter cannot be inferred from the request, return action=answer and ask for it.",
        "- If an earlier step failed with 'requires mandatory parameters', the next attempt must include them.",
        "",
        "Decision process (in order):",
        "1. Identify the intent: what does the user want to accomplish?",
        "2. Find the toolkit group [Name] in the catalog that covers that domain.",
        "3. Pick the unit whose name and synopsis best match the intent.",
        "4. Check the required params (*): if any cannot be inferred from the request, answer and ask.",
        "5. Map the user's values onto parameter names; rely on defaults for optional params left unspecified.",
        "6. If no unit or tool fits, answer knowledge questions directly or use propose_unit for new automation.",
        "7. Explain the choice in the \"reason\" field.",
        "",
        "General rules:",
        "- action must be answer, run_unit, run_tool or propose_unit.",
        "- Never invent unit or tool names; use only the catalogs above.",
        "- Use propose_unit only when the task needs automation no existing unit or tool provides, never for knowledge questions.",
        "- If a unit is destructive or needs confirmation, say so in the answer.",
        "- Tool arguments are listed in parentheses after each tool name; use exactly those keys in tool_args.",
    ]
    .join("\n")
}

/// User message for a planning call.
pub fn build_user_prompt(prompt: &str, env_context: &str) -> String {
    let mut parts = Vec::new();
    if !env_context.trim().is_empty() {
        parts.extend(["Environment context:", env_context, ""]);
    }
    parts.extend(["User request:", prompt.trim()]);
    parts.join("\n")
}

/// Prompt for the single repair round-trip after a parse failure.
pub fn repair_prompt(raw: &str) -> String {
    [
        "Convert the following text to valid JSON only.",
        "Do not add markdown fences.",
        "Use exactly one of these schemas:",
        SCHEMA_ANSWER,
        SCHEMA_RUN_UNIT,
        SCHEMA_RUN_TOOL,
        SCHEMA_PROPOSE_UNIT,
        "",
        "Text:",
        raw.trim(),
    ]
    .join("\n")
}

/// Options for a planning call, derived from the session options.
pub fn decision_options(base: &AskOptions, system_prompt: String) -> AskOptions {
    base.clone()
        .with_temperature(DECISION_TEMPERATURE)
        .with_max_tokens(DECISION_MAX_TOKENS)
        .with_json_mode(true)
        .with_system_prompt(system_prompt)
}

/// Returns the first balanced `{...}` span of `text`.
///
/// Braces inside string literals are ignored, including escaped quotes.
pub fn find_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireDecision {
    action: Value,
    answer: Value,
    reason: Value,
    unit: Value,
    plugin: Value,
    unit_args: Option<Map<String, Value>>,
    plugin_args: Option<Map<String, Value>>,
    args: Value,
    tool: Value,
    tool_args: Option<Map<String, Value>>,
    description: Value,
    function_description: Value,
}

/// Reads a scalar as trimmed text; `null` and containers read as empty.
fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

fn first_text(values: [&Value; 2]) -> String {
    values
        .into_iter()
        .map(text)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Drops empty keys and empty, `null` or `<nil>` values; trims the rest.
pub fn sanitize_args(map: Map<String, Value>) -> ArgMap {
    map.into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim().to_string();
            let value = match value {
                Value::Null => return None,
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            let lower = value.to_ascii_lowercase();
            if key.is_empty() || value.is_empty() || lower == "null" || lower == "<nil>" {
                return None;
            }
            Some((key, value))
        })
        .collect()
}

fn positional(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s.split_whitespace().map(String::from).collect(),
        _ => Vec::new(),
    }
}

/// Parses model output into a decision.
///
/// Unknown or missing actions become `answer`. Provider and model are left
/// empty for the caller to stamp.
pub fn parse_decision(raw: &str) -> Result<Decision, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    let wire: WireDecision = if trimmed.starts_with('{') {
        match serde_json::from_str(trimmed) {
            Ok(wire) => wire,
            // Object followed by prose.
            Err(err) => match find_first_json_object(trimmed) {
                Some(payload) => serde_json::from_str(payload)?,
                None => return Err(err.into()),
            },
        }
    } else {
        serde_json::from_str(find_first_json_object(trimmed).ok_or(ParseError::NoObject)?)?
    };

    let action = match ActionKind::parse(&text(&wire.action)) {
        ActionKind::Answer => Action::Answer,
        ActionKind::RunUnit => Action::RunUnit {
            name: first_text([&wire.unit, &wire.plugin]),
            params: wire
                .unit_args
                .or(wire.plugin_args)
                .map(sanitize_args)
                .unwrap_or_default(),
            args: positional(&wire.args),
        },
        ActionKind::RunTool => Action::RunTool {
            name: text(&wire.tool),
            args: wire.tool_args.map(sanitize_args).unwrap_or_default(),
        },
        ActionKind::ProposeUnit => Action::ProposeUnit {
            description: first_text([&wire.description, &wire.function_description]),
        },
    };

    Ok(Decision {
        action,
        answer: text(&wire.answer),
        reason: text(&wire.reason),
        provider: String::new(),
        model: String::new(),
    })
}
