//! Typed unit invocations.
//!
//! The planner hands over a loose string map plus a token list. Before any
//! script is generated those are coerced against the unit's declared
//! parameters, so casing, switches and mandatory checks are settled here.

use std::collections::BTreeMap;

use stepwise_core::catalog::UnitInfo;
use stepwise_core::decision::ArgMap;
use stepwise_core::error::ExecError;

/// One named argument after coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    /// Passed as `-Name` with no value.
    Switch,
    Value(String),
}

/// Arguments ready to be splatted into a unit call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub named: BTreeMap<String, ArgValue>,
    pub positional: Vec<String>,
}

impl Invocation {
    /// Coerces planner arguments against `info`.
    ///
    /// Named entries win over flags found in `tokens` with the same name.
    /// Fails with `MissingParameters` when a mandatory parameter is absent
    /// after both sources are merged.
    pub fn for_unit(info: &UnitInfo, named: &ArgMap, tokens: &[String]) -> Result<Self, ExecError> {
        let mut invocation = split_splat_args(tokens);

        // Flags from the token list also get the declared casing.
        let split: Vec<(String, ArgValue)> = std::mem::take(&mut invocation.named).into_iter().collect();
        for (name, value) in split {
            let canonical = info.param(&name).map_or(name, |p| p.name.clone());
            invocation.insert(canonical, value);
        }

        for (key, raw) in named {
            let key = key.trim().trim_start_matches('-');
            if key.is_empty() {
                continue;
            }
            let value = raw.trim();
            let declared = info.param(key);
            let canonical = declared.map_or_else(|| key.to_string(), |p| p.name.clone());
            let coerced = match declared {
                Some(p) if p.switch => is_truthy(value).then_some(ArgValue::Switch),
                Some(_) if value.is_empty() => None,
                Some(_) => Some(ArgValue::Value(value.to_string())),
                None => loose_value(value),
            };
            match coerced {
                Some(v) => invocation.insert(canonical, v),
                None => invocation.remove(&canonical),
            }
        }

        let missing = info.missing_mandatory(invocation.named.keys().map(String::as_str));
        if !missing.is_empty() {
            return Err(ExecError::MissingParameters {
                unit: info.name.clone(),
                missing,
            });
        }
        Ok(invocation)
    }

    /// Argument vector for a standalone script: `-Name value` pairs and
    /// bare `-Switch` flags in name order, then positional tokens. Each entry
    /// is one argv element; nothing is re-parsed by a shell.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.named.len() * 2 + self.positional.len());
        for (name, value) in &self.named {
            argv.push(format!("-{name}"));
            if let ArgValue::Value(v) = value {
                argv.push(v.clone());
            }
        }
        argv.extend(self.positional.iter().cloned());
        argv
    }

    fn insert(&mut self, name: String, value: ArgValue) {
        self.remove(&name);
        self.named.insert(name, value);
    }

    fn remove(&mut self, name: &str) {
        self.named.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }
}

/// Splits a splat-style token list into named and positional arguments.
///
/// A token is a flag when it starts with `-` and the next character is not
/// a digit or `.`, so `-5` and `-.5` stay positional. A flag followed by a
/// non-flag token takes it as its value; otherwise it is a switch. A value
/// of `false` drops the flag and `true` makes it a switch. `-Name:value`
/// is accepted as well.
pub fn split_splat_args(tokens: &[String]) -> Invocation {
    let mut invocation = Invocation::default();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i].trim();
        i += 1;
        if !is_flag(token) {
            invocation.positional.push(token.to_string());
            continue;
        }
        let body = token.trim_start_matches('-');
        if body.is_empty() {
            invocation.positional.push(token.to_string());
            continue;
        }
        let (name, inline) = match body.split_once(':') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (body, None),
        };
        let value = match inline {
            Some(v) => Some(v),
            None if i < tokens.len() && !is_flag(tokens[i].trim()) => {
                i += 1;
                Some(tokens[i - 1].trim().to_string())
            }
            None => None,
        };
        let coerced = match value {
            None => Some(ArgValue::Switch),
            Some(v) => loose_value(&v),
        };
        match coerced {
            Some(v) => invocation.insert(name.to_string(), v),
            None => invocation.remove(name),
        }
    }
    invocation
}

fn is_flag(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('-')
        && chars
            .next()
            .is_some_and(|c| !c.is_ascii_digit() && c != '.')
}

/// Coercion for parameters the unit does not declare.
fn loose_value(value: &str) -> Option<ArgValue> {
    if value.is_empty() || value.eq_ignore_ascii_case("true") {
        Some(ArgValue::Switch)
    } else if value.eq_ignore_ascii_case("false") {
        None
    } else {
        Some(ArgValue::Value(value.to_string()))
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "" | "true" | "1" | "yes" | "y" | "$true"
    )
}
