//! PowerShell invocation script builder.
//!
//! Every value reaches PowerShell as a single-quoted literal inside a
//! splat table, never as interpolated command text.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::invocation::{ArgValue, Invocation};

/// Quotes `value` as a PowerShell single-quoted string literal.
///
/// PowerShell also treats the typographic single quotes as delimiters, so
/// those are doubled too.
pub fn ps_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Builds the script that loads `sources` and calls `function`.
pub fn build_invocation_script(sources: &[PathBuf], function: &str, invocation: &Invocation) -> String {
    let mut script = String::new();
    script.push_str("[Console]::OutputEncoding = [System.Text.Encoding]::UTF8\n");
    script.push_str("Set-StrictMode -Version Latest\n");
    script.push_str("$ErrorActionPreference = 'Stop'\n");

    let quoted: Vec<String> = sources
        .iter()
        .map(|p| ps_quote(&p.to_string_lossy()))
        .collect();
    let _ = writeln!(script, "$swSources = @({})", quoted.join(", "));

    script.push_str("$swNamed = @{}\n");
    for (name, value) in &invocation.named {
        let rendered = match value {
            ArgValue::Switch => "$true".to_string(),
            ArgValue::Value(v) => ps_quote(v),
        };
        let _ = writeln!(script, "$swNamed[{}] = {}", ps_quote(name), rendered);
    }

    let positional: Vec<String> = invocation.positional.iter().map(|v| ps_quote(v)).collect();
    let _ = writeln!(script, "$swPositional = @({})", positional.join(", "));

    script.push_str(
        "foreach ($swSource in $swSources) { if (Test-Path -LiteralPath $swSource) { . $swSource } }\n",
    );
    let quoted_fn = ps_quote(function);
    let _ = writeln!(
        script,
        "if (-not (Get-Command -Name {quoted_fn} -CommandType Function -ErrorAction SilentlyContinue)) {{ throw {} }}",
        ps_quote(&format!("Unit '{function}' was not loaded from its sources."))
    );
    let _ = writeln!(script, "& {quoted_fn} @swNamed @swPositional");
    script
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(ps_quote("plain"), "'plain'");
        assert_eq!(ps_quote("it's"), "'it''s'");
        assert_eq!(ps_quote("a\u{2019}b"), "'a\u{2019}\u{2019}b'");
        assert_eq!(ps_quote("$(rm -r /)"), "'$(rm -r /)'");
    }

    #[test]
    fn script_splats_named_and_positional() {
        let mut invocation = Invocation::default();
        invocation.named.insert("Host".into(), ArgValue::Value("srv'1".into()));
        invocation.named.insert("Force".into(), ArgValue::Switch);
        invocation.positional.push("extra".into());
        let sources = vec![PathBuf::from("/u/_common.ps1"), PathBuf::from("/u/net.ps1")];

        let script = build_invocation_script(&sources, "Test-Host", &invocation);
        assert!(script.starts_with("[Console]::OutputEncoding"));
        assert!(script.contains("Set-StrictMode -Version Latest"));
        assert!(script.contains("$ErrorActionPreference = 'Stop'"));
        assert!(script.contains("$swSources = @('/u/_common.ps1', '/u/net.ps1')"));
        assert!(script.contains("$swNamed['Host'] = 'srv''1'"));
        assert!(script.contains("$swNamed['Force'] = $true"));
        assert!(script.contains("$swPositional = @('extra')"));
        assert!(script.contains("throw 'Unit ''Test-Host'' was not loaded from its sources.'"));
        assert!(script.trim_end().ends_with("& 'Test-Host' @swNamed @swPositional"));
    }

    #[test]
    fn empty_invocation_still_splats() {
        let script = build_invocation_script(&[], "Get-Thing", &Invocation::default());
        assert!(script.contains("$swSources = @()"));
        assert!(script.contains("$swPositional = @()"));
    }
}
