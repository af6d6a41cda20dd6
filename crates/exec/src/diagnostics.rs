//! Human-facing summaries of PowerShell failures.

use std::sync::LazyLock;

use regex::Regex;

const MAX_LEN: usize = 240;

/// `Get-Item: Cannot find path ...` style lines from the concise error view.
static COMMAND_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z]+-[A-Za-z]+|Exception|Write-Error|ParserError)\s*:\s*(.+)$")
        .expect("command error pattern is valid")
});

/// Extracts one concise error line from interpreter output.
///
/// Prefers the message column of the error view (`| message`), then a
/// `Command: message` line, then a `throw` text. Returns `None` when nothing
/// in the output looks like an error.
pub fn friendly_error(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let from_view = lines.iter().rev().find_map(|line| {
        let text = line.strip_prefix('|')?.trim();
        (!text.is_empty() && !text.chars().all(|c| c == '~' || c.is_whitespace())).then_some(text)
    });
    let from_command = || {
        lines.iter().find_map(|line| {
            COMMAND_ERROR_RE
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
        })
    };
    let from_throw = || {
        lines
            .iter()
            .find(|l| l.contains("Exception") || l.starts_with("throw") || l.contains("was not loaded"))
            .copied()
    };

    let message = from_view.or_else(from_command).or_else(from_throw)?;
    Some(shorten(message))
}

fn shorten(text: &str) -> String {
    if text.chars().count() <= MAX_LEN {
        return text.to_string();
    }
    let cut: String = text.chars().take(MAX_LEN).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_error_view_message() {
        let output = "starting\nGet-Disk: /tmp/x.ps1:12\nLine |\n  12 |  Get-Item $Drive\n     |  ~~~~~~~~~~~~~~~\n     | Cannot find drive 'Q'.\n";
        assert_eq!(friendly_error(output).as_deref(), Some("Cannot find drive 'Q'."));
    }

    #[test]
    fn picks_command_line() {
        let output = "Get-Item: Cannot find path 'C:\\nope' because it does not exist.";
        assert_eq!(
            friendly_error(output).as_deref(),
            Some("Cannot find path 'C:\\nope' because it does not exist.")
        );
    }

    #[test]
    fn plain_output_is_not_an_error() {
        assert_eq!(friendly_error("all good\n42 items"), None);
        assert_eq!(friendly_error(""), None);
    }

    #[test]
    fn long_messages_are_shortened() {
        let output = format!("Exception: {}", "x".repeat(400));
        let message = friendly_error(&output).unwrap();
        assert!(message.ends_with("..."));
        assert_eq!(message.chars().count(), MAX_LEN + 3);
    }
}
