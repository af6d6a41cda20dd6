//! Operator confirmation prompts.

use std::io::{self, BufRead, Stdin, Stdout, Write};

use stepwise_core::risk::RiskLevel;

/// Asks the operator before an action runs or another page is fetched.
pub trait Confirmer: Send {
    /// High risk defaults to "no"; everything else defaults to "yes".
    fn confirm_action(&mut self, risk: RiskLevel) -> bool;

    /// Whether to fetch more results. Defaults to "yes".
    fn confirm_more(&mut self, prompt: &str) -> bool;
}

/// Where answers come from, one line per call.
pub trait LineSource: Send {
    fn next_line(&mut self, buf: &mut String) -> io::Result<usize>;
}

// Goes through the process-wide stdin buffer, so the interactive prompt
// and confirmations never steal each other's lines.
impl LineSource for Stdin {
    fn next_line(&mut self, buf: &mut String) -> io::Result<usize> {
        self.read_line(buf)
    }
}

impl LineSource for &[u8] {
    fn next_line(&mut self, buf: &mut String) -> io::Result<usize> {
        BufRead::read_line(self, buf)
    }
}

/// Reads answers line by line. End of input takes the default.
pub struct StdinConfirmer<R: LineSource, W: Write + Send> {
    input: R,
    out: W,
}

impl StdinConfirmer<Stdin, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin(), io::stdout())
    }
}

impl<R: LineSource, W: Write + Send> StdinConfirmer<R, W> {
    pub fn new(input: R, out: W) -> Self {
        Self { input, out }
    }

    fn ask(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.out, "{prompt}");
        let _ = self.out.flush();
        let mut line = String::new();
        match self.input.next_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_ascii_lowercase()),
        }
    }
}

impl<R: LineSource, W: Write + Send> Confirmer for StdinConfirmer<R, W> {
    fn confirm_action(&mut self, risk: RiskLevel) -> bool {
        if risk == RiskLevel::High {
            let answer = self.ask("Confirm HIGH risk action? [y/N]: ");
            return matches!(answer.as_deref(), Some("y" | "yes"));
        }
        let answer = self.ask("Confirm agent action? [Y/n]: ");
        !matches!(answer.as_deref(), Some("n" | "no"))
    }

    fn confirm_more(&mut self, prompt: &str) -> bool {
        let prompt = match prompt.trim() {
            "" => "Show more results?",
            p => p,
        };
        let answer = self.ask(&format!("{prompt} [Y/n]: "));
        !matches!(answer.as_deref(), Some("n" | "no"))
    }
}
