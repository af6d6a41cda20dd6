//! `stepwise ask`: One-shot request or interactive session.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use stepwise_agent::{
    AgentLoop, Decider, DecisionCache, JsonWriter, SessionHistory, StdinConfirmer, TtyWriter, attach_files,
    env_context,
};
use stepwise_config::{AppConfig, Overrides};
use stepwise_exec::CleanupRegistry;
use stepwise_providers::build_from_config;
use tracing::{debug, info};

use super::CommandResult;

const PROMPT_LABEL: &str = "ask> ";

/// Flags that beat both the config file and the environment.
#[derive(Args, Debug, Default)]
pub struct OverrideArgs {
    /// Provider: openai, ollama or auto
    #[arg(long)]
    pub provider: Option<String>,

    /// Model for the selected provider
    #[arg(long)]
    pub model: Option<String>,

    /// Base URL for the selected provider
    #[arg(long)]
    pub base_url: Option<String>,

    /// Risk policy: strict, normal or off
    #[arg(long)]
    pub risk_policy: Option<String>,

    /// Confirm every tool run
    #[arg(long, overrides_with = "no_confirm")]
    pub confirm: bool,

    /// Never confirm tool runs (risk policy still applies)
    #[arg(long)]
    pub no_confirm: bool,
}

impl OverrideArgs {
    pub fn to_overrides(&self) -> Overrides {
        let confirm_tools = match (self.confirm, self.no_confirm) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Overrides {
            provider: self.provider.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            risk_policy: self.risk_policy.clone(),
            confirm_tools,
        }
    }
}

pub struct AskArgs {
    pub prompt: Option<String>,
    pub json: bool,
    pub scope: Option<String>,
    pub files: Vec<PathBuf>,
    pub overrides: OverrideArgs,
}

pub async fn run(args: AskArgs) -> CommandResult {
    let prompt = args.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty());
    if args.json && prompt.is_none() {
        return Err("--json needs a prompt; interactive mode is text only".into());
    }

    let config = super::load_config(&args.overrides.to_overrides())?;
    let base_dir = super::base_dir()?;

    let mut context = env_context(&base_dir);
    if !args.files.is_empty() {
        let attached = attach_files(&args.files)?;
        context.push('\n');
        context.push_str(&attached);
    }

    let cleanup = Arc::new(CleanupRegistry::new().with_stale_after(config.exec.timeout()));
    install_interrupt_handler(cleanup.clone());

    let mut agent = build_agent(&config, base_dir, cleanup, &args, context)?;
    let mut session = SessionHistory::new();

    match prompt {
        Some(prompt) => {
            let mut confirmer = StdinConfirmer::stdio();
            let report = if args.json {
                let mut writer = JsonWriter::stdout();
                agent.run_turn(prompt, &mut session, &mut writer, &mut confirmer).await
            } else {
                let mut writer = TtyWriter::stdout();
                agent.run_turn(prompt, &mut session, &mut writer, &mut confirmer).await
            };
            debug!(steps = report.steps, outcome = ?report.outcome, "Turn finished");
            Ok(exit_byte(report.outcome.exit_code()))
        }
        None => interactive(&mut agent, &mut session).await,
    }
}

fn build_agent(
    config: &AppConfig,
    base_dir: PathBuf,
    cleanup: Arc<CleanupRegistry>,
    args: &AskArgs,
    context: String,
) -> Result<AgentLoop, Box<dyn std::error::Error>> {
    let session = build_from_config(config)?;
    info!(provider = %session.kind, model = %session.options.model, "Session provider");

    let cache = Arc::new(DecisionCache::from_config(&config.agent));
    let decider = Decider::new(session.provider, session.options).with_cache(cache);
    let harness = Arc::new(super::harness(config, cleanup, !args.json));

    Ok(AgentLoop::new(decider, harness, base_dir)
        .with_config(&config.agent)
        .with_json_mode(args.json)
        .with_scope(args.scope.clone())
        .with_env_context(context))
}

async fn interactive(agent: &mut AgentLoop, session: &mut SessionHistory) -> CommandResult {
    let options = agent.decider().options();
    println!("stepwise ask | {}/{}", options.provider, display_model(&options.model));
    println!("Type your question. Commands: /exit, exit, quit");

    loop {
        print!("{PROMPT_LABEL}");
        io::stdout().flush()?;

        let Some(line) = read_line().await? else {
            println!();
            return Ok(0);
        };
        let prompt = line.trim();
        match prompt.to_ascii_lowercase().as_str() {
            "" => continue,
            "/exit" | "exit" | "quit" => return Ok(0),
            _ => {}
        }

        let mut writer = TtyWriter::stdout();
        let mut confirmer = StdinConfirmer::stdio();
        let report = agent.run_turn(prompt, session, &mut writer, &mut confirmer).await;
        debug!(steps = report.steps, outcome = ?report.outcome, "Turn finished");
    }
}

/// Reads one line off the runtime threads. `None` at end of input.
async fn read_line() -> io::Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match io::stdin().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await
    .map_err(io::Error::other)?
}

/// Ctrl-C removes temp scripts and exits with 130.
fn install_interrupt_handler(cleanup: Arc<CleanupRegistry>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let removed = cleanup.run_once();
            debug!(removed, "Interrupted, cleaned up");
            eprintln!("\nInterrupted.");
            std::process::exit(130);
        }
    });
}

fn display_model(model: &str) -> &str {
    if model.is_empty() { "auto" } else { model }
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_flags_map_to_overrides() {
        let mut args = OverrideArgs::default();
        assert_eq!(args.to_overrides().confirm_tools, None);
        args.no_confirm = true;
        assert_eq!(args.to_overrides().confirm_tools, Some(false));
        args.confirm = true;
        assert_eq!(args.to_overrides().confirm_tools, Some(true));
    }

    #[test]
    fn exit_codes_fit_a_byte() {
        assert_eq!(exit_byte(0), 0);
        assert_eq!(exit_byte(124), 124);
        assert_eq!(exit_byte(-1), 1);
        assert_eq!(exit_byte(300), 1);
    }
}
