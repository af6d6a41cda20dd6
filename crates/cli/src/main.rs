//! Stepwise CLI: the main entry point.
//!
//! Commands:
//! - `ask`     - One-shot request, or an interactive session without a prompt
//! - `units`   - List units or show one unit's parameters
//! - `tools`   - List built-in tools
//! - `doctor`  - Diagnose configuration, provider and interpreter
//! - `config`  - Show, locate or initialize the config file

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "stepwise",
    about = "Stepwise: a local agentic assistant for the command line",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the agent; without a prompt, start an interactive session
    Ask {
        /// The request. Omit for interactive mode
        prompt: Option<String>,

        /// Print one JSON document instead of streaming text
        #[arg(long)]
        json: bool,

        /// Only offer units from this catalog group
        #[arg(long)]
        scope: Option<String>,

        /// Attach a file to the environment context (repeatable)
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,

        #[command(flatten)]
        overrides: commands::ask::OverrideArgs,
    },

    /// Inspect the unit catalog
    Units {
        #[command(subcommand)]
        action: UnitsAction,
    },

    /// List built-in tools
    Tools,

    /// Diagnose system health
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum UnitsAction {
    /// List units with their parameters
    List {
        /// Only list units from this catalog group
        #[arg(long)]
        scope: Option<String>,
    },
    /// Show one unit
    Info { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file if none exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries answers and JSON.
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Ask {
            prompt,
            json,
            scope,
            files,
            overrides,
        } => {
            let args = commands::ask::AskArgs {
                prompt,
                json,
                scope,
                files,
                overrides,
            };
            commands::ask::run(args).await
        }
        Commands::Units { action } => match action {
            UnitsAction::List { scope } => commands::units::list(scope.as_deref()).await,
            UnitsAction::Info { name } => commands::units::info(&name).await,
        },
        Commands::Tools => commands::tools::run().await,
        Commands::Doctor => commands::doctor::run().await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await,
            ConfigAction::Path => commands::config_cmd::path().await,
            ConfigAction::Init { force } => commands::config_cmd::init(force).await,
        },
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
