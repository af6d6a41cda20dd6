//! `stepwise doctor`: Diagnose configuration, provider and interpreter.

use std::path::PathBuf;

use stepwise_config::{AppConfig, Overrides};
use stepwise_providers::{ProviderKind, build_from_config};

use super::CommandResult;

pub async fn run() -> CommandResult {
    println!("Stepwise Doctor: System Diagnostics");
    println!("====================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ok    Config file: {}", config_path.display());
    } else {
        println!("  info  No config file at {} (defaults in use, see `stepwise config init`)", config_path.display());
    }

    let config = match super::load_config(&Overrides::default()) {
        Ok(config) => {
            println!("  ok    Config valid");
            config
        }
        Err(e) => {
            println!("  FAIL  {e}");
            println!("\n  1 issue found. Fix the config before running other checks.");
            return Ok(1);
        }
    };

    let kind: Option<ProviderKind> = config.default_provider.parse().ok();
    println!("  info  Provider: {}", config.default_provider);

    if matches!(kind, Some(ProviderKind::OpenAi)) && !config.has_api_key() {
        println!("  FAIL  No OpenAI API key (set OPENAI_API_KEY or openai.api_key)");
        issues += 1;
    }

    match build_from_config(&config) {
        Ok(session) => match session.provider.health_check().await {
            Ok(true) => println!("  ok    {} reachable", session.provider.name()),
            Ok(false) => {
                println!("  FAIL  {} not reachable", session.provider.name());
                issues += 1;
            }
            Err(e) => {
                println!("  FAIL  {}: {e}", session.provider.name());
                issues += 1;
            }
        },
        Err(e) if kind == Some(ProviderKind::OpenAi) && !config.has_api_key() => {
            tracing::debug!(error = %e, "Provider not built");
        }
        Err(e) => {
            println!("  FAIL  Provider: {e}");
            issues += 1;
        }
    }

    match interpreter(&config) {
        Some(path) => println!("  ok    PowerShell: {}", path.display()),
        None => {
            println!("  FAIL  No PowerShell interpreter (install pwsh or set exec.interpreter)");
            issues += 1;
        }
    }

    let base_dir = super::base_dir()?;
    let units_dir = config.units_dir(&base_dir);
    if units_dir.is_dir() {
        println!("  ok    Units directory: {}", units_dir.display());
    } else {
        println!("  info  No units directory at {} (only built-in tools available)", units_dir.display());
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
        Ok(0)
    } else {
        println!("  {issues} issue(s) found. See above for details.");
        Ok(1)
    }
}

fn interpreter(config: &AppConfig) -> Option<PathBuf> {
    match config.exec.interpreter.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(configured) => {
            let path = PathBuf::from(configured);
            if path.is_file() { Some(path) } else { super::find_on_path(configured) }
        }
        None => ["pwsh", "powershell"].into_iter().find_map(super::find_on_path),
    }
}
