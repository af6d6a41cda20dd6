//! `stepwise config`: Configuration management commands.

use stepwise_config::{AppConfig, Overrides};

use super::CommandResult;

pub async fn show() -> CommandResult {
    let mut config = super::load_config(&Overrides::default())?;
    if config.has_api_key() {
        config.openai.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(0)
}

pub async fn path() -> CommandResult {
    println!("{}", AppConfig::config_path().display());
    Ok(0)
}

pub async fn init(force: bool) -> CommandResult {
    let path = AppConfig::config_path();
    if path.exists() && !force {
        println!("Config already exists at {} (use --force to overwrite)", path.display());
        return Ok(1);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("Wrote default config to {}", path.display());
    Ok(0)
}
