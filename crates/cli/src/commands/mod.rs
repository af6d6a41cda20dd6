//! Subcommand implementations. Each returns the process exit code.

pub mod ask;
pub mod config_cmd;
pub mod doctor;
pub mod tools;
pub mod units;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_config::{AppConfig, Overrides};
use stepwise_core::catalog::CatalogProvider;
use stepwise_exec::{CachedCatalog, CleanupRegistry, FsCatalog, Harness, UnitRunner};

pub type CommandResult = Result<u8, Box<dyn std::error::Error>>;

/// Config file, then environment, then command-line overrides.
pub fn load_config(overrides: &Overrides) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Units are resolved relative to the working directory.
pub fn base_dir() -> Result<PathBuf, Box<dyn std::error::Error>> {
    Ok(std::env::current_dir().map_err(|e| format!("Cannot read working directory: {e}"))?)
}

pub fn catalog(config: &AppConfig) -> Arc<dyn CatalogProvider> {
    Arc::new(CachedCatalog::new(FsCatalog::with_units_dir(config.exec.units_dir.clone())))
}

/// Wires the unit runner and built-in tools behind one harness.
pub fn harness(config: &AppConfig, cleanup: Arc<CleanupRegistry>, echo: bool) -> Harness {
    let runner = UnitRunner::new(catalog(config), cleanup)
        .with_interpreter(config.exec.interpreter.as_ref().map(PathBuf::from))
        .with_timeout(config.exec.timeout())
        .with_echo(echo);
    Harness::new(runner, Arc::new(stepwise_tools::default_registry())).with_tool_timeout(config.exec.timeout())
}

/// First `name` found on `PATH`.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| candidates(&dir, name))
        .find(|p| p.is_file())
}

fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![dir.join(format!("{name}.exe")), dir.join(name)]
    } else {
        vec![dir.join(name)]
    }
}
