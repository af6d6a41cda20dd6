//! `stepwise units`: Inspect the unit catalog.

use stepwise_agent::build_unit_catalog;
use stepwise_config::Overrides;
use stepwise_core::catalog::{UnitInfo, UnitKind};

use super::CommandResult;

pub async fn list(scope: Option<&str>) -> CommandResult {
    let config = super::load_config(&Overrides::default())?;
    let base_dir = super::base_dir()?;
    let catalog = super::catalog(&config);

    println!("Units in {}:", config.units_dir(&base_dir).display());
    println!();
    println!("{}", build_unit_catalog(catalog.as_ref(), &base_dir, scope, usize::MAX));
    Ok(0)
}

pub async fn info(name: &str) -> CommandResult {
    let config = super::load_config(&Overrides::default())?;
    let base_dir = super::base_dir()?;
    let info = super::catalog(&config).get_info(&base_dir, name)?;
    print!("{}", render_info(&info));
    Ok(0)
}

fn render_info(info: &UnitInfo) -> String {
    let mut out = format!("{}\n", info.name);
    if !info.synopsis.trim().is_empty() {
        out.push_str(&format!("  {}\n", info.synopsis.trim()));
    }
    out.push_str(&format!("\n  Source:  {}\n", info.path.display()));
    if info.kind == UnitKind::Script {
        out.push_str("  Kind:    script (arguments passed as argv)\n");
    }
    if let Some(safety) = info.safety.as_deref().filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("  Safety:  {}\n", safety.trim()));
    }
    if info.params.is_empty() {
        out.push_str("  Params:  (none)\n");
        return out;
    }
    out.push_str("  Params:\n");
    for param in &info.params {
        let mut notes = Vec::new();
        if param.mandatory {
            notes.push("mandatory".to_string());
        }
        if param.switch {
            notes.push("switch".to_string());
        }
        if !param.allowed_values.is_empty() {
            notes.push(format!("one of {}", param.allowed_values.join("|")));
        }
        if let Some(default) = param.default.as_deref().filter(|d| !d.is_empty()) {
            notes.push(format!("default {default}"));
        }
        if notes.is_empty() {
            out.push_str(&format!("    - {}\n", param.name));
        } else {
            out.push_str(&format!("    - {} ({})\n", param.name, notes.join(", ")));
        }
    }
    out
}
