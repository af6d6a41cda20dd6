//! Unit catalog text for the planner's system prompt.

use std::collections::BTreeMap;
use std::path::Path;

use stepwise_core::catalog::{CatalogProvider, UnitEntry, UnitKind};
use tracing::warn;

use crate::context::estimate_tokens;

pub const CATALOG_TOKEN_BUDGET: usize = 6000;
const SCRIPTS_GROUP: &str = "Scripts";

/// Readable group name for a unit source file.
///
/// `03_Disk_Toolkit.ps1` becomes `Disk`.
pub fn group_label(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut label = stem.as_str();
    if let Some((prefix, rest)) = label.split_once('_')
        && !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_digit())
    {
        label = rest;
    }
    label = label.strip_suffix("_Toolkit").unwrap_or(label);
    label.replace('_', " ").trim().to_string()
}

fn entry_line(entry: &UnitEntry) -> String {
    let mut line = format!("- {}", entry.name);
    if !entry.params.is_empty() {
        let params: Vec<String> = entry.params.iter().map(|p| p.notation()).collect();
        line.push_str(&format!("({})", params.join(", ")));
    }
    let synopsis = entry.synopsis.trim();
    if !synopsis.is_empty() {
        line.push_str(": ");
        line.push_str(synopsis);
    }
    line
}

/// Builds the grouped unit catalog under `base_dir`.
///
/// `scope` keeps only groups or units whose name contains it. Returns
/// `(none)` when nothing is listed or the catalog cannot be read.
pub fn build_unit_catalog(
    catalog: &dyn CatalogProvider,
    base_dir: &Path,
    scope: Option<&str>,
    budget: usize,
) -> String {
    let entries = match catalog.list_entries(base_dir, true) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Could not list units");
            return "(none)".into();
        }
    };

    let scope = scope
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in &entries {
        let label = match entry.kind {
            UnitKind::Function => group_label(&entry.path),
            UnitKind::Script => SCRIPTS_GROUP.to_string(),
        };
        if let Some(scope) = &scope
            && !label.to_lowercase().contains(scope.as_str())
            && !entry.name.to_lowercase().contains(scope.as_str())
        {
            continue;
        }
        groups.entry(label).or_default().push(entry_line(entry));
    }

    if groups.is_empty() {
        return "(none)".into();
    }

    let text = groups
        .into_iter()
        .map(|(label, lines)| format!("[{label}]\n{}", lines.join("\n")))
        .collect::<Vec<_>>()
        .join("\n\n");

    let tokens = estimate_tokens(&text);
    if tokens > budget {
        warn!(
            tokens,
            budget, "Unit catalog is large; consider narrowing it with --scope"
        );
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use stepwise_core::catalog::{ParamDetail, UnitInfo};
    use stepwise_core::error::CatalogError;

    struct Listing(Vec<UnitEntry>);

    impl CatalogProvider for Listing {
        fn list_entries(&self, _: &Path, _: bool) -> Result<Vec<UnitEntry>, CatalogError> {
            Ok(self.0.clone())
        }

        fn get_info(&self, _: &Path, name: &str) -> Result<UnitInfo, CatalogError> {
            Err(CatalogError::NotFound(name.to_string()))
        }
    }

    struct Broken;

    impl CatalogProvider for Broken {
        fn list_entries(&self, base: &Path, _: bool) -> Result<Vec<UnitEntry>, CatalogError> {
            Err(CatalogError::Io {
                path: base.to_path_buf(),
                reason: "denied".into(),
            })
        }

        fn get_info(&self, _: &Path, name: &str) -> Result<UnitInfo, CatalogError> {
            Err(CatalogError::NotFound(name.to_string()))
        }
    }

    fn entry(file: &str, name: &str, synopsis: &str, params: Vec<ParamDetail>) -> UnitEntry {
        UnitEntry {
            name: name.into(),
            path: PathBuf::from("units").join(file),
            kind: Default::default(),
            synopsis: synopsis.into(),
            params,
        }
    }

    fn listing() -> Listing {
        let mandatory = ParamDetail {
            mandatory: true,
            ..ParamDetail::new("Drive")
        };
        Listing(vec![
            entry("02_Network_Toolkit.ps1", "Test-Port", "Checks a TCP port", vec![]),
            entry("01_Disk_Toolkit.ps1", "Get-DiskUsage", "Disk usage", vec![mandatory]),
            entry("01_Disk_Toolkit.ps1", "Clear-Temp", "", vec![]),
        ])
    }

    #[test]
    fn labels_are_readable() {
        assert_eq!(group_label(Path::new("units/03_Disk_Toolkit.ps1")), "Disk");
        assert_eq!(group_label(Path::new("Active_Directory.ps1")), "Active Directory");
        assert_eq!(group_label(Path::new("v2_Mail_Toolkit.ps1")), "v2 Mail");
    }

    #[test]
    fn groups_are_sorted_with_lines() {
        let text = build_unit_catalog(&listing(), Path::new("."), None, CATALOG_TOKEN_BUDGET);
        assert_eq!(
            text,
            "[Disk]\n- Get-DiskUsage(Drive*): Disk usage\n- Clear-Temp\n\n[Network]\n- Test-Port: Checks a TCP port"
        );
    }

    #[test]
    fn scope_filters_by_group_or_name() {
        let base = Path::new(".");
        let by_group = build_unit_catalog(&listing(), base, Some("network"), CATALOG_TOKEN_BUDGET);
        assert_eq!(by_group, "[Network]\n- Test-Port: Checks a TCP port");
        let by_name = build_unit_catalog(&listing(), base, Some("temp"), CATALOG_TOKEN_BUDGET);
        assert_eq!(by_name, "[Disk]\n- Clear-Temp");
        assert_eq!(build_unit_catalog(&listing(), base, Some("mail"), CATALOG_TOKEN_BUDGET), "(none)");
    }

    #[test]
    fn script_units_share_one_group() {
        let mut units = listing().0;
        for (file, name) in [("backup.sh", "backup"), ("rotate-logs.ps1", "rotate-logs")] {
            units.push(UnitEntry {
                kind: UnitKind::Script,
                ..entry(file, name, "", vec![])
            });
        }
        let text = build_unit_catalog(&Listing(units), Path::new("."), Some("scripts"), CATALOG_TOKEN_BUDGET);
        assert_eq!(text, "[Scripts]\n- backup\n- rotate-logs");
    }

    #[test]
    fn empty_or_unreadable_is_none() {
        let base = Path::new(".");
        assert_eq!(build_unit_catalog(&Listing(vec![]), base, None, CATALOG_TOKEN_BUDGET), "(none)");
        assert_eq!(build_unit_catalog(&Broken, base, None, CATALOG_TOKEN_BUDGET), "(none)");
    }
}
