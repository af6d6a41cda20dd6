//! Clean tool: find and optionally remove empty directories.
//!
//! Listing is the default; removal needs an explicit `apply` and is
//! classified high risk so the agent asks before doing it.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use stepwise_core::decision::ArgMap;
use stepwise_core::error::ToolError;
use stepwise_core::risk::{Assessment, RiskLevel};
use stepwise_core::tool::{RunResult, Tool};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::files::resolve_base;

pub struct CleanTool;

fn wants_apply(args: &ArgMap) -> bool {
    args.get("apply").is_some_and(|v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y")
    })
}

/// Empty directories below `base`, deepest first.
fn find_empty_dirs(base: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(base)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            fs::read_dir(e.path())
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false)
        })
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    dirs
}

#[async_trait]
impl Tool for CleanTool {
    fn name(&self) -> &str {
        "clean"
    }

    fn description(&self) -> &str {
        "List empty folders under base; set apply=true to delete them."
    }

    fn arg_keys(&self) -> &[&str] {
        &["base", "apply"]
    }

    fn risk(&self, args: &ArgMap) -> Assessment {
        if wants_apply(args) {
            Assessment::new(RiskLevel::High, "deletes empty folders")
        } else {
            Assessment::new(RiskLevel::Medium, "scans folders for deletion candidates")
        }
    }

    async fn execute(&self, base_dir: &Path, args: &ArgMap) -> Result<RunResult, ToolError> {
        let base = resolve_base(base_dir, args.get("base"))?;
        let apply = wants_apply(args);
        let dirs = tokio::task::spawn_blocking(move || find_empty_dirs(&base))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "clean".into(),
                reason: e.to_string(),
            })?;

        if dirs.is_empty() {
            return Ok(RunResult::ok("No empty folders found."));
        }
        let mut lines = vec!["Empty folders:".to_string()];
        lines.extend(dirs.iter().map(|d| d.display().to_string()));

        if !apply {
            lines.push("Preview only. Set tool_args.apply=true to delete.".into());
            return Ok(RunResult::ok(lines.join("\n")));
        }

        let mut removed = 0;
        let mut failed = 0;
        for dir in &dirs {
            match fs::remove_dir(dir) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Failed to remove folder");
                    failed += 1;
                }
            }
        }
        info!(removed, failed, "Removed empty folders");
        lines.push(format!("Removed {removed} empty folders."));
        if failed > 0 {
            lines.push(format!("{failed} could not be removed."));
            return Ok(RunResult::failed(1, lines.join("\n")));
        }
        Ok(RunResult::ok(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::create_dir(dir.path().join("keep")).unwrap();
        fs::write(dir.path().join("keep/file.txt"), "x").unwrap();
        dir
    }

    #[test]
    fn risk_depends_on_apply() {
        let mut args = ArgMap::new();
        assert_eq!(CleanTool.risk(&args).level, RiskLevel::Medium);
        args.insert("apply".into(), "Yes".into());
        assert_eq!(CleanTool.risk(&args).level, RiskLevel::High);
        args.insert("apply".into(), "false".into());
        assert_eq!(CleanTool.risk(&args).level, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn preview_does_not_delete() {
        let dir = fixture();
        let result = CleanTool.execute(dir.path(), &ArgMap::new()).await.unwrap();
        let deepest = dir.path().join("a/b/c").display().to_string();
        assert!(result.output.contains(&deepest));
        assert!(result.output.contains("Preview only"));
        assert!(dir.path().join("a/b/c").exists());
    }

    #[tokio::test]
    async fn apply_removes_deepest_first() {
        let dir = fixture();
        let mut args = ArgMap::new();
        args.insert("apply".into(), "true".into());
        let result = CleanTool.execute(dir.path(), &args).await.unwrap();
        assert!(result.success());
        assert!(result.output.contains("Removed 1 empty folders."));
        assert!(!dir.path().join("a/b/c").exists());
        assert!(dir.path().join("a/b").exists());
        assert!(dir.path().join("keep/file.txt").exists());
    }
}
