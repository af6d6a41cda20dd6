//! Recent tool: most recently modified files under a directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stepwise_core::decision::ArgMap;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{RunResult, Tool};

use crate::files::{FileHit, has_extension, resolve_base, scan_files};
use crate::paging::{PageCache, paged_result};

pub const DEFAULT_LIMIT: usize = 20;

pub struct RecentTool {
    pages: Arc<PageCache<FileHit>>,
}

impl RecentTool {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(PageCache::new()),
        }
    }
}

impl Default for RecentTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RecentTool {
    fn name(&self) -> &str {
        "recent"
    }

    fn description(&self) -> &str {
        "List the most recently modified files under base, newest first, optionally filtered by ext."
    }

    fn arg_keys(&self) -> &[&str] {
        &["base", "ext", "limit", "offset"]
    }

    async fn execute(&self, base_dir: &Path, args: &ArgMap) -> Result<RunResult, ToolError> {
        let base = resolve_base(base_dir, args.get("base"))?;
        let ext = args.get("ext").map(|s| s.trim().to_string()).unwrap_or_default();
        let key = format!("{}|{}", base.display(), ext.to_lowercase());

        let pages = Arc::clone(&self.pages);
        let hits = tokio::task::spawn_blocking(move || {
            pages.get_or_load(&key, Instant::now(), || {
                let mut hits = scan_files(&base, |path| has_extension(path, &ext));
                hits.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.path.cmp(&b.path)));
                Ok::<_, ToolError>(hits)
            })
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "recent".into(),
            reason: e.to_string(),
        })??;

        Ok(paged_result(&hits, args, DEFAULT_LIMIT, "No files found.", FileHit::render))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn touch(path: &Path, age_secs: u64) {
        fs::write(path, "x").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        fs::File::options().write(true).open(path).unwrap().set_modified(when).unwrap();
    }

    #[tokio::test]
    async fn newest_files_come_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("old.log"), 3_600);
        touch(&dir.path().join("new.log"), 10);
        touch(&dir.path().join("middle.txt"), 600);

        let tool = RecentTool::new();
        let result = tool.execute(dir.path(), &ArgMap::new()).await.unwrap();
        let lines: Vec<&str> = result.output.lines().collect();
        assert!(lines[0].ends_with("new.log"));
        assert!(lines[1].ends_with("middle.txt"));
        assert!(lines[2].ends_with("old.log"));

        let mut args = ArgMap::new();
        args.insert("ext".into(), "log".into());
        args.insert("limit".into(), "1".into());
        let result = tool.execute(dir.path(), &args).await.unwrap();
        assert!(result.output.starts_with("  1)"));
        assert!(result.output.contains("new.log"));
        assert!(result.can_continue);
    }
}
