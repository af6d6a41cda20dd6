//! Search tool: find files by name fragment and extension.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use stepwise_core::decision::ArgMap;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{RunResult, Tool};
use tracing::debug;

use crate::files::{FileHit, has_extension, resolve_base, scan_files};
use crate::paging::{PageCache, paged_result};

pub const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortBy {
    Name,
    Date,
    Size,
}

impl SortBy {
    fn parse(raw: Option<&String>) -> Result<Self, ToolError> {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("name") => Ok(Self::Name),
            Some("date") | Some("mtime") | Some("time") => Ok(Self::Date),
            Some("size") => Ok(Self::Size),
            Some(other) => Err(ToolError::InvalidArguments(format!(
                "sort must be name|date|size, got {other:?}"
            ))),
        }
    }

    fn apply(self, hits: &mut [FileHit]) {
        match self {
            Self::Name => hits.sort_by(|a, b| {
                file_name_key(&a.path)
                    .cmp(&file_name_key(&b.path))
                    .then_with(|| a.path.cmp(&b.path))
            }),
            Self::Date => hits.sort_by(|a, b| b.modified.cmp(&a.modified)),
            Self::Size => hits.sort_by(|a, b| b.size.cmp(&a.size)),
        }
    }
}

fn file_name_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

pub struct SearchTool {
    pages: Arc<PageCache<FileHit>>,
}

impl SearchTool {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(PageCache::new()),
        }
    }
}

impl Default for SearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Find files under base whose name contains name, optionally filtered by ext, sorted by name|date|size."
    }

    fn arg_keys(&self) -> &[&str] {
        &["base", "name", "ext", "sort", "limit", "offset"]
    }

    async fn execute(&self, base_dir: &Path, args: &ArgMap) -> Result<RunResult, ToolError> {
        let base = resolve_base(base_dir, args.get("base"))?;
        let sort = SortBy::parse(args.get("sort"))?;
        let name = args.get("name").map(|s| s.trim().to_lowercase()).unwrap_or_default();
        let ext = args.get("ext").map(|s| s.trim().to_string()).unwrap_or_default();

        let key = format!("{}|{name}|{}|{sort:?}", base.display(), ext.to_lowercase());
        let pages = Arc::clone(&self.pages);
        let hits = tokio::task::spawn_blocking(move || {
            pages.get_or_load(&key, Instant::now(), || {
                let mut hits = scan_files(&base, |path| {
                    has_extension(path, &ext) && (name.is_empty() || file_name_key(path).contains(&name))
                });
                sort.apply(&mut hits);
                debug!(base = %base.display(), count = hits.len(), "Search scan finished");
                Ok::<_, ToolError>(hits)
            })
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "search".into(),
            reason: e.to_string(),
        })??;

        Ok(paged_result(&hits, args, DEFAULT_LIMIT, "No files found.", FileHit::render))
    }
}
