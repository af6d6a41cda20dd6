//! Filesystem helpers shared by the listing tools.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use stepwise_core::error::ToolError;
use walkdir::WalkDir;

/// One file found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHit {
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

impl FileHit {
    pub fn render(&self) -> String {
        format!(
            "{} | {} | {}",
            format_time(self.modified),
            format_size(self.size),
            self.path.display()
        )
    }
}

/// Resolves a `base` argument against the session directory.
///
/// Empty means the session directory. `~/` expands to the home directory,
/// and `downloads`, `desktop` and `documents` name the usual home folders.
pub fn resolve_base(base_dir: &Path, raw: Option<&String>) -> Result<PathBuf, ToolError> {
    let raw = raw.map(|s| s.trim()).unwrap_or_default();
    let home = stepwise_config::home_dir();
    let normalized = raw.replace('\\', "/").to_ascii_lowercase();
    let path = if raw.is_empty() {
        base_dir.to_path_buf()
    } else if raw == "~" {
        home
    } else {
        match normalized.trim_start_matches("~/") {
            "downloads" => home.join("Downloads"),
            "desktop" => home.join("Desktop"),
            "documents" => home.join("Documents"),
            _ => match raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
                Some(rest) => home.join(rest),
                None => base_dir.join(raw),
            },
        }
    };
    if !path.is_dir() {
        return Err(ToolError::InvalidArguments(format!(
            "base path {} is not a directory",
            path.display()
        )));
    }
    Ok(path)
}

/// Walks `base` and returns every regular file accepted by `keep`.
pub fn scan_files(base: &Path, keep: impl Fn(&Path) -> bool) -> Vec<FileHit> {
    WalkDir::new(base)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && keep(e.path()))
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            Some(FileHit {
                path: e.into_path(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                size: meta.len(),
            })
        })
        .collect()
}

/// Case-insensitive extension match; a leading `.` and `*.` are ignored.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    let wanted = ext.trim().trim_start_matches('*').trim_start_matches('.');
    if wanted.is_empty() {
        return true;
    }
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(wanted))
}

pub fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format("%Y-%m-%d %H:%M").to_string()
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}
