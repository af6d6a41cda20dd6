//! Temp-file lifecycle for unit scripts.
//!
//! Each invocation writes a uniquely named script that a `TempScript`
//! guard removes when dropped. The `CleanupRegistry` additionally knows
//! every live script so an interrupt handler can sweep them before the
//! process exits. Scripts left by other processes are only swept once they
//! are older than any run could take.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use stepwise_core::error::ExecError;
use tracing::{debug, warn};
use uuid::Uuid;

pub const SCRIPT_PREFIX: &str = "stepwise-unit-";
pub const SCRIPT_SUFFIX: &str = ".ps1";
/// Age past which another process's script counts as abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

type Callback = Box<dyn FnOnce() + Send>;

/// Process-wide record of live temp scripts and cleanup callbacks.
pub struct CleanupRegistry {
    temp_dir: PathBuf,
    stale_after: Duration,
    files: Mutex<HashSet<PathBuf>>,
    callbacks: Mutex<Vec<Callback>>,
    ran: AtomicBool,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::with_temp_dir(std::env::temp_dir())
    }

    pub fn with_temp_dir(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            stale_after: DEFAULT_STALE_AFTER,
            files: Mutex::new(HashSet::new()),
            callbacks: Mutex::new(Vec::new()),
            ran: AtomicBool::new(false),
        }
    }

    /// Set to the unit timeout so no running script is swept.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn track(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf());
    }

    pub fn untrack(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
    }

    pub fn live_files(&self) -> usize {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Registers a callback for the interrupt path.
    pub fn on_cleanup(&self, callback: impl FnOnce() + Send + 'static) {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Runs callbacks, removes live scripts and sweeps stale ones.
    ///
    /// Only the first call does anything; later calls return 0.
    pub fn run_once(&self) -> usize {
        if self.ran.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let callbacks: Vec<Callback> =
            std::mem::take(&mut *self.callbacks.lock().unwrap_or_else(PoisonError::into_inner));
        for callback in callbacks {
            callback();
        }

        let files: Vec<PathBuf> = self
            .files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let mut removed = 0;
        for file in files {
            if fs::remove_file(&file).is_ok() {
                removed += 1;
            }
        }
        removed + sweep_stale_scripts(&self.temp_dir, self.stale_after)
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes leftover `stepwise-unit-*.ps1` files in `dir` last modified
/// more than `older_than` ago.
pub fn sweep_stale_scripts(dir: &Path, older_than: Duration) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !(name.starts_with(SCRIPT_PREFIX) && name.ends_with(SCRIPT_SUFFIX)) {
            continue;
        }
        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());
        if age.is_some_and(|age| age > older_than) {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale script"),
            }
        }
    }
    if removed > 0 {
        debug!(count = removed, "Swept stale unit scripts");
    }
    removed
}

/// A private temp script, deleted when the guard is dropped.
pub struct TempScript {
    path: PathBuf,
    registry: Arc<CleanupRegistry>,
}

impl TempScript {
    pub fn create(registry: &Arc<CleanupRegistry>, contents: &str) -> Result<Self, ExecError> {
        let path = registry
            .temp_dir()
            .join(format!("{SCRIPT_PREFIX}{}{SCRIPT_SUFFIX}", Uuid::new_v4().simple()));
        let io_err = |e: std::io::Error| ExecError::Io {
            path: path.clone(),
            reason: e.to_string(),
        };

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path).map_err(io_err)?;
        registry.track(&path);
        let guard = Self {
            path: path.clone(),
            registry: Arc::clone(registry),
        };
        // Windows PowerShell reads BOM-less scripts in the ANSI code page.
        file.write_all("\u{feff}".as_bytes())
            .and_then(|()| file.write_all(contents.as_bytes()))
            .and_then(|()| file.flush())
            .map_err(io_err)?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempScript {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove temp script");
            }
        }
        self.registry.untrack(&self.path);
    }
}
