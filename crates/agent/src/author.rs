//! Unit authoring seam.
//!
//! When the planner proposes a new unit, the loop hands the description to
//! a `UnitAuthor`. Writing unit code is outside the agent itself; without
//! an author the proposal is reported back as the answer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::AuthorError;

/// A unit that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoredUnit {
    pub name: String,
    pub path: PathBuf,
}

#[async_trait]
pub trait UnitAuthor: Send + Sync {
    /// Writes a unit under `base_dir` fulfilling `description`.
    async fn author(
        &self,
        base_dir: &Path,
        request: &str,
        description: &str,
    ) -> Result<AuthoredUnit, AuthorError>;
}
