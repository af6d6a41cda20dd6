//! Errors raised inside the planning loop.

use std::path::PathBuf;

use thiserror::Error;

/// Model output that could not be read as a decision.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("empty decision")]
    Empty,

    #[error("no json object found")]
    NoObject,

    #[error("invalid decision json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Problems attaching files to the environment context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("cannot read file {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("{} is a directory, not a file", .0.display())]
    IsDirectory(PathBuf),

    #[error("file {} too large ({size} bytes, max {max})", path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },
}

/// Failure reported by a unit author.
#[derive(Debug, Error)]
pub enum AuthorError {
    #[error("unit authoring was declined")]
    Declined,

    #[error("unit authoring failed: {0}")]
    Failed(String),
}
