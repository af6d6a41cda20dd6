//! Error types for the Stepwise domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `Error` wraps them all.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// The top-level error type for all Stepwise operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Execution errors ---
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    // --- Catalog errors ---
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider (status 429): {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("invalid provider {0:?} (use auto|ollama|openai)")]
    InvalidProvider(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    #[error("Invalid response from provider: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Transient failures worth another attempt: connection problems,
    /// rate limiting and server-side (5xx) errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unit {unit} requires mandatory parameters: {} (include them in unit_args)", missing.join(", "))]
    MissingParameters { unit: String, missing: Vec<String> },

    #[error("no PowerShell interpreter found (tried {0})")]
    InterpreterNotFound(String),

    #[error("{target} timed out after {}s", after.as_secs())]
    Timeout {
        target: String,
        after: Duration,
        output: String,
    },

    #[error("{target} exited with status {code}")]
    NonZeroExit {
        target: String,
        code: i32,
        output: String,
    },

    #[error("I/O error at {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
}

impl ExecError {
    /// Output captured before the failure, if any.
    pub fn output(&self) -> &str {
        match self {
            Self::Timeout { output, .. } | Self::NonZeroExit { output, .. } => output,
            _ => "",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("unit not found: {0}")]
    NotFound(String),

    #[error("cannot read {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 400,
            message: "bad request".into(),
        });
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("bad request"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Network("refused".into()).is_retryable());
        assert!(ProviderError::RateLimited("slow down".into()).is_retryable());
        assert!(
            ProviderError::ApiError { status_code: 503, message: String::new() }.is_retryable()
        );
        assert!(
            !ProviderError::ApiError { status_code: 404, message: String::new() }.is_retryable()
        );
        assert!(!ProviderError::NotConfigured("missing OpenAI API key".into()).is_retryable());
    }

    #[test]
    fn missing_parameters_names_each_parameter() {
        let err = ExecError::MissingParameters {
            unit: "Set-Row".into(),
            missing: vec!["Value".into(), "Key".into()],
        };
        let text = err.to_string();
        assert!(text.contains("Set-Row"));
        assert!(text.contains("Value, Key"));
    }

    #[test]
    fn timeout_keeps_partial_output() {
        let err = ExecError::Timeout {
            target: "Sync-Repo".into(),
            after: Duration::from_secs(300),
            output: "step 1 done".into(),
        };
        assert!(err.is_timeout());
        assert_eq!(err.output(), "step 1 done");
        assert!(err.to_string().contains("300s"));
    }

    #[test]
    fn invalid_provider_message() {
        let err = ProviderError::InvalidProvider("claude".into());
        assert_eq!(err.to_string(), "invalid provider \"claude\" (use auto|ollama|openai)");
    }
}
