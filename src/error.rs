//! Error types for the wellspring pipeline

use thiserror::Error;

/// Errors that can occur while ingesting, persisting, or scoring data.
///
/// The distinction between [`PipelineError::TransientUnavailable`] and
/// [`PipelineError::FetchError`] is load-bearing: transient inaccessibility
/// (e.g. the underlying health store is locked) is treated as "nothing to
/// report yet" and never counts against a retry budget.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Health data temporarily inaccessible: {0}")]
    TransientUnavailable(String),

    #[error("Fetch timed out after {0:?}")]
    FetchTimeout(std::time::Duration),

    #[error("Fetch failed: {0}")]
    FetchError(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported schema version {found}, expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Missing required field: {0}")]
    MissingField(String),
}

impl PipelineError {
    /// True when the error means the data store was momentarily unreadable
    /// rather than the fetch itself failing.
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::TransientUnavailable(_))
    }
}
