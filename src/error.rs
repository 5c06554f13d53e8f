//! Error types for pipeline operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while running the fetch-and-transcode pipeline.
///
/// Entry-scoped errors (`TransientFetch`, `InvalidAsset`, `Transcode`, `Io`)
/// are recorded against the entry's work record and never abort a run.
/// `Persistence` means the checkpoint store itself is unusable and is fatal
/// to the run. `Source` is fatal to the affected group only.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// I/O error during file operations.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// Recoverable network failure: timeout, connection reset, non-success status.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// The fetched body is not a usable asset (too small, not an image).
    /// Retrying will not change the origin's response.
    #[error("invalid asset: {0}")]
    InvalidAsset(String),

    /// Decode or encode failure while normalizing an asset.
    #[error("transcode failed: {0}")]
    Transcode(String),

    /// The checkpoint store cannot be read or written.
    #[error("checkpoint persistence failed: {0}")]
    Persistence(String),

    /// The catalog source could not produce entries for a group.
    #[error("catalog source failed: {0}")]
    Source(String),
}

impl PipelineError {
    /// Whether another fetch attempt could change the outcome.
    ///
    /// Permanent errors are recorded as failed immediately instead of
    /// consuming the remaining retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidAsset(_) | PipelineError::Transcode(_)
        )
    }

    /// Short reason code used in work records and run reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            PipelineError::Io(_) => "io",
            PipelineError::SerdeJson(_) => "serde",
            PipelineError::TransientFetch(_) => "transient_fetch",
            PipelineError::InvalidAsset(_) => "invalid_asset",
            PipelineError::Transcode(_) => "transcode",
            PipelineError::Persistence(_) => "persistence",
            PipelineError::Source(_) => "source",
        }
    }

    /// Reason string persisted in a failed entry's work record.
    pub fn failure_reason(&self) -> String {
        format!("[{}] {}", self.reason_code(), self)
    }
}

/// Maps a reqwest transport error onto the pipeline taxonomy.
///
/// All transport-level failures (timeouts, resets, DNS) are transient:
/// the next attempt may succeed.
pub(crate) fn classify_transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::TransientFetch(format!("request timed out: {}", err))
    } else if err.is_connect() {
        PipelineError::TransientFetch(format!("connection failed: {}", err))
    } else {
        PipelineError::TransientFetch(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_asset_is_permanent() {
        assert!(PipelineError::InvalidAsset("too small".into()).is_permanent());
        assert!(PipelineError::Transcode("bad header".into()).is_permanent());
        assert!(!PipelineError::TransientFetch("HTTP 500".into()).is_permanent());
    }

    #[test]
    fn failure_reason_carries_code() {
        let reason = PipelineError::InvalidAsset("19 bytes".into()).failure_reason();
        assert!(reason.starts_with("[invalid_asset]"));
    }
}
