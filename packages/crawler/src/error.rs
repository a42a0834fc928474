//! Crawl errors.

use thiserror::Error;

/// A failed call against the external API.
///
/// Cloneable so one failure can both end an iteration and be kept on the
/// run for the job's final status.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("credential rejected: {0}")]
    Credential(String),

    #[error("invalid response: {0}")]
    Decode(String),
}

impl QueryError {
    /// The credential the client was built with is no longer accepted.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, QueryError::Credential(_))
    }

    /// Worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            QueryError::Transport(_) => true,
            QueryError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Writing to the output sink failed.
#[derive(Debug, Clone, Error)]
#[error("sink error: {0}")]
pub struct SinkError(pub String);

impl From<storage::StorageError> for SinkError {
    fn from(e: storage::StorageError) -> Self {
        SinkError(e.to_string())
    }
}

/// Persisting a job's resume state failed.
#[derive(Debug, Clone, Error)]
#[error("checkpoint failed: {0}")]
pub struct CheckpointError(pub String);

/// Errors building crawl collaborators.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_failures() {
        assert!(QueryError::Transport("reset".into()).is_transient());
        assert!(
            QueryError::Status {
                status: 502,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !QueryError::Status {
                status: 404,
                message: String::new()
            }
            .is_transient()
        );
        assert!(QueryError::Credential("401".into()).is_credential_failure());
        assert!(!QueryError::Credential("401".into()).is_transient());
    }
}
