//! Custom error types for ragline

use thiserror::Error;

/// Main error type for ragline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding dimension mismatch for {doc_source} chunk {chunk_index}: expected {expected}, got {actual}")]
    DimensionMismatch {
        doc_source: String,
        chunk_index: i64,
        expected: usize,
        actual: usize,
    },

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Resource busy: {0}")]
    Busy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a failed processing attempt may be scheduled again.
    ///
    /// Provider failures (including timeouts) and transient storage or
    /// contention errors are retryable; configuration, validation, and
    /// dimension faults are permanent and retrying them would only repeat
    /// the same failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provider(_) | Error::Storage(_) | Error::Busy(_) | Error::Http(_) | Error::Io(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for ragline
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Provider("timeout".to_string()).is_retryable());
        assert!(Error::Storage(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(Error::Busy("claim conflict".to_string()).is_retryable());

        assert!(!Error::Config("unknown provider".to_string()).is_retryable());
        assert!(!Error::Validation("empty document".to_string()).is_retryable());
        assert!(!Error::DimensionMismatch {
            doc_source: "doc.txt".to_string(),
            chunk_index: 0,
            expected: 1536,
            actual: 3,
        }
        .is_retryable());
        assert!(!Error::NotFound("task".to_string()).is_retryable());
    }

    #[test]
    fn test_dimension_mismatch_names_offender() {
        let err = Error::DimensionMismatch {
            doc_source: "report.pdf".to_string(),
            chunk_index: 7,
            expected: 1536,
            actual: 768,
        };
        let msg = err.to_string();
        assert!(msg.contains("report.pdf"));
        assert!(msg.contains('7'));
        assert!(msg.contains("1536"));
    }
}
