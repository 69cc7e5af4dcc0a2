use thiserror::Error;

/// Main error type for Peermatch
#[derive(Error, Debug)]
pub enum PeermatchError {
    /// Graph store (Neo4j) errors
    #[error("Graph store error: {0}")]
    GraphStore(#[from] neo4rs::Error),

    /// Transport-level HTTP errors (connect, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the vector index API
    #[error("Vector index API error {status}: {message}")]
    IndexApi { status: u16, message: String },

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph projection errors
    #[error("Projection error: {0}")]
    Projection(String),

    /// Embedding training errors
    #[error("Training error: {0}")]
    Training(String),

    /// Vector index errors not tied to a single HTTP response
    #[error("Vector index error: {0}")]
    Index(String),

    /// Person has no stored embedding
    #[error("No embedding for identifier: {0}")]
    NoEmbedding(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Operator-facing failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Store or index unreachable, or credentials rejected. Abort the run.
    Connectivity,
    /// A single record is malformed. Skip it and continue.
    Data,
    /// Request size, rate limit or creation conflict. The whole run may be retried.
    Capacity,
    /// Misconfiguration. Abort the run.
    Configuration,
}

impl PeermatchError {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PeermatchError::GraphStore(_) | PeermatchError::Http(_) | PeermatchError::Io(_) => {
                ErrorCategory::Connectivity
            }
            PeermatchError::IndexApi { status, .. } => match status {
                401 | 403 => ErrorCategory::Connectivity,
                400 | 404 | 422 => ErrorCategory::Data,
                _ => ErrorCategory::Capacity,
            },
            PeermatchError::Serialization(_)
            | PeermatchError::NoEmbedding(_)
            | PeermatchError::InvalidInput(_) => ErrorCategory::Data,
            PeermatchError::Config(_) => ErrorCategory::Configuration,
            PeermatchError::Projection(_)
            | PeermatchError::Training(_)
            | PeermatchError::Index(_) => ErrorCategory::Capacity,
        }
    }

    /// Whether a single request that failed with this error may be retried as-is.
    ///
    /// Rate limits, server errors and request timeouts qualify. Everything else
    /// would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            PeermatchError::IndexApi { status, .. } => *status == 429 || *status >= 500,
            PeermatchError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Convenient Result type using PeermatchError
pub type Result<T> = std::result::Result<T, PeermatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PeermatchError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));
    }

    #[test]
    fn test_no_embedding_display() {
        let err = PeermatchError::NoEmbedding("b@x.com".to_string());
        assert_eq!(err.to_string(), "No embedding for identifier: b@x.com");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PeermatchError = io_err.into();
        assert!(matches!(err, PeermatchError::Io(_)));
        assert_eq!(err.category(), ErrorCategory::Connectivity);
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PeermatchError = json_err.into();
        assert!(matches!(err, PeermatchError::Serialization(_)));
        assert_eq!(err.category(), ErrorCategory::Data);
    }

    #[test]
    fn test_index_api_retryable() {
        let rate_limited = PeermatchError::IndexApi { status: 429, message: String::new() };
        let unavailable = PeermatchError::IndexApi { status: 503, message: String::new() };
        let bad_request = PeermatchError::IndexApi { status: 400, message: String::new() };
        assert!(rate_limited.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_index_api_categories() {
        let unauthorized = PeermatchError::IndexApi { status: 401, message: String::new() };
        let too_large = PeermatchError::IndexApi { status: 413, message: String::new() };
        let conflict = PeermatchError::IndexApi { status: 409, message: String::new() };
        assert_eq!(unauthorized.category(), ErrorCategory::Connectivity);
        assert_eq!(too_large.category(), ErrorCategory::Capacity);
        assert_eq!(conflict.category(), ErrorCategory::Capacity);
    }

    #[test]
    fn test_config_not_retryable() {
        let err = PeermatchError::Config("dimension mismatch".to_string());
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}
