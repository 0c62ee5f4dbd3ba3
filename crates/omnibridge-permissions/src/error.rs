//! Error types for the permissions crate

use thiserror::Error;

/// Result type for permission operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during permission resolution
#[derive(Debug, Error)]
pub enum Error {
    #[error("Profile store error: {0}")]
    StoreError(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlobPattern(String),

    #[error("Malformed permission entry: {0}")]
    MalformedEntry(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::StoreError("unreachable".to_string());
        assert!(err.to_string().contains("unreachable"));
    }
}
