//! Error types for provider integration

use thiserror::Error;

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to providers
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("{display_name} is unavailable after {attempts} attempts")]
    ProviderUnavailable { display_name: String, attempts: u32 },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout after {0}s")]
    TimeoutError(u64),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Store error: {0}")]
    StoreError(String),
}

/// Message fragments that mark a failure as connection-class.
///
/// Remote errors often arrive as opaque strings; these substrings cover the
/// transport failures worth retrying against a fresh connection.
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "connect timeout",
    "timed out",
    "network unreachable",
    "host unreachable",
    "no route to host",
    "broken pipe",
    "eof",
    "stream",
    "transport",
];

impl Error {
    /// True when the failure is connection-class and worth a reconnect-retry.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::ConnectionError(_) | Error::TimeoutError(_) => true,
            Error::IoError(_) => true,
            Error::ProviderError(msg) | Error::StoreError(msg) => {
                let lowered = msg.to_lowercase();
                CONNECTION_ERROR_MARKERS.iter().any(|m| lowered.contains(m))
            }
            _ => false,
        }
    }

    /// Gets the error type for logging
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::ProviderError(_) => "ProviderError",
            Error::ProviderNotFound(_) => "ProviderNotFound",
            Error::ToolNotFound(_) => "ToolNotFound",
            Error::ProviderUnavailable { .. } => "ProviderUnavailable",
            Error::ConnectionError(_) => "ConnectionError",
            Error::TimeoutError(_) => "TimeoutError",
            Error::ConfigError(_) => "ConfigError",
            Error::ValidationError(_) => "ValidationError",
            Error::SerializationError(_) => "SerializationError",
            Error::IoError(_) => "IoError",
            Error::StoreError(_) => "StoreError",
        }
    }
}
