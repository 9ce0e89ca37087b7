//! Error types for claude-smi
//!
//! All errors derive from `thiserror` for convenient propagation with `?`.
//! Transient failures (network, credential store) are surfaced to the engine
//! as values and never abort the process; only configuration and flag
//! validation errors are fatal at startup.

use thiserror::Error;

/// Main error type for claude-smi operations
#[derive(Error, Debug)]
pub enum SmiError {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid date filter value
    #[error("invalid date (use YYYY-MM-DD): {0}")]
    InvalidDate(String),

    /// Unknown or malformed IANA timezone
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// OAuth credential lookup failure
    #[error("credential error: {0}")]
    Credential(String),

    /// Remote API returned an unusable response
    #[error("api error: {0}")]
    Api(String),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, SmiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SmiError::InvalidDate("2024-13-99".to_string());
        assert_eq!(err.to_string(), "invalid date (use YYYY-MM-DD): 2024-13-99");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SmiError = io_error.into();
        assert!(matches!(err, SmiError::Io(_)));
    }
}
