//! Unified error hierarchy for glycorun
//!
//! Only the IO-facing parts of the pipeline (providers and the signal cache)
//! return errors. The analytics builders never fail: too little data is
//! represented as absent values, not as an error.

use thiserror::Error;

/// Top-level error type for all glycorun operations
#[derive(Debug, Error)]
pub enum GlycoError {
    /// Upstream data provider errors
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Signal cache storage errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures talking to the workout or glucose services
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Service could not be reached
    #[error("{provider} unreachable: {reason}")]
    Unreachable { provider: String, reason: String },

    /// Requested resource does not exist upstream
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// Upstream returned data that could not be decoded
    #[error("Malformed response from {provider}: {reason}")]
    Malformed { provider: String, reason: String },
}

/// Signal cache storage errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed
    #[error("Cache storage failed in {tier}: {reason}")]
    Storage { tier: String, reason: String },

    /// A background cache task panicked or was cancelled
    #[error("Cache task failed: {reason}")]
    TaskJoin { reason: String },
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Storage {
            tier: "durable".to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for GlycoError {
    fn from(err: rusqlite::Error) -> Self {
        GlycoError::Cache(err.into())
    }
}

impl From<tokio::task::JoinError> for GlycoError {
    fn from(err: tokio::task::JoinError) -> Self {
        GlycoError::Cache(CacheError::TaskJoin {
            reason: err.to_string(),
        })
    }
}

/// Result type alias for glycorun operations
pub type Result<T> = std::result::Result<T, GlycoError>;

impl GlycoError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            GlycoError::Provider(ProviderError::Unreachable { .. }) => {
                "No data for this workout right now.".to_string()
            }
            GlycoError::Provider(ProviderError::NotFound { resource }) => {
                format!("No data for {}", resource)
            }
            GlycoError::Cache(CacheError::Storage { .. }) => {
                "Unable to read the signal cache. Please check your configuration.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_resource_named_in_message() {
        let err = GlycoError::Provider(ProviderError::NotFound {
            resource: "streams/123".to_string(),
        });
        assert_eq!(err.user_message(), "No data for streams/123");
    }

    #[test]
    fn test_transient_failures_read_as_no_data() {
        let err = GlycoError::Provider(ProviderError::Unreachable {
            provider: "intervals".to_string(),
            reason: "timeout".to_string(),
        });
        assert!(err.user_message().contains("No data"));
    }

    #[test]
    fn test_io_errors_fall_back_to_display() {
        let err: GlycoError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.user_message(), "IO error: disk full");
    }

    #[test]
    fn test_sqlite_errors_map_to_durable_tier() {
        let err: GlycoError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(
            err,
            GlycoError::Cache(CacheError::Storage { ref tier, .. }) if tier == "durable"
        ));
    }
}
