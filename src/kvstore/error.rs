//! Key-value adapter errors

use crate::client::ServiceError;
use std::time::Duration;

/// Error returned by key-value operations
#[derive(Debug)]
pub enum KvError {
    /// Compression name not in the registry
    UnknownCompression {
        name: String,
        known: Vec<&'static str>,
    },
    /// Per-record TTL differing from the configured default
    UnsupportedTtl {
        requested: Duration,
        default: Option<Duration>,
    },
    /// Encoded value over the service cell limit
    ValueTooLarge { size: usize, max: usize },
    /// Compressing a value failed
    Compression(std::io::Error),
    /// Remote service call failed
    Service(ServiceError),
    /// Some rows of a bulk delete failed
    BatchDelete(BatchDeleteError),
    /// A blocking task could not be joined
    Background(String),
}

impl std::fmt::Display for KvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KvError::UnknownCompression { name, known } => write!(
                f,
                "\"compression\" must be one of {:?}, got {:?}",
                known, name
            ),
            KvError::UnsupportedTtl { requested, default } => write!(
                f,
                "Per-record TTL is not supported: requested {:?}, default {:?}",
                requested, default
            ),
            KvError::ValueTooLarge { size, max } => write!(
                f,
                "Value size ({}) is larger than the limit ({})",
                size, max
            ),
            KvError::Compression(e) => write!(f, "Compression error: {}", e),
            KvError::Service(e) => write!(f, "Service error: {}", e),
            KvError::BatchDelete(e) => write!(f, "{}", e),
            KvError::Background(msg) => write!(f, "Background task failed: {}", msg),
        }
    }
}

impl std::error::Error for KvError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KvError::Compression(e) => Some(e),
            KvError::Service(e) => Some(e),
            KvError::BatchDelete(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ServiceError> for KvError {
    fn from(e: ServiceError) -> Self {
        KvError::Service(e)
    }
}

/// Code recorded for a key the service left out of a batch response
pub const MISSING_RESULT: &str = "MissingRowResult";

/// A row that could not be deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub key: String,
    pub code: String,
    pub message: String,
}

impl RowFailure {
    pub fn new(key: &str, error: &ServiceError) -> Self {
        RowFailure {
            key: key.to_string(),
            code: error.code.clone(),
            message: error.message.clone(),
        }
    }

    /// Failure of a key the batch response held no result for
    pub fn missing_result(key: &str) -> Self {
        RowFailure {
            key: key.to_string(),
            code: MISSING_RESULT.to_string(),
            message: "No result returned for this row".to_string(),
        }
    }
}

/// Every failed row of a bulk delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDeleteError {
    pub failures: Vec<RowFailure>,
}

impl BatchDeleteError {
    pub fn failed_keys(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.key.as_str()).collect()
    }
}

impl std::fmt::Display for BatchDeleteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to delete {} rows:", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                " ({}: ErrorCode: {}, ErrorMessage: {})",
                failure.key, failure.code, failure.message
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchDeleteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_delete_display_lists_every_key() {
        let err = BatchDeleteError {
            failures: vec![
                RowFailure {
                    key: "a".to_string(),
                    code: "OTSTimeout".to_string(),
                    message: "timed out".to_string(),
                },
                RowFailure {
                    key: "b".to_string(),
                    code: "OTSQuotaExhausted".to_string(),
                    message: "too fast".to_string(),
                },
            ],
        };
        let text = KvError::BatchDelete(err.clone()).to_string();
        assert!(text.starts_with("Failed to delete 2 rows:"));
        assert!(text.contains("a: ErrorCode: OTSTimeout"));
        assert!(text.contains("b: ErrorCode: OTSQuotaExhausted"));
        assert_eq!(err.failed_keys(), vec!["a", "b"]);
    }

    #[test]
    fn test_service_error_conversion() {
        let err: KvError = ServiceError::new("OTSServerBusy", "busy").into();
        assert!(matches!(err, KvError::Service(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
