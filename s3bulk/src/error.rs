//! Error types for transfers and configuration.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for store and transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors that can occur while talking to the object store or moving bytes.
///
/// These never escape a bulk call: each one is logged and turned into a
/// failed outcome for the transfer that produced it.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Transport or authentication failure reaching the object store.
    #[error("object store unavailable during {operation}: {reason}")]
    StoreUnavailable {
        operation: &'static str,
        reason: String,
    },

    /// The key does not exist in the bucket.
    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Local directory creation, open, write or rename failed.
    #[error("local I/O error at {}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to a transfer stream failed mid-flight.
    #[error("stream error while transferring {key}: {source}")]
    Stream {
        key: String,
        #[source]
        source: io::Error,
    },

    /// The stream ended before the expected number of bytes arrived.
    #[error("partial transfer of {key}: expected {expected} bytes, got {written}")]
    PartialWrite {
        key: String,
        expected: u64,
        written: u64,
    },

    /// The batch was cancelled before this transfer finished.
    #[error("transfer of {key} was cancelled")]
    Cancelled { key: String },

    /// The transfer exceeded its time budget.
    #[error("transfer of {key} timed out after {timeout:?}")]
    Timeout { key: String, timeout: Duration },

    /// The worker running this transfer panicked.
    #[error("worker transferring {key} panicked")]
    WorkerPanicked { key: String },

    /// A key or local file name could not be turned into a transfer.
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl TransferError {
    /// Shorthand for a transport failure.
    pub fn unavailable(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            operation,
            reason: reason.into(),
        }
    }

    /// Shorthand for a local filesystem failure.
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the failure came from cancellation rather than the
    /// store or the filesystem.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors detected before any transfer starts.
///
/// These are the only errors a bulk call returns to its caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting was not provided.
    #[error("missing required setting: {field}")]
    Missing { field: &'static str },

    /// A setting was provided but could not be used.
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    /// The configuration file exists but could not be read or parsed.
    #[error("failed to read config {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = TransferError::ObjectNotFound {
            bucket: "b".to_string(),
            key: "docs/missing.pdf".to_string(),
        };
        assert_eq!(err.to_string(), "object not found: b/docs/missing.pdf");
    }

    #[test]
    fn test_local_io_keeps_source() {
        use std::error::Error;

        let err = TransferError::local_io(
            "/tmp/out/a.pdf",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/out/a.pdf"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_is_cancelled() {
        let err = TransferError::Cancelled {
            key: "a".to_string(),
        };
        assert!(err.is_cancelled());
        assert!(!TransferError::unavailable("head", "refused").is_cancelled());
    }

    #[test]
    fn test_timeout_display_keeps_sub_second_precision() {
        let err = TransferError::Timeout {
            key: "docs/a.pdf".to_string(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "transfer of docs/a.pdf timed out after 50ms");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Missing { field: "bucket" };
        assert_eq!(err.to_string(), "missing required setting: bucket");

        let err = ConfigError::invalid("workers", "not a number");
        assert!(err.to_string().contains("workers"));
    }
}
