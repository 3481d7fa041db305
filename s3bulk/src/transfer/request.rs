//! Transfer request and outcome types.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::TransferError;
use crate::key::ObjectKey;

/// Which way bytes move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// One unit of work.
///
/// For downloads `local_path` is the base directory and the destination file
/// is derived from the key. For uploads `local_path` is the source file and
/// `key` is the full destination key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub bucket: String,
    pub key: ObjectKey,
    pub local_path: PathBuf,
    pub direction: Direction,
    pub keep_structure: bool,
}

impl TransferRequest {
    /// Download `key` into the directory `base`.
    pub fn download(
        bucket: impl Into<String>,
        key: ObjectKey,
        base: impl Into<PathBuf>,
        keep_structure: bool,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key,
            local_path: base.into(),
            direction: Direction::Download,
            keep_structure,
        }
    }

    /// Upload the file `source` to `key`.
    pub fn upload(bucket: impl Into<String>, key: ObjectKey, source: impl Into<PathBuf>) -> Self {
        Self {
            bucket: bucket.into(),
            key,
            local_path: source.into(),
            direction: Direction::Upload,
            keep_structure: false,
        }
    }
}

/// Result of executing one request.
#[derive(Debug)]
pub struct TransferOutcome {
    pub request: TransferRequest,
    pub success: bool,
    pub error: Option<TransferError>,
    pub bytes_transferred: u64,
}

impl TransferOutcome {
    pub fn succeeded(request: TransferRequest, bytes_transferred: u64) -> Self {
        Self {
            request,
            success: true,
            error: None,
            bytes_transferred,
        }
    }

    pub fn failed(request: TransferRequest, error: TransferError) -> Self {
        Self {
            request,
            success: false,
            error: Some(error),
            bytes_transferred: 0,
        }
    }
}
