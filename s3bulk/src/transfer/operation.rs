//! Executing one transfer.
//!
//! Downloads stream into a temporary file next to the destination and are
//! renamed into place only once every byte has arrived, so a failed or
//! cancelled download never leaves a truncated file behind and re-running a
//! batch simply overwrites what is there.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use super::path::destination_path;
use super::progress::OperationProgress;
use super::request::{Direction, TransferOutcome, TransferRequest};
use crate::error::{TransferError, TransferResult};
use crate::key::ObjectKey;
use crate::store::{AsyncBlobStore, BlobStore};

/// Prefix of in-flight download files.
const TEMP_PREFIX: &str = ".s3bulk-";

/// Suffix of in-flight download files.
const TEMP_SUFFIX: &str = ".part";

/// Run `request` on the calling thread.
pub fn execute_blocking(
    store: &dyn BlobStore,
    request: TransferRequest,
    progress: &OperationProgress,
) -> TransferOutcome {
    let result = if progress.is_cancelled() {
        Err(cancelled(&request.key))
    } else {
        match request.direction {
            Direction::Download => download_blocking(store, &request, progress),
            Direction::Upload => upload_blocking(store, &request, progress),
        }
    };
    conclude(request, result, progress)
}

/// Run `request` as a future, stopping early on cancellation or when
/// `timeout` elapses.
pub async fn execute_async(
    store: &dyn AsyncBlobStore,
    request: TransferRequest,
    progress: &OperationProgress,
    timeout: Option<Duration>,
) -> TransferOutcome {
    let result = if progress.is_cancelled() {
        Err(cancelled(&request.key))
    } else {
        let work = async {
            match request.direction {
                Direction::Download => download_async(store, &request, progress).await,
                Direction::Upload => upload_async(store, &request, progress).await,
            }
        };
        let guarded = async {
            tokio::select! {
                biased;
                _ = progress.cancellation().cancelled() => Err(cancelled(&request.key)),
                result = work => result,
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .unwrap_or_else(|_| {
                    Err(TransferError::Timeout {
                        key: request.key.to_string(),
                        timeout: limit,
                    })
                }),
            None => guarded.await,
        }
    };
    conclude(request, result, progress)
}

fn conclude(
    request: TransferRequest,
    result: TransferResult<u64>,
    progress: &OperationProgress,
) -> TransferOutcome {
    match result {
        Ok(bytes) => {
            progress.finished(true);
            debug!(
                key = %request.key,
                direction = %request.direction,
                bytes,
                "Transfer complete"
            );
            TransferOutcome::succeeded(request, bytes)
        }
        Err(e) => {
            progress.finished(false);
            if e.is_cancelled() {
                warn!(key = %request.key, direction = %request.direction, "Transfer cancelled");
            } else {
                error!(
                    key = %request.key,
                    bucket = %request.bucket,
                    direction = %request.direction,
                    local_path = %request.local_path.display(),
                    error = %e,
                    "Transfer failed"
                );
            }
            TransferOutcome::failed(request, e)
        }
    }
}

fn download_blocking(
    store: &dyn BlobStore,
    request: &TransferRequest,
    progress: &OperationProgress,
) -> TransferResult<u64> {
    let (destination, parent) = prepare_destination(request)?;
    std::fs::create_dir_all(&parent).map_err(|e| TransferError::local_io(&parent, e))?;

    let meta = store.head(&request.bucket, &request.key)?;
    progress.started(meta.size);

    let mut temp = temp_file_in(&parent)?;
    let written = {
        let mut writer = BufWriter::new(temp.as_file_mut());
        let written = store.get_range(
            &request.bucket,
            &request.key,
            &mut writer,
            &|n| progress.advance(n),
        )?;
        writer
            .flush()
            .map_err(|e| TransferError::local_io(temp_path_hint(&parent), e))?;
        written
    };
    ensure_complete(&request.key, meta.size, written)?;

    temp.persist(&destination)
        .map_err(|e| TransferError::local_io(&destination, e.error))?;
    Ok(written)
}

async fn download_async(
    store: &dyn AsyncBlobStore,
    request: &TransferRequest,
    progress: &OperationProgress,
) -> TransferResult<u64> {
    let (destination, parent) = prepare_destination(request)?;
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| TransferError::local_io(&parent, e))?;

    let meta = store.head(&request.bucket, &request.key).await?;
    progress.started(meta.size);

    let (file, temp_path) = temp_file_in(&parent)?.into_parts();
    let mut writer = tokio::io::BufWriter::new(tokio::fs::File::from_std(file));
    let on_bytes = |n| progress.advance(n);
    let written = store
        .get_range(&request.bucket, &request.key, &mut writer, &on_bytes)
        .await?;
    writer
        .flush()
        .await
        .map_err(|e| TransferError::local_io(&*temp_path, e))?;
    drop(writer);
    ensure_complete(&request.key, meta.size, written)?;

    temp_path
        .persist(&destination)
        .map_err(|e| TransferError::local_io(&destination, e.error))?;
    Ok(written)
}

fn upload_blocking(
    store: &dyn BlobStore,
    request: &TransferRequest,
    progress: &OperationProgress,
) -> TransferResult<u64> {
    let source = &request.local_path;
    let metadata = std::fs::metadata(source).map_err(|e| TransferError::local_io(source, e))?;
    ensure_regular_file(source, &metadata)?;
    progress.started(metadata.len());

    let file = File::open(source).map_err(|e| TransferError::local_io(source, e))?;
    let mut reader = BufReader::new(file);
    let sent = store.put_range(
        &request.bucket,
        &request.key,
        &mut reader,
        metadata.len(),
        &|n| progress.advance(n),
    )?;
    ensure_complete(&request.key, metadata.len(), sent)?;
    Ok(sent)
}

async fn upload_async(
    store: &dyn AsyncBlobStore,
    request: &TransferRequest,
    progress: &OperationProgress,
) -> TransferResult<u64> {
    let source = &request.local_path;
    let metadata = tokio::fs::metadata(source)
        .await
        .map_err(|e| TransferError::local_io(source, e))?;
    ensure_regular_file(source, &metadata)?;
    progress.started(metadata.len());

    let file = tokio::fs::File::open(source)
        .await
        .map_err(|e| TransferError::local_io(source, e))?;
    let mut reader = tokio::io::BufReader::new(file);
    let on_bytes = |n| progress.advance(n);
    let sent = store
        .put_range(
            &request.bucket,
            &request.key,
            &mut reader,
            metadata.len(),
            &on_bytes,
        )
        .await?;
    ensure_complete(&request.key, metadata.len(), sent)?;
    Ok(sent)
}

/// Destination file and the directory it lives in.
fn prepare_destination(request: &TransferRequest) -> TransferResult<(PathBuf, PathBuf)> {
    let destination = destination_path(&request.local_path, &request.key, request.keep_structure)?;
    let parent = destination
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| request.local_path.clone());
    Ok((destination, parent))
}

fn temp_file_in(dir: &Path) -> TransferResult<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| TransferError::local_io(dir, e))
}

fn temp_path_hint(dir: &Path) -> PathBuf {
    dir.join(format!("{}*{}", TEMP_PREFIX, TEMP_SUFFIX))
}

fn ensure_regular_file(path: &Path, metadata: &std::fs::Metadata) -> TransferResult<()> {
    if metadata.is_file() {
        Ok(())
    } else {
        Err(TransferError::local_io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ))
    }
}

fn ensure_complete(key: &ObjectKey, expected: u64, written: u64) -> TransferResult<()> {
    if written < expected {
        return Err(TransferError::PartialWrite {
            key: key.to_string(),
            expected,
            written,
        });
    }
    Ok(())
}

fn cancelled(key: &ObjectKey) -> TransferError {
    TransferError::Cancelled {
        key: key.to_string(),
    }
}
