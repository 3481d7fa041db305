//! Bulk transfer orchestration.
//!
//! [`BulkTransferManager`] turns a list of keys or local paths into one
//! request per item, runs them under the configured [`ExecutionStrategy`],
//! and folds the outcomes into a [`TransferBatchResult`]. A single failing
//! transfer never stops the others, and every input is counted exactly once.
//!
//! Only configuration problems (empty bucket, zero workers, a base path that
//! is not a directory) are returned as errors, and those are detected before
//! anything is transferred.

mod config;
mod strategy;
mod tally;

pub use config::{default_workers, ManagerConfig, FALLBACK_WORKERS};
pub use strategy::ExecutionStrategy;
pub use tally::{FailedTransfer, TransferBatchResult};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Span};

use crate::error::{ConfigError, TransferError};
use crate::key::ObjectKey;
use crate::store::{AsyncBlobStore, BlobStore};
use crate::transfer::{NoopProgress, ProgressSink, TransferRequest};
use strategy::{run_cooperative, run_hybrid, run_pooled, BatchContext};
use tally::BatchTally;

/// Runs batches of transfers against one shared store.
pub struct BulkTransferManager<S> {
    store: Arc<S>,
    config: ManagerConfig,
    span: Span,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl<S> BulkTransferManager<S>
where
    S: BlobStore + AsyncBlobStore + 'static,
{
    /// Create a manager with no progress reporting and its own cancellation token.
    pub fn new(store: Arc<S>, config: ManagerConfig) -> Self {
        Self {
            store,
            config,
            span: info_span!("bulk_transfer"),
            progress: Arc::new(NoopProgress),
            cancel: CancellationToken::new(),
        }
    }

    /// Log inside `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Send progress events to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Stop transfers when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Token that cancels every transfer this manager runs.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    /// Keys under `prefix`, optionally filtered by extension.
    ///
    /// Store failures are logged and yield an empty list.
    ///
    /// Blocks the calling thread. Over [`S3Store`](crate::store::S3Store) call
    /// it from a non-runtime thread or from `spawn_blocking`, never directly
    /// from async code.
    pub fn list(&self, bucket: &str, prefix: &str, extension: Option<&str>) -> Vec<ObjectKey> {
        match BlobStore::list(&*self.store, bucket, prefix, extension) {
            Ok(keys) => keys,
            Err(e) => {
                self.log_list_failure(bucket, prefix, &e);
                Vec::new()
            }
        }
    }

    /// Async form of [`list`](Self::list).
    pub async fn list_async(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> Vec<ObjectKey> {
        match AsyncBlobStore::list(&*self.store, bucket, prefix, extension).await {
            Ok(keys) => keys,
            Err(e) => {
                self.log_list_failure(bucket, prefix, &e);
                Vec::new()
            }
        }
    }

    fn log_list_failure(&self, bucket: &str, prefix: &str, e: &TransferError) {
        warn!(parent: &self.span, bucket, prefix, error = %e, "Listing failed, treating as empty");
    }

    // ------------------------------------------------------------------
    // Blocking entry points (pooled workers)
    // ------------------------------------------------------------------

    /// Download `keys` into `local_base`.
    ///
    /// With `keep_structure` the key's folders are recreated under
    /// `local_base`; otherwise every file lands directly in it.
    ///
    /// Blocks the calling thread. Over [`S3Store`](crate::store::S3Store) call
    /// it from a non-runtime thread or from `spawn_blocking`, never directly
    /// from async code.
    pub fn download_batch<K: AsRef<str>>(
        &self,
        bucket: &str,
        keys: &[K],
        local_base: impl AsRef<Path>,
        keep_structure: bool,
    ) -> Result<TransferBatchResult, ConfigError> {
        let local_base = local_base.as_ref();
        self.validate(bucket)?;
        validate_base_dir(local_base)?;

        let mut tally = BatchTally::new(keys.len(), Arc::clone(&self.progress));
        let requests = self.plan_downloads(bucket, keys, local_base, keep_structure, &mut tally);
        tally.begin();
        run_pooled(&self.context(), requests, &mut tally);

        Ok(self.summarize("Download", &local_base.display().to_string(), tally))
    }

    /// Upload each file in `local_paths` to `base_key/<file name>`.
    ///
    /// Blocks the calling thread. Over [`S3Store`](crate::store::S3Store) call
    /// it from a non-runtime thread or from `spawn_blocking`, never directly
    /// from async code.
    pub fn upload_batch<P: AsRef<Path>>(
        &self,
        bucket: &str,
        base_key: &str,
        local_paths: &[P],
    ) -> Result<TransferBatchResult, ConfigError> {
        self.validate(bucket)?;

        let mut tally = BatchTally::new(local_paths.len(), Arc::clone(&self.progress));
        let requests = self.plan_uploads(bucket, base_key, local_paths, &mut tally);
        tally.begin();
        run_pooled(&self.context(), requests, &mut tally);

        Ok(self.summarize("Upload", &destination_label(bucket, base_key), tally))
    }

    /// Upload every regular file below `dir`, flattened under `base_key`.
    ///
    /// Blocks the calling thread. Over [`S3Store`](crate::store::S3Store) call
    /// it from a non-runtime thread or from `spawn_blocking`, never directly
    /// from async code.
    pub fn upload_dir(
        &self,
        bucket: &str,
        base_key: &str,
        dir: impl AsRef<Path>,
    ) -> Result<TransferBatchResult, ConfigError> {
        let files = collect_files(dir.as_ref())?;
        self.upload_batch(bucket, base_key, &files)
    }

    /// Download every file-like key under each prefix, keeping structure.
    ///
    /// Blocks the calling thread. Over [`S3Store`](crate::store::S3Store) call
    /// it from a non-runtime thread or from `spawn_blocking`, never directly
    /// from async code.
    pub fn download_prefixes<P: AsRef<str>>(
        &self,
        bucket: &str,
        prefixes: &[P],
        local_base: impl AsRef<Path>,
    ) -> Result<TransferBatchResult, ConfigError> {
        self.validate(bucket)?;
        let keys = file_keys(
            prefixes
                .iter()
                .flat_map(|prefix| self.list(bucket, prefix.as_ref(), None)),
        );
        self.download_batch(bucket, &keys, local_base, true)
    }

    // ------------------------------------------------------------------
    // Async entry points (configured strategy)
    // ------------------------------------------------------------------

    /// Async form of [`download_batch`](Self::download_batch), run with the
    /// configured strategy.
    pub async fn download_batch_async<K: AsRef<str>>(
        &self,
        bucket: &str,
        keys: &[K],
        local_base: impl AsRef<Path>,
        keep_structure: bool,
    ) -> Result<TransferBatchResult, ConfigError> {
        let local_base = local_base.as_ref();
        self.validate(bucket)?;
        validate_base_dir(local_base)?;

        let mut tally = BatchTally::new(keys.len(), Arc::clone(&self.progress));
        let requests = self.plan_downloads(bucket, keys, local_base, keep_structure, &mut tally);
        tally.begin();
        let tally = self.dispatch(requests, tally).await;

        Ok(self.summarize("Download", &local_base.display().to_string(), tally))
    }

    /// Async form of [`upload_batch`](Self::upload_batch).
    pub async fn upload_batch_async<P: AsRef<Path>>(
        &self,
        bucket: &str,
        base_key: &str,
        local_paths: &[P],
    ) -> Result<TransferBatchResult, ConfigError> {
        self.validate(bucket)?;

        let mut tally = BatchTally::new(local_paths.len(), Arc::clone(&self.progress));
        let requests = self.plan_uploads(bucket, base_key, local_paths, &mut tally);
        tally.begin();
        let tally = self.dispatch(requests, tally).await;

        Ok(self.summarize("Upload", &destination_label(bucket, base_key), tally))
    }

    /// Async form of [`upload_dir`](Self::upload_dir).
    pub async fn upload_dir_async(
        &self,
        bucket: &str,
        base_key: &str,
        dir: impl AsRef<Path>,
    ) -> Result<TransferBatchResult, ConfigError> {
        let files = collect_files(dir.as_ref())?;
        self.upload_batch_async(bucket, base_key, &files).await
    }

    /// Async form of [`download_prefixes`](Self::download_prefixes).
    pub async fn download_prefixes_async<P: AsRef<str>>(
        &self,
        bucket: &str,
        prefixes: &[P],
        local_base: impl AsRef<Path>,
    ) -> Result<TransferBatchResult, ConfigError> {
        self.validate(bucket)?;
        let mut listed = Vec::new();
        for prefix in prefixes {
            listed.extend(self.list_async(bucket, prefix.as_ref(), None).await);
        }
        let keys = file_keys(listed);
        self.download_batch_async(bucket, &keys, local_base, true)
            .await
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validate(&self, bucket: &str) -> Result<(), ConfigError> {
        if bucket.trim().is_empty() {
            return Err(ConfigError::Missing { field: "bucket" });
        }
        self.config.validate()
    }

    fn context(&self) -> BatchContext<S> {
        BatchContext {
            store: Arc::clone(&self.store),
            sink: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
            workers: self.config.workers,
            timeout: self.config.timeout,
            span: self.span.clone(),
        }
    }

    async fn dispatch(&self, requests: Vec<TransferRequest>, mut tally: BatchTally) -> BatchTally {
        let ctx = self.context();
        info!(
            parent: &self.span,
            strategy = %self.config.strategy,
            workers = self.config.workers_for(requests.len()),
            requests = requests.len(),
            "Starting batch"
        );

        match self.config.strategy {
            ExecutionStrategy::Cooperative => {
                run_cooperative(&ctx, requests, &mut tally).await;
                tally
            }
            ExecutionStrategy::Hybrid => {
                run_hybrid(&ctx, requests, &mut tally).await;
                tally
            }
            ExecutionStrategy::Pooled => {
                let fallback = requests.clone();
                let snapshot = tally.clone();
                let pooled = tokio::task::spawn_blocking(move || {
                    run_pooled(&ctx, requests, &mut tally);
                    tally
                })
                .await;

                match pooled {
                    Ok(tally) => tally,
                    Err(e) => {
                        // The pool's tally is lost; count every dispatched request as failed.
                        error!(parent: &self.span, error = %e, "Worker pool failed");
                        let mut tally = snapshot;
                        for request in fallback {
                            let key = request.key.to_string();
                            tally.record_error(request, TransferError::WorkerPanicked { key });
                        }
                        tally
                    }
                }
            }
        }
    }

    /// One request per valid key; invalid keys are counted as failures.
    fn plan_downloads<K: AsRef<str>>(
        &self,
        bucket: &str,
        keys: &[K],
        local_base: &Path,
        keep_structure: bool,
        tally: &mut BatchTally,
    ) -> Vec<TransferRequest> {
        let mut requests = Vec::with_capacity(keys.len());
        for raw in keys {
            match ObjectKey::new(raw.as_ref()) {
                Ok(key) => requests.push(TransferRequest::download(
                    bucket,
                    key,
                    local_base,
                    keep_structure,
                )),
                Err(e) => {
                    error!(parent: &self.span, key = raw.as_ref(), error = %e, "Skipping invalid key");
                    tally.reject(raw.as_ref(), local_base.to_path_buf(), &e);
                }
            }
        }
        requests
    }

    /// One request per file; paths without a usable file name are counted as failures.
    fn plan_uploads<P: AsRef<Path>>(
        &self,
        bucket: &str,
        base_key: &str,
        local_paths: &[P],
        tally: &mut BatchTally,
    ) -> Vec<TransferRequest> {
        let mut requests = Vec::with_capacity(local_paths.len());
        for path in local_paths {
            let path = path.as_ref();
            let key = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| {
                    TransferError::InvalidKey(format!("{} has no usable file name", path.display()))
                })
                .and_then(|name| ObjectKey::join(base_key, name));

            match key {
                Ok(key) => requests.push(TransferRequest::upload(bucket, key, path)),
                Err(e) => {
                    error!(parent: &self.span, path = %path.display(), error = %e, "Skipping invalid upload path");
                    tally.reject(base_key, path.to_path_buf(), &e);
                }
            }
        }
        requests
    }

    fn summarize(&self, action: &str, destination: &str, tally: BatchTally) -> TransferBatchResult {
        let result = tally.finish();
        info!(
            parent: &self.span,
            succeeded = result.success_count,
            failed = result.failure_count,
            bytes = result.bytes_transferred,
            destination,
            "{} batch finished",
            action
        );
        result
    }
}

fn destination_label(bucket: &str, base_key: &str) -> String {
    format!("{}/{}", bucket, base_key.trim_start_matches('/'))
}

/// Reject a base path that exists but is not a directory.
fn validate_base_dir(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Missing {
            field: "local_base_path",
        });
    }
    if path.exists() && !path.is_dir() {
        return Err(ConfigError::invalid(
            "local_base_path",
            format!("{} is not a directory", path.display()),
        ));
    }
    Ok(())
}

/// Regular files anywhere below `dir`, sorted.
///
/// Fails with a [`ConfigError`] when `dir` is not a readable directory.
pub fn collect_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::invalid(
            "dir",
            format!("{} is not a directory", dir.display()),
        ));
    }
    let root = dir.to_str().ok_or_else(|| {
        ConfigError::invalid("dir", format!("{} is not valid UTF-8", dir.display()))
    })?;
    let pattern = format!("{}/**/*", glob::Pattern::escape(root.trim_end_matches('/')));
    let entries = glob::glob(&pattern).map_err(|e| ConfigError::invalid("dir", e.to_string()))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unreadable path"),
        }
    }
    files.sort();
    Ok(files)
}

/// Keys whose last segment looks like a file, deduplicated and sorted.
fn file_keys(keys: impl IntoIterator<Item = ObjectKey>) -> Vec<ObjectKey> {
    keys.into_iter()
        .filter(ObjectKey::looks_like_file)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
