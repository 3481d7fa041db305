//! Integration tests for bulk transfers.
//!
//! These tests drive `BulkTransferManager` end to end against the in-memory
//! store and real temporary directories, for every execution strategy:
//! - listing, download and upload scenarios
//! - the aggregate count contract under failures, panics and cancellation
//! - idempotent re-downloads and the local path layout
//! - progress events and per-transfer timeouts
//!
//! Run with: `cargo test --test bulk_transfer`

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use s3bulk::store::{AsyncBlobStore, BlobStore, BoxFuture, MemoryStore, ObjectMeta, OnBytes};
use s3bulk::transfer::{ChannelProgress, ProgressEvent};
use s3bulk::{
    BulkTransferManager, ConfigError, ExecutionStrategy, ManagerConfig, ObjectKey,
    TransferBatchResult, TransferResult,
};

// ============================================================================
// Helper Functions
// ============================================================================

const BUCKET: &str = "b";

const STRATEGIES: [ExecutionStrategy; 3] = [
    ExecutionStrategy::Pooled,
    ExecutionStrategy::Cooperative,
    ExecutionStrategy::Hybrid,
];

/// Store holding `docs/a.pdf` and `docs/b.pdf`.
fn docs_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(BUCKET, "docs/a.pdf", b"alpha".to_vec());
    store.insert(BUCKET, "docs/b.pdf", b"bravo".to_vec());
    store
}

fn manager<S>(store: S, strategy: ExecutionStrategy) -> BulkTransferManager<S>
where
    S: BlobStore + AsyncBlobStore + 'static,
{
    BulkTransferManager::new(
        Arc::new(store),
        ManagerConfig::new(strategy).with_workers(3),
    )
}

fn assert_counts(result: &TransferBatchResult, ok: usize, failed: usize) {
    assert_eq!(
        (result.success_count, result.failure_count),
        (ok, failed),
        "unexpected counts, failures: {:?}",
        result.failures
    );
    assert_eq!(result.failures.len(), failed);
}

fn file_count(dir: &Path) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap().flatten() {
        let path = entry.path();
        if path.is_dir() {
            count += file_count(&path);
        } else {
            count += 1;
        }
    }
    count
}

/// Wraps a memory store and stalls every read.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl BlobStore for SlowStore {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>> {
        BlobStore::list(&self.inner, bucket, prefix, extension)
    }

    fn head(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta> {
        BlobStore::head(&self.inner, bucket, key)
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn Write + Send),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        std::thread::sleep(self.delay);
        BlobStore::get_range(&self.inner, bucket, key, writer, on_bytes)
    }

    fn put_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn Read + Send),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        BlobStore::put_range(&self.inner, bucket, key, reader, size, on_bytes)
    }
}

impl AsyncBlobStore for SlowStore {
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        extension: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Vec<ObjectKey>>> {
        AsyncBlobStore::list(&self.inner, bucket, prefix, extension)
    }

    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, TransferResult<ObjectMeta>> {
        AsyncBlobStore::head(&self.inner, bucket, key)
    }

    fn get_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            AsyncBlobStore::get_range(&self.inner, bucket, key, writer, on_bytes).await
        })
    }

    fn put_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        AsyncBlobStore::put_range(&self.inner, bucket, key, reader, size, on_bytes)
    }
}

/// Wraps a memory store and stalls every `head`, tracking how many run at once.
struct StallingHeadStore {
    inner: MemoryStore,
    delay: Duration,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl StallingHeadStore {
    fn new(inner: MemoryStore, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BlobStore for StallingHeadStore {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>> {
        BlobStore::list(&self.inner, bucket, prefix, extension)
    }

    fn head(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta> {
        self.enter();
        std::thread::sleep(self.delay);
        self.leave();
        BlobStore::head(&self.inner, bucket, key)
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn Write + Send),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        BlobStore::get_range(&self.inner, bucket, key, writer, on_bytes)
    }

    fn put_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn Read + Send),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        BlobStore::put_range(&self.inner, bucket, key, reader, size, on_bytes)
    }
}

impl AsyncBlobStore for StallingHeadStore {
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        extension: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Vec<ObjectKey>>> {
        AsyncBlobStore::list(&self.inner, bucket, prefix, extension)
    }

    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, TransferResult<ObjectMeta>> {
        Box::pin(async move {
            self.enter();
            tokio::time::sleep(self.delay).await;
            self.leave();
            AsyncBlobStore::head(&self.inner, bucket, key).await
        })
    }

    fn get_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        AsyncBlobStore::get_range(&self.inner, bucket, key, writer, on_bytes)
    }

    fn put_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        AsyncBlobStore::put_range(&self.inner, bucket, key, reader, size, on_bytes)
    }
}

// ============================================================================
// Listing
// ============================================================================

#[test]
fn test_list_by_prefix_and_extension() {
    let manager = manager(docs_store(), ExecutionStrategy::Pooled);

    let keys: Vec<String> = manager
        .list(BUCKET, "docs/", None)
        .iter()
        .map(|k| k.to_string())
        .collect();
    assert_eq!(keys, vec!["docs/a.pdf", "docs/b.pdf"]);

    assert_eq!(manager.list(BUCKET, "docs/", Some(".pdf")).len(), 2);
    assert!(manager.list(BUCKET, "docs/", Some(".txt")).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_async_matches_blocking_list() {
    let manager = manager(docs_store(), ExecutionStrategy::Cooperative);
    let keys = manager.list_async(BUCKET, "docs/", Some(".pdf")).await;
    assert_eq!(keys.len(), 2);
    assert!(manager.list_async(BUCKET, "nothing/", None).await.is_empty());
}

// ============================================================================
// Downloads
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_keep_structure_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(BUCKET, &["docs/a.pdf"], out.path(), true)
            .await
            .unwrap();

        assert_counts(&result, 1, 0);
        assert_eq!(
            std::fs::read(out.path().join("docs/a.pdf")).unwrap(),
            b"alpha",
            "strategy {}",
            strategy
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_flat_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(BUCKET, &["docs/a.pdf"], out.path(), false)
            .await
            .unwrap();

        assert_counts(&result, 1, 0);
        assert!(out.path().join("a.pdf").is_file(), "strategy {}", strategy);
        assert!(!out.path().join("docs").exists());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_key_is_isolated_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(
                BUCKET,
                &["docs/a.pdf", "docs/missing.pdf", "docs/b.pdf"],
                out.path(),
                true,
            )
            .await
            .unwrap();

        assert_counts(&result, 2, 1);
        assert_eq!(result.failures[0].key, "docs/missing.pdf");
        assert_eq!(file_count(out.path()), 2, "strategy {}", strategy);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_fault_and_panic_are_isolated_all_strategies() {
    for strategy in STRATEGIES {
        let store = MemoryStore::new();
        let keys: Vec<String> = (0..12).map(|i| format!("data/file-{:02}.bin", i)).collect();
        for key in &keys {
            store.insert(BUCKET, key, vec![1u8; 256]);
        }
        store.fail_key("data/file-03.bin");
        store.panic_on_key("data/file-07.bin");

        let manager = manager(store, strategy);
        let out = tempfile::tempdir().unwrap();
        let result = manager
            .download_batch_async(BUCKET, &keys, out.path(), false)
            .await
            .unwrap();

        assert_counts(&result, 10, 2);
        assert_eq!(result.bytes_transferred, 10 * 256);
        assert_eq!(file_count(out.path()), 10, "strategy {}", strategy);
        assert!(result
            .failures
            .iter()
            .any(|f| f.key == "data/file-07.bin" && f.reason.contains("panicked")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redownload_is_idempotent_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        let out = tempfile::tempdir().unwrap();
        let keys = ["docs/a.pdf", "docs/b.pdf"];

        let first = manager
            .download_batch_async(BUCKET, &keys, out.path(), true)
            .await
            .unwrap();
        let second = manager
            .download_batch_async(BUCKET, &keys, out.path(), true)
            .await
            .unwrap();

        assert_counts(&first, 2, 0);
        assert_counts(&second, 2, 0);
        assert_eq!(file_count(out.path()), 2, "strategy {}", strategy);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_batch_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(BUCKET, &Vec::<String>::new(), out.path(), true)
            .await
            .unwrap();
        assert_counts(&result, 0, 0);
    }
}

#[test]
fn test_blocking_download_batch() {
    let manager = manager(docs_store(), ExecutionStrategy::Pooled);
    let out = tempfile::tempdir().unwrap();

    let result = manager
        .download_batch(BUCKET, &["docs/a.pdf", "docs/b.pdf"], out.path(), true)
        .unwrap();

    assert_counts(&result, 2, 0);
    assert!(out.path().join("docs/b.pdf").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_download_prefixes_keeps_structure() {
    let store = docs_store();
    store.insert(BUCKET, "scans/2024/c.png", b"charlie".to_vec());
    store.insert(BUCKET, "scans/2024/", Vec::new());
    let manager = manager(store, ExecutionStrategy::Cooperative);
    let out = tempfile::tempdir().unwrap();

    let result = manager
        .download_prefixes_async(BUCKET, &["docs/", "scans/"], out.path())
        .await
        .unwrap();

    assert_counts(&result, 3, 0);
    assert!(out.path().join("scans/2024/c.png").is_file());
    assert!(out.path().join("docs/a.pdf").is_file());
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_batch_all_strategies() {
    for strategy in STRATEGIES {
        let store = Arc::new(MemoryStore::new());
        let manager = BulkTransferManager::new(
            Arc::clone(&store),
            ManagerConfig::new(strategy).with_workers(2),
        );
        let dir = tempfile::tempdir().unwrap();
        let x = dir.path().join("x.txt");
        let y = dir.path().join("y.txt");
        std::fs::write(&x, b"x").unwrap();
        std::fs::write(&y, b"y").unwrap();

        let result = manager
            .upload_batch_async(BUCKET, "up/", &[x, y])
            .await
            .unwrap();

        assert_counts(&result, 2, 0);
        assert!(store.contains(BUCKET, "up/x.txt"), "strategy {}", strategy);
        assert!(store.contains(BUCKET, "up/y.txt"));
    }
}

#[test]
fn test_upload_missing_file_is_counted() {
    let store = Arc::new(MemoryStore::new());
    let manager = BulkTransferManager::new(Arc::clone(&store), ManagerConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let present = dir.path().join("here.txt");
    std::fs::write(&present, b"here").unwrap();

    let result = manager
        .upload_batch(BUCKET, "up", &[present, dir.path().join("gone.txt")])
        .unwrap();

    assert_counts(&result, 1, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_upload_dir_flattens_files() {
    let store = Arc::new(MemoryStore::new());
    let manager = BulkTransferManager::new(Arc::clone(&store), ManagerConfig::default());
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
    std::fs::write(dir.path().join("nested/low.txt"), b"2").unwrap();

    let result = manager.upload_dir(BUCKET, "folder/", dir.path()).unwrap();

    assert_counts(&result, 2, 0);
    assert!(store.contains(BUCKET, "folder/top.txt"));
    assert!(store.contains(BUCKET, "folder/low.txt"));
}

// ============================================================================
// Cancellation, Timeouts and Progress
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_batch_counts_every_request_all_strategies() {
    for strategy in STRATEGIES {
        let manager = manager(docs_store(), strategy);
        manager.cancellation().cancel();
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(BUCKET, &["docs/a.pdf", "docs/b.pdf"], out.path(), true)
            .await
            .unwrap();

        assert_counts(&result, 0, 2);
        assert!(result.failures.iter().all(|f| f.reason.contains("cancelled")));
        assert_eq!(file_count(out.path()), 0, "strategy {}", strategy);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_fails_slow_transfers() {
    for strategy in [ExecutionStrategy::Cooperative, ExecutionStrategy::Hybrid] {
        let store = SlowStore {
            inner: docs_store(),
            delay: Duration::from_millis(500),
        };
        let manager = BulkTransferManager::new(
            Arc::new(store),
            ManagerConfig::new(strategy)
                .with_workers(2)
                .with_timeout(Duration::from_millis(50)),
        );
        let out = tempfile::tempdir().unwrap();

        let result = manager
            .download_batch_async(BUCKET, &["docs/a.pdf"], out.path(), true)
            .await
            .unwrap();

        assert_counts(&result, 0, 1);
        assert!(
            result.failures[0].reason.contains("timed out"),
            "strategy {}: {}",
            strategy,
            result.failures[0].reason
        );
        assert!(!out.path().join("docs/a.pdf").exists());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hybrid_timeout_keeps_worker_bound() {
    let inner = MemoryStore::new();
    let keys: Vec<String> = (0..6).map(|i| format!("stall/{}.bin", i)).collect();
    for key in &keys {
        inner.insert(BUCKET, key, vec![1u8; 16]);
    }
    let manager = BulkTransferManager::new(
        Arc::new(StallingHeadStore::new(inner, Duration::from_millis(150))),
        ManagerConfig::new(ExecutionStrategy::Hybrid)
            .with_workers(1)
            .with_timeout(Duration::from_millis(30)),
    );
    let out = tempfile::tempdir().unwrap();

    let result = manager
        .download_batch_async(BUCKET, &keys, out.path(), true)
        .await
        .unwrap();

    assert_counts(&result, 0, 6);
    assert!(result.failures.iter().all(|f| f.reason.contains("timed out after 30ms")));

    let store = manager.store();
    assert_eq!(store.peak.load(Ordering::SeqCst), 1, "more heads ran than workers");
    assert_eq!(store.live.load(Ordering::SeqCst), 0, "work outlived the batch");
    assert_eq!(file_count(out.path()), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_progress_events() {
    let (sink, mut events) = ChannelProgress::new();
    let manager = manager(docs_store(), ExecutionStrategy::Cooperative).with_progress(Arc::new(sink));
    let out = tempfile::tempdir().unwrap();

    manager
        .download_batch_async(BUCKET, &["docs/a.pdf", "docs/b.pdf", ""], out.path(), true)
        .await
        .unwrap();
    drop(manager);

    let mut started = 0;
    let mut finished = 0;
    let mut batch = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::Started { .. } => started += 1,
            ProgressEvent::Finished { .. } => finished += 1,
            ProgressEvent::Batch { completed, total } => batch.push((completed, total)),
            ProgressEvent::Bytes { .. } => {}
        }
    }

    assert_eq!(started, 2);
    assert_eq!(finished, 2);
    assert_eq!(batch.first(), Some(&(1, 3)));
    assert_eq!(batch.last(), Some(&(3, 3)));
}

// ============================================================================
// Configuration Errors
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_config_errors_are_returned_before_work() {
    let store = Arc::new(docs_store());
    let manager = BulkTransferManager::new(Arc::clone(&store), ManagerConfig::default());
    let out = tempfile::tempdir().unwrap();

    let err = manager
        .download_batch_async("", &["docs/a.pdf"], out.path(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Missing { field: "bucket" }));
    assert_eq!(file_count(out.path()), 0);

    let err = manager
        .upload_dir_async(BUCKET, "up/", out.path().join("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }));
}
