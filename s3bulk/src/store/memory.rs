//! In-process object store.
//!
//! Holds objects in a concurrent map and streams them in fixed-size chunks,
//! so progress callbacks and cancellation behave like they do against a real
//! store. Keys can be marked as failing (transport error) or panicking to
//! exercise fault isolation.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{filter_extension, AsyncBlobStore, BlobStore, BoxFuture, ObjectMeta, OnBytes, CHUNK_SIZE};
use crate::error::{TransferError, TransferResult};
use crate::key::ObjectKey;

/// Object store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), Bytes>,
    failing: RwLock<HashSet<String>>,
    panicking: RwLock<HashSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under `bucket/key`, replacing any previous object.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.objects
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Fetch a stored object.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Whether `bucket/key` exists.
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Make every operation on `key` fail with a transport error.
    pub fn fail_key(&self, key: &str) {
        self.failing.write().insert(key.to_string());
    }

    /// Make every operation on `key` panic inside the store.
    pub fn panic_on_key(&self, key: &str) {
        self.panicking.write().insert(key.to_string());
    }

    /// Simulate the whole store being unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, operation: &'static str) -> TransferResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransferError::unavailable(operation, "store offline"));
        }
        Ok(())
    }

    fn check_key(&self, operation: &'static str, key: &ObjectKey) -> TransferResult<()> {
        self.check_available(operation)?;
        if self.panicking.read().contains(key.as_str()) {
            panic!("injected store panic for {}", key);
        }
        if self.failing.read().contains(key.as_str()) {
            return Err(TransferError::unavailable(
                operation,
                format!("injected failure for {}", key),
            ));
        }
        Ok(())
    }

    fn lookup(&self, operation: &'static str, bucket: &str, key: &ObjectKey) -> TransferResult<Bytes> {
        self.check_key(operation, key)?;
        self.object(bucket, key.as_str())
            .ok_or_else(|| TransferError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn keys_under(&self, bucket: &str, prefix: &str, extension: Option<&str>) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket && entry.key().1.starts_with(prefix))
            .filter_map(|entry| ObjectKey::new(entry.key().1.clone()).ok())
            .collect();
        keys.sort();
        filter_extension(keys, extension)
    }
}

fn stream_error(key: &ObjectKey, source: std::io::Error) -> TransferError {
    TransferError::Stream {
        key: key.to_string(),
        source,
    }
}

fn cancelled(key: &ObjectKey) -> TransferError {
    TransferError::Cancelled {
        key: key.to_string(),
    }
}

impl BlobStore for MemoryStore {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>> {
        self.check_available("list")?;
        Ok(self.keys_under(bucket, prefix, extension))
    }

    fn head(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta> {
        let data = self.lookup("head", bucket, key)?;
        Ok(ObjectMeta {
            size: data.len() as u64,
        })
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn Write + Send),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let data = self.lookup("get", bucket, key)?;
        let mut written = 0u64;
        for chunk in data.chunks(CHUNK_SIZE) {
            writer
                .write_all(chunk)
                .map_err(|e| stream_error(key, e))?;
            written += chunk.len() as u64;
            if !on_bytes(chunk.len() as u64) {
                return Err(cancelled(key));
            }
        }
        writer.flush().map_err(|e| stream_error(key, e))?;
        Ok(written)
    }

    fn put_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn Read + Send),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        self.check_key("put", key)?;
        let mut data = Vec::with_capacity(size as usize);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = reader.read(&mut chunk).map_err(|e| stream_error(key, e))?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..n]);
            if !on_bytes(n as u64) {
                return Err(cancelled(key));
            }
        }
        let sent = data.len() as u64;
        self.insert(bucket, key.as_str(), data);
        Ok(sent)
    }
}

impl AsyncBlobStore for MemoryStore {
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        extension: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Vec<ObjectKey>>> {
        Box::pin(async move { BlobStore::list(self, bucket, prefix, extension) })
    }

    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, TransferResult<ObjectMeta>> {
        Box::pin(async move { BlobStore::head(self, bucket, key) })
    }

    fn get_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        Box::pin(async move {
            let data = self.lookup("get", bucket, key)?;
            let mut written = 0u64;
            for chunk in data.chunks(CHUNK_SIZE) {
                writer
                    .write_all(chunk)
                    .await
                    .map_err(|e| stream_error(key, e))?;
                written += chunk.len() as u64;
                if !on_bytes(chunk.len() as u64) {
                    return Err(cancelled(key));
                }
                // Let sibling tasks run between chunks, as a network read would.
                tokio::task::yield_now().await;
            }
            writer.flush().await.map_err(|e| stream_error(key, e))?;
            Ok(written)
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
        Box::pin(async move {
            self.check_key("put", key)?;
            let mut data = Vec::with_capacity(size as usize);
            let mut chunk = vec![0u8; CHUNK_SIZE];
            loop {
                let n = reader
                    .read(&mut chunk)
                    .await
                    .map_err(|e| stream_error(key, e))?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
                if !on_bytes(n as u64) {
                    return Err(cancelled(key));
                }
                tokio::task::yield_now().await;
            }
            let sent = data.len() as u64;
            self.insert(bucket, key.as_str(), data);
            Ok(sent)
        })
    }
}
