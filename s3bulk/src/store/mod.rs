//! Object store access.
//!
//! Two capability traits cover the two execution models:
//!
//! - [`BlobStore`] is blocking and is used by worker threads (pooled and
//!   hybrid strategies).
//! - [`AsyncBlobStore`] returns boxed futures so it stays dyn-compatible, and
//!   is used by cooperative tasks sharing one client.
//!
//! Implementations:
//!
//! - [`S3Store`]: aws-sdk-s3 client behind a bounded set of connection slots
//! - [`MemoryStore`]: in-process store with fault injection, for tests and dry runs

mod bridge;
mod memory;
mod s3;
mod slots;

pub use memory::MemoryStore;
pub use s3::{S3Store, MULTIPART_PART_SIZE, MULTIPART_THRESHOLD};
pub use slots::{ConnectionSlot, ConnectionSlots};

use std::future::Future;
use std::io::{Read, Write};
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferResult;
use crate::key::ObjectKey;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte-progress callback invoked after every streamed chunk.
///
/// Receives the size of the chunk just moved. Returning `false` aborts the
/// stream with [`TransferError::Cancelled`](crate::TransferError::Cancelled).
pub type OnBytes<'a> = dyn Fn(u64) -> bool + Send + Sync + 'a;

/// Size of the chunks memory-backed stores stream in (64KB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Object metadata returned by `head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
}

/// Blocking object store operations.
///
/// Implementations must be safe to call from many threads at once; the
/// underlying connection pool is shared by every caller.
pub trait BlobStore: Send + Sync {
    /// List every key under `prefix`, optionally keeping only keys that end
    /// with `extension`.
    ///
    /// An empty listing is `Ok(vec![])`. Only transport failures are errors.
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>>;

    /// Fetch object metadata. Fails with `ObjectNotFound` for missing keys.
    fn head(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta>;

    /// Stream the whole object into `writer`, returning the bytes written.
    fn get_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn Write + Send),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64>;

    /// Stream `size` bytes from `reader` into the object, returning the bytes sent.
    fn put_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn Read + Send),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64>;
}

/// Async object store operations.
///
/// Same contract as [`BlobStore`]; every call suspends at its network I/O so
/// other tasks can run while it waits.
pub trait AsyncBlobStore: Send + Sync {
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        extension: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Vec<ObjectKey>>>;

    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, TransferResult<ObjectMeta>>;

    fn get_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>>;

    fn put_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>>;
}

/// Keep the keys that match `extension` (all of them for `None`).
pub(crate) fn filter_extension(
    keys: impl IntoIterator<Item = ObjectKey>,
    extension: Option<&str>,
) -> Vec<ObjectKey> {
    keys.into_iter()
        .filter(|key| key.has_extension(extension))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_extension() {
        let keys = vec![
            ObjectKey::new("docs/a.pdf").unwrap(),
            ObjectKey::new("docs/b.txt").unwrap(),
        ];

        assert_eq!(filter_extension(keys.clone(), None).len(), 2);
        assert_eq!(filter_extension(keys.clone(), Some(".pdf")).len(), 1);
        assert!(filter_extension(keys, Some(".csv")).is_empty());
    }
}
