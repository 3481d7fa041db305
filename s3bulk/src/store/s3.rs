//! S3-compatible object store backed by aws-sdk-s3.
//!
//! One [`S3Store`] wraps one SDK client. The client's HTTP connection pool is
//! shared by every caller, and a [`ConnectionSlots`] limiter caps how many
//! requests are in flight at once so large batches queue instead of
//! exhausting the pool.
//!
//! The async methods do the work. The blocking [`BlobStore`] impl drives them
//! on the runtime handle captured at connect time, which is how worker
//! threads share the async client. `Handle::block_on` panics on a runtime
//! worker thread, so the blocking methods must be called from a thread outside
//! the runtime or from inside `spawn_blocking`.

use std::io::{self, Read, Write};
use std::time::Duration;

use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::bridge::{SyncReader, SyncWriter};
use super::{
    filter_extension, AsyncBlobStore, BlobStore, BoxFuture, ConnectionSlots, ObjectMeta, OnBytes,
};
use crate::config::S3Settings;
use crate::error::{TransferError, TransferResult};
use crate::key::ObjectKey;

/// Uploads at or above this size use multipart upload (8MB).
pub const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Size of each multipart upload part (8MB).
pub const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Credential provider name reported to the SDK for configured keys.
const CREDENTIALS_SOURCE: &str = "s3bulk-config";

/// Object store client for S3 and S3-compatible services.
///
/// Call the [`BlobStore`] methods from a non-runtime thread or from
/// `spawn_blocking`; from async code use the [`AsyncBlobStore`] methods.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
    slots: ConnectionSlots,
    handle: Handle,
}

impl S3Store {
    /// Build a client from settings.
    ///
    /// Unset fields fall back to the SDK's default provider chain
    /// (environment, profile, instance metadata). A custom endpoint switches
    /// to path-style addressing, which most S3-compatible services need.
    /// `timeout` bounds every request made by the client.
    pub async fn connect(
        settings: &S3Settings,
        pool_connections: usize,
        timeout: Option<Duration>,
    ) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let (Some(access_key), Some(secret_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                CREDENTIALS_SOURCE,
            ));
        }
        if let Some(timeout) = timeout {
            loader = loader.timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(timeout)
                    .build(),
            );
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!(
            endpoint = settings.endpoint.as_deref().unwrap_or("aws"),
            region = settings.region.as_deref().unwrap_or("default"),
            pool_connections,
            "Connected S3 client"
        );

        Self::from_client(
            Client::from_conf(builder.build()),
            ConnectionSlots::new(pool_connections),
            Handle::current(),
        )
    }

    /// Wrap an existing SDK client.
    pub fn from_client(client: Client, slots: ConnectionSlots, handle: Handle) -> Self {
        Self {
            client,
            slots,
            handle,
        }
    }

    /// The connection slot limiter shared by this client.
    pub fn slots(&self) -> &ConnectionSlots {
        &self.slots
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>> {
        let _slot = self.slots.acquire().await?;
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| sdk_failure("list", e))?;
            for object in page.contents() {
                match object.key().map(ObjectKey::new) {
                    Some(Ok(key)) => keys.push(key),
                    Some(Err(e)) => debug!(error = %e, "Skipping unusable key in listing"),
                    None => {}
                }
            }
        }

        if keys.is_empty() {
            info!(bucket, prefix, "No objects found in folder");
        }
        Ok(filter_extension(keys, extension))
    }

    async fn head_object(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta> {
        let _slot = self.slots.acquire().await?;
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(HeadObjectError::is_not_found) {
                    not_found(bucket, key)
                } else {
                    sdk_failure("head", e)
                }
            })?;

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
        })
    }

    async fn fetch(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let _slot = self.slots.acquire().await?;
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(GetObjectError::is_no_such_key) {
                    not_found(bucket, key)
                } else {
                    sdk_failure("get", e)
                }
            })?;

        let mut body = output.body;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| stream_error(key, io::Error::new(io::ErrorKind::Other, e)))?
        {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| stream_error(key, e))?;
            written += chunk.len() as u64;
            if !on_bytes(chunk.len() as u64) {
                return Err(TransferError::Cancelled {
                    key: key.to_string(),
                });
            }
        }
        writer.flush().await.map_err(|e| stream_error(key, e))?;
        Ok(written)
    }

    async fn store(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let _slot = self.slots.acquire().await?;
        if size < MULTIPART_THRESHOLD {
            self.put_single(bucket, key, reader, size, on_bytes).await
        } else {
            self.put_multipart(bucket, key, reader, on_bytes).await
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let mut data = Vec::with_capacity(size as usize);
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| stream_error(key, e))?;
        let sent = data.len() as u64;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key.as_str())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| sdk_failure("put", e))?;

        // The object has landed; a late cancellation no longer changes that.
        let _ = on_bytes(sent);
        Ok(sent)
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| sdk_failure("put", e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| TransferError::unavailable("put", "no upload id returned"))?
            .to_string();

        let result = match self
            .upload_parts(bucket, key, &upload_id, reader, on_bytes)
            .await
        {
            Ok((parts, sent)) => self
                .client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key.as_str())
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map(|_| sent)
                .map_err(|e| sdk_failure("put", e)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(abort) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key.as_str())
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    key = %key,
                    error = %DisplayErrorContext(&abort),
                    "Failed to abort multipart upload"
                );
            }
        }
        result
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &ObjectKey,
        upload_id: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut sent = 0u64;
        let mut part_number = 1i32;

        loop {
            let buffer = read_part(reader, MULTIPART_PART_SIZE)
                .await
                .map_err(|e| stream_error(key, e))?;
            if buffer.is_empty() {
                break;
            }
            let len = buffer.len() as u64;

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key.as_str())
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer))
                .send()
                .await
                .map_err(|e| sdk_failure("put", e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            sent += len;
            part_number += 1;

            if !on_bytes(len) {
                return Err(TransferError::Cancelled {
                    key: key.to_string(),
                });
            }
        }

        debug!(key = %key, parts = parts.len(), bytes = sent, "Uploaded multipart parts");
        Ok((parts, sent))
    }
}

/// Fill a buffer of up to `limit` bytes, stopping early only at end of stream.
async fn read_part(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    limit: usize,
) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; limit];
    let mut filled = 0;
    while filled < limit {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn sdk_failure<E>(operation: &'static str, error: E) -> TransferError
where
    E: std::error::Error,
{
    TransferError::unavailable(operation, DisplayErrorContext(&error).to_string())
}

fn not_found(bucket: &str, key: &ObjectKey) -> TransferError {
    TransferError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn stream_error(key: &ObjectKey, source: io::Error) -> TransferError {
    TransferError::Stream {
        key: key.to_string(),
        source,
    }
}

impl BlobStore for S3Store {
    fn list(
        &self,
        bucket: &str,
        prefix: &str,
        extension: Option<&str>,
    ) -> TransferResult<Vec<ObjectKey>> {
        self.handle
            .block_on(self.list_objects(bucket, prefix, extension))
    }

    fn head(&self, bucket: &str, key: &ObjectKey) -> TransferResult<ObjectMeta> {
        self.handle.block_on(self.head_object(bucket, key))
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        writer: &mut (dyn Write + Send),
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let mut writer = SyncWriter::new(writer);
        self.handle
            .block_on(self.fetch(bucket, key, &mut writer, on_bytes))
    }

    fn put_range(
        &self,
        bucket: &str,
        key: &ObjectKey,
        reader: &mut (dyn Read + Send),
        size: u64,
        on_bytes: &OnBytes<'_>,
    ) -> TransferResult<u64> {
        let mut reader = SyncReader::new(reader);
        self.handle
            .block_on(self.store(bucket, key, &mut reader, size, on_bytes))
    }
}

impl AsyncBlobStore for S3Store {
    fn list<'a>(
        &'a self,
        bucket: &'a str,
        prefix: &'a str,
        extension: Option<&'a str>,
    ) -> BoxFuture<'a, TransferResult<Vec<ObjectKey>>> {
        Box::pin(self.list_objects(bucket, prefix, extension))
    }

    fn head<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
    ) -> BoxFuture<'a, TransferResult<ObjectMeta>> {
        Box::pin(self.head_object(bucket, key))
    }

    fn get_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        Box::pin(self.fetch(bucket, key, writer, on_bytes))
    }

    fn put_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a ObjectKey,
        reader: &'a mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        on_bytes: &'a OnBytes<'a>,
    ) -> BoxFuture<'a, TransferResult<u64>> {
        Box::pin(self.store(bucket, key, reader, size, on_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_part_fills_up_to_limit() {
        let data = vec![1u8; 10];
        let mut reader: &[u8] = &data;

        let first = read_part(&mut reader, 4).await.unwrap();
        let second = read_part(&mut reader, 4).await.unwrap();
        let third = read_part(&mut reader, 4).await.unwrap();
        let done = read_part(&mut reader, 4).await.unwrap();

        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_eq!(third.len(), 2);
        assert!(done.is_empty());
    }

    #[test]
    fn test_part_size_meets_service_minimum() {
        // S3 rejects non-final parts under 5MB.
        assert!(MULTIPART_PART_SIZE >= 5 * 1024 * 1024);
        assert!(MULTIPART_THRESHOLD >= MULTIPART_PART_SIZE as u64);
    }

    #[tokio::test]
    async fn test_connect_with_custom_endpoint() {
        let settings = S3Settings {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            region: Some("us-east-1".to_string()),
            access_key_id: Some("minio".to_string()),
            secret_access_key: Some("minio123".to_string()),
            bucket: None,
        };
        let store = S3Store::connect(&settings, 6, Some(Duration::from_secs(5))).await;
        assert_eq!(store.slots().capacity(), 6);
    }
}
