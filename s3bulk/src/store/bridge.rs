//! Adapters that let blocking readers and writers stand in for async ones.
//!
//! Used when a blocking caller drives an async store on a runtime handle:
//! the future runs on the caller's own thread, so completing each poll with
//! a synchronous read or write is fine there.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Async view over a blocking writer.
pub(crate) struct SyncWriter<'a> {
    inner: &'a mut (dyn Write + Send),
}

impl<'a> SyncWriter<'a> {
    pub(crate) fn new(inner: &'a mut (dyn Write + Send)) -> Self {
        Self { inner }
    }
}

impl AsyncWrite for SyncWriter<'_> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(self.get_mut().inner.write(buf))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(self.get_mut().inner.flush())
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_flush(cx)
    }
}

/// Async view over a blocking reader.
pub(crate) struct SyncReader<'a> {
    inner: &'a mut (dyn Read + Send),
}

impl<'a> SyncReader<'a> {
    pub(crate) fn new(inner: &'a mut (dyn Read + Send)) -> Self {
        Self { inner }
    }
}

impl AsyncRead for SyncReader<'_> {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.inner.read(buf.initialize_unfilled()) {
            Ok(n) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
