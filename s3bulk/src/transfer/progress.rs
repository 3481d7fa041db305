//! Progress events for single transfers and whole batches.
//!
//! Operations never write to a shared bar directly. Each one gets an
//! [`OperationProgress`] scoped to its own key, which turns byte callbacks
//! into [`ProgressEvent`]s on a shared [`ProgressSink`] and answers whether
//! the transfer should keep going.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use super::request::Direction;
use crate::key::ObjectKey;

/// Something observable happened during a transfer or batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A transfer began; `total_bytes` is its expected size.
    Started {
        key: ObjectKey,
        direction: Direction,
        total_bytes: u64,
    },
    /// More bytes moved. `transferred` is the running total for this key.
    Bytes {
        key: ObjectKey,
        transferred: u64,
        total_bytes: u64,
    },
    /// A transfer ended.
    Finished { key: ObjectKey, success: bool },
    /// The batch advanced. Sent once before the first transfer and once per
    /// completed transfer.
    Batch { completed: usize, total: usize },
}

/// Receiver of progress events. Must tolerate calls from many threads.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.sender.send(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnProgress<F>(pub F);

impl<F> FnProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnProgress<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnProgress")
    }
}

impl<F> ProgressSink for FnProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

/// Progress handle owned by exactly one running transfer.
pub struct OperationProgress {
    key: ObjectKey,
    direction: Direction,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    total: AtomicU64,
    transferred: AtomicU64,
}

impl OperationProgress {
    pub fn new(
        key: ObjectKey,
        direction: Direction,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            key,
            direction,
            sink,
            cancel,
            total: AtomicU64::new(0),
            transferred: AtomicU64::new(0),
        }
    }

    /// Record the expected size and announce the start.
    pub fn started(&self, total_bytes: u64) {
        self.total.store(total_bytes, Ordering::SeqCst);
        self.sink.emit(ProgressEvent::Started {
            key: self.key.clone(),
            direction: self.direction,
            total_bytes,
        });
    }

    /// Account for `bytes` more. Returns false once the transfer should stop.
    pub fn advance(&self, bytes: u64) -> bool {
        let transferred = self.transferred.fetch_add(bytes, Ordering::SeqCst) + bytes;
        self.sink.emit(ProgressEvent::Bytes {
            key: self.key.clone(),
            transferred,
            total_bytes: self.total.load(Ordering::SeqCst),
        });
        !self.cancel.is_cancelled()
    }

    pub fn finished(&self, success: bool) {
        self.sink.emit(ProgressEvent::Finished {
            key: self.key.clone(),
            success,
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires when this transfer should stop.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Bytes accounted so far.
    pub fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for OperationProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationProgress")
            .field("key", &self.key)
            .field("direction", &self.direction)
            .field("transferred", &self.transferred())
            .finish()
    }
}
