//! Aggregation of transfer outcomes.
//!
//! A [`BatchTally`] is owned by the thread or task collecting outcomes for
//! one batch. Every request is counted exactly once, either as an outcome or
//! as a rejection recorded before dispatch, which is what keeps
//! `success_count + failure_count` equal to the number of inputs.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::error::TransferError;
use crate::transfer::{ProgressEvent, ProgressSink, TransferOutcome, TransferRequest};

/// A transfer that did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTransfer {
    pub key: String,
    pub local_path: PathBuf,
    pub reason: String,
}

/// Aggregate result of one bulk call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferBatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Bytes moved by successful transfers.
    pub bytes_transferred: u64,
    pub failures: Vec<FailedTransfer>,
}

impl TransferBatchResult {
    /// Number of requests this result accounts for.
    pub fn total(&self) -> usize {
        self.success_count + self.failure_count
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }
}

/// Running counters for one batch.
#[derive(Clone)]
pub(crate) struct BatchTally {
    result: TransferBatchResult,
    total: usize,
    sink: Arc<dyn ProgressSink>,
}

impl BatchTally {
    pub(crate) fn new(total: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            result: TransferBatchResult::default(),
            total,
            sink,
        }
    }

    pub(crate) fn completed(&self) -> usize {
        self.result.total()
    }

    /// Announce the batch, counting rejections already recorded.
    pub(crate) fn begin(&self) {
        self.sink.emit(ProgressEvent::Batch {
            completed: self.completed(),
            total: self.total,
        });
    }

    /// Count an input that never became a request.
    pub(crate) fn reject(&mut self, key: impl Into<String>, local_path: PathBuf, error: &TransferError) {
        self.record_failure(key.into(), local_path, error.to_string());
    }

    pub(crate) fn record(&mut self, outcome: TransferOutcome) {
        if outcome.success {
            self.record_success(outcome.bytes_transferred);
        } else {
            let reason = outcome
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            self.record_failure(outcome.request.key.to_string(), outcome.request.local_path, reason);
        }
        self.sink.emit(ProgressEvent::Batch {
            completed: self.completed(),
            total: self.total,
        });
    }

    /// Count a failure that cannot be tied back to its request.
    pub(crate) fn record_orphan(&mut self, error: &TransferError) {
        self.record_failure("unknown".to_string(), PathBuf::new(), error.to_string());
        self.sink.emit(ProgressEvent::Batch {
            completed: self.completed(),
            total: self.total,
        });
    }

    /// Count `request` as failed with `error`.
    pub(crate) fn record_error(&mut self, request: TransferRequest, error: TransferError) {
        self.record(TransferOutcome::failed(request, error));
    }

    fn record_success(&mut self, bytes: u64) {
        self.result.success_count += 1;
        self.result.bytes_transferred += bytes;
    }

    fn record_failure(&mut self, key: String, local_path: PathBuf, reason: String) {
        self.result.failure_count += 1;
        self.result.failures.push(FailedTransfer {
            key,
            local_path,
            reason,
        });
    }

    pub(crate) fn finish(self) -> TransferBatchResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::ObjectKey;
    use crate::transfer::{FnProgress, NoopProgress};
    use parking_lot::Mutex;
    use proptest::prelude::*;

    fn request(key: &str) -> TransferRequest {
        TransferRequest::download("b", ObjectKey::new(key).unwrap(), "/tmp", false)
    }

    #[test]
    fn test_counts_and_failures() {
        let mut tally = BatchTally::new(3, Arc::new(NoopProgress));
        tally.record(TransferOutcome::succeeded(request("a.txt"), 10));
        tally.record_error(
            request("b.txt"),
            TransferError::Cancelled {
                key: "b.txt".into(),
            },
        );
        tally.reject("", PathBuf::from("/tmp"), &TransferError::InvalidKey("empty".into()));

        let result = tally.finish();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.bytes_transferred, 10);
        assert_eq!(result.failures[0].key, "b.txt");
        assert!(result.failures[0].reason.contains("cancelled"));
    }

    #[test]
    fn test_batch_events_advance_by_one() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&events);
        let sink = Arc::new(FnProgress::new(move |e| captured.lock().push(e)));

        let mut tally = BatchTally::new(2, sink);
        tally.begin();
        tally.record(TransferOutcome::succeeded(request("a.txt"), 1));
        tally.record(TransferOutcome::succeeded(request("b.txt"), 1));

        let completed: Vec<usize> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Batch { completed, .. } => Some(*completed),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_every_outcome_is_counted_once(flags in prop::collection::vec(any::<bool>(), 0..64)) {
            let mut tally = BatchTally::new(flags.len(), Arc::new(NoopProgress));
            for (i, ok) in flags.iter().enumerate() {
                let req = request(&format!("k{}.bin", i));
                if *ok {
                    tally.record(TransferOutcome::succeeded(req, 1));
                } else {
                    tally.record_error(req, TransferError::InvalidKey("x".into()));
                }
            }
            let result = tally.finish();
            prop_assert_eq!(result.success_count + result.failure_count, flags.len());
            prop_assert_eq!(result.failures.len(), result.failure_count);
            prop_assert_eq!(result.success_count, flags.iter().filter(|f| **f).count());
        }
    }
}
