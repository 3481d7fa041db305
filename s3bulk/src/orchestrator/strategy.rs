//! Execution strategies for bulk transfers.
//!
//! All three strategies take the same list of requests and feed the same
//! [`BatchTally`]; they differ only in where the work runs:
//!
//! - **Pooled**: a fixed set of OS threads pulling from a shared queue
//! - **Cooperative**: one async task per request sharing one async client
//! - **Hybrid**: async tasks that hand the blocking transfer to the runtime's
//!   blocking pool
//!
//! A panic inside one transfer is caught and counted as that transfer's
//! failure; siblings keep running.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Instrument, Span};

use super::tally::BatchTally;
use crate::error::{ConfigError, TransferError};
use crate::store::{AsyncBlobStore, BlobStore};
use crate::transfer::{
    execute_async, execute_blocking, OperationProgress, ProgressSink, TransferOutcome,
    TransferRequest,
};

/// Execution model for a batch. Chosen by the caller, never negotiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Fixed pool of worker threads.
    #[default]
    Pooled,
    /// Async tasks on the current runtime.
    Cooperative,
    /// Async tasks delegating to the blocking thread pool.
    Hybrid,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Pooled => write!(f, "pooled"),
            ExecutionStrategy::Cooperative => write!(f, "cooperative"),
            ExecutionStrategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for ExecutionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pooled" | "threads" => Ok(ExecutionStrategy::Pooled),
            "cooperative" | "async" => Ok(ExecutionStrategy::Cooperative),
            "hybrid" => Ok(ExecutionStrategy::Hybrid),
            other => Err(ConfigError::invalid(
                "strategy",
                format!("unknown strategy '{}' (expected pooled, cooperative or hybrid)", other),
            )),
        }
    }
}

/// Everything a strategy needs to run one batch.
pub(crate) struct BatchContext<S> {
    pub(crate) store: Arc<S>,
    pub(crate) sink: Arc<dyn ProgressSink>,
    pub(crate) cancel: CancellationToken,
    pub(crate) workers: usize,
    pub(crate) timeout: Option<Duration>,
    pub(crate) span: Span,
}

impl<S> BatchContext<S> {
    /// Progress handle for one request, with its own child cancellation token.
    fn progress_for(&self, request: &TransferRequest) -> OperationProgress {
        OperationProgress::new(
            request.key.clone(),
            request.direction,
            Arc::clone(&self.sink),
            self.cancel.child_token(),
        )
    }
}

/// Run `requests` on a fixed pool of worker threads.
///
/// Blocks until every request has an outcome. Outcomes are recorded on the
/// calling thread in completion order.
pub(crate) fn run_pooled<S>(ctx: &BatchContext<S>, requests: Vec<TransferRequest>, tally: &mut BatchTally)
where
    S: BlobStore + 'static,
{
    if requests.is_empty() {
        return;
    }

    let workers = ctx.workers.min(requests.len()).max(1);
    let queue = Mutex::new(VecDeque::from(requests));
    let (tx, rx) = mpsc::channel::<TransferOutcome>();

    thread::scope(|scope| {
        for worker in 0..workers {
            let tx = tx.clone();
            let queue = &queue;
            let span = ctx.span.clone();
            let spawned = thread::Builder::new()
                .name(format!("s3bulk-worker-{}", worker))
                .spawn_scoped(scope, move || {
                    let _entered = span.enter();
                    loop {
                        let next = queue.lock().pop_front();
                        let Some(request) = next else {
                            break;
                        };
                        let progress = ctx.progress_for(&request);
                        let outcome = guarded_blocking(&*ctx.store, request, &progress);
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            if let Err(e) = spawned {
                warn!(parent: &ctx.span, worker, error = %e, "Failed to start transfer worker");
            }
        }
        drop(tx);

        for outcome in rx {
            tally.record(outcome);
        }
    });

    // Only reachable with requests left over when no worker could start.
    let leftover: Vec<TransferRequest> = queue.lock().drain(..).collect();
    for request in leftover {
        tally.record_error(
            request,
            TransferError::unavailable("spawn", "no transfer worker available"),
        );
    }
}

/// Run `requests` as async tasks sharing one async store.
pub(crate) async fn run_cooperative<S>(
    ctx: &BatchContext<S>,
    requests: Vec<TransferRequest>,
    tally: &mut BatchTally,
) where
    S: AsyncBlobStore + 'static,
{
    let permits = Arc::new(Semaphore::new(ctx.workers.max(1)));
    let mut tasks = JoinSet::new();

    for request in requests {
        let store = Arc::clone(&ctx.store);
        let permits = Arc::clone(&permits);
        let progress = ctx.progress_for(&request);
        let timeout = ctx.timeout;

        tasks.spawn(
            async move {
                let _permit = permits.acquire_owned().await.ok();
                let fallback = request.clone();
                match AssertUnwindSafe(execute_async(&*store, request, &progress, timeout))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => panicked(fallback, &progress),
                }
            }
            .instrument(ctx.span.clone()),
        );
    }

    collect(&mut tasks, tally).await;
}

/// Run `requests` as async tasks that each delegate one blocking transfer to
/// the runtime's blocking pool.
pub(crate) async fn run_hybrid<S>(
    ctx: &BatchContext<S>,
    requests: Vec<TransferRequest>,
    tally: &mut BatchTally,
) where
    S: BlobStore + 'static,
{
    let permits = Arc::new(Semaphore::new(ctx.workers.max(1)));
    let mut tasks = JoinSet::new();

    for request in requests {
        let store = Arc::clone(&ctx.store);
        let permits = Arc::clone(&permits);
        let progress = ctx.progress_for(&request);
        let timeout = ctx.timeout;
        let span = ctx.span.clone();

        tasks.spawn(
            async move {
                let permit = permits.acquire_owned().await.ok();
                let fallback = request.clone();
                let token = progress.cancellation().clone();

                // The permit lives as long as the blocking work, not the task.
                let mut blocking = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    let _entered = span.enter();
                    guarded_blocking(&*store, request, &progress)
                });

                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, &mut blocking).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            // Stop the transfer at its next chunk and wait for it, so
                            // nothing outlives the batch.
                            token.cancel();
                            error!(key = %fallback.key, timeout = ?limit, "Transfer timed out");
                            return match blocking.await {
                                Ok(outcome) if outcome.success => outcome,
                                _ => {
                                    let key = fallback.key.to_string();
                                    TransferOutcome::failed(
                                        fallback,
                                        TransferError::Timeout { key, timeout: limit },
                                    )
                                }
                            };
                        }
                    },
                    None => blocking.await,
                };

                joined.unwrap_or_else(|e| {
                    error!(key = %fallback.key, error = %e, "Blocking transfer did not complete");
                    let key = fallback.key.to_string();
                    TransferOutcome::failed(fallback, TransferError::WorkerPanicked { key })
                })
            }
            .instrument(ctx.span.clone()),
        );
    }

    collect(&mut tasks, tally).await;
}

/// Run one blocking transfer, turning a panic into a failed outcome.
pub(crate) fn guarded_blocking(
    store: &dyn BlobStore,
    request: TransferRequest,
    progress: &OperationProgress,
) -> TransferOutcome {
    let fallback = request.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| {
        execute_blocking(store, request, progress)
    })) {
        Ok(outcome) => outcome,
        Err(_) => panicked(fallback, progress),
    }
}

fn panicked(request: TransferRequest, progress: &OperationProgress) -> TransferOutcome {
    error!(key = %request.key, direction = %request.direction, "Transfer worker panicked");
    progress.finished(false);
    let key = request.key.to_string();
    TransferOutcome::failed(request, TransferError::WorkerPanicked { key })
}

async fn collect(tasks: &mut JoinSet<TransferOutcome>, tally: &mut BatchTally) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => tally.record(outcome),
            Err(e) => record_join_error(tally, e),
        }
    }
}

/// A task that died without producing an outcome still counts once.
fn record_join_error(tally: &mut BatchTally, error: JoinError) {
    error!(error = %error, "Transfer task failed to complete");
    tally.record_orphan(&TransferError::WorkerPanicked {
        key: "unknown".to_string(),
    });
}
