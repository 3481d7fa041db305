//! Configuration for the bulk transfer manager.

use std::time::Duration;

use super::strategy::ExecutionStrategy;
use crate::error::ConfigError;

/// Workers used when the CPU count cannot be determined.
pub const FALLBACK_WORKERS: usize = 4;

/// Number of workers matching the machine's available parallelism.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// How a [`BulkTransferManager`](super::BulkTransferManager) runs its batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Execution model used by the `*_async` entry points.
    ///
    /// Blocking entry points always use the pooled model.
    pub strategy: ExecutionStrategy,

    /// Maximum transfers in flight at once.
    pub workers: usize,

    /// Time budget for one transfer. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            workers: default_workers(),
            timeout: None,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration using `strategy` with default limits.
    pub fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    /// Set the execution strategy.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-transfer timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the configuration before any transfer starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("timeout", "must be greater than zero"));
        }
        Ok(())
    }

    /// Workers worth starting for `requests` transfers.
    pub(crate) fn workers_for(&self, requests: usize) -> usize {
        self.workers.min(requests).max(1)
    }
}
