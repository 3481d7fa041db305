//! Common types and utilities shared across CLI commands.

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use console::style;
use s3bulk::config::ConfigFile;
use s3bulk::store::{ConnectionSlots, S3Store};
use s3bulk::{BulkTransferManager, ExecutionStrategy, ManagerConfig, TransferBatchResult};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::error::CliError;
use crate::progress::TerminalProgress;

/// Execution strategy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum StrategyArg {
    /// Fixed pool of worker threads
    Pooled,
    /// Async tasks sharing one client
    Cooperative,
    /// Async tasks handing transfers to a blocking thread pool
    Hybrid,
}

impl From<StrategyArg> for ExecutionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Pooled => ExecutionStrategy::Pooled,
            StrategyArg::Cooperative => ExecutionStrategy::Cooperative,
            StrategyArg::Hybrid => ExecutionStrategy::Hybrid,
        }
    }
}

/// State shared by every command.
pub struct Context {
    pub config: ConfigFile,
    pub json: bool,
}

impl Context {
    /// Load configuration from `path`, or the default location.
    pub fn load(path: Option<&Path>, json: bool) -> Result<Self, CliError> {
        let config = match path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };
        Ok(Self {
            config: config.with_env_fallbacks(),
            json,
        })
    }

    /// Bucket from the CLI, falling back to the config file.
    pub fn bucket(&self, cli_bucket: Option<String>) -> Result<String, CliError> {
        cli_bucket
            .or_else(|| self.config.s3.bucket.clone())
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| {
                CliError::Config(
                    "no bucket given. Use --bucket or set bucket in the [s3] section of config.ini"
                        .to_string(),
                )
            })
    }

    /// Manager settings: CLI takes precedence, then config, then defaults.
    pub fn manager_config(
        &self,
        strategy: Option<StrategyArg>,
        workers: Option<usize>,
    ) -> ManagerConfig {
        let mut config = self.config.manager_config();
        if let Some(strategy) = strategy {
            config = config.with_strategy(strategy.into());
        }
        if let Some(workers) = workers {
            config = config.with_workers(workers);
        }
        config
    }

    /// Connection slots for `workers` concurrent transfers.
    pub fn pool_connections(&self, workers: usize) -> usize {
        self.config
            .transfer
            .pool_connections
            .unwrap_or_else(|| ConnectionSlots::for_workers(workers).capacity())
    }

    /// Connect to the store and build a manager wired to `progress` and `cancel`.
    pub async fn manager(
        &self,
        config: ManagerConfig,
        progress: Arc<TerminalProgress>,
        cancel: CancellationToken,
    ) -> BulkTransferManager<S3Store> {
        let store = S3Store::connect(
            &self.config.s3,
            self.pool_connections(config.workers),
            self.config.timeout(),
        )
        .await;
        BulkTransferManager::new(Arc::new(store), config)
            .with_progress(progress)
            .with_cancellation(cancel)
    }
}

/// Build the multi-threaded runtime commands run on.
pub fn build_runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("s3bulk-rt")
        .build()
        .map_err(|e| CliError::Runtime(format!("Failed to start async runtime: {}", e)))
}

/// Cancel `token` on Ctrl+C.
pub fn cancel_on_ctrlc(token: CancellationToken) -> Result<(), CliError> {
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Received interrupt, cancelling transfers...");
        token.cancel();
    })
    .map_err(|e| CliError::Runtime(format!("Failed to set signal handler: {}", e)))
}

/// Print a batch result and turn failures into an error.
pub fn report(result: &TransferBatchResult, json: bool) -> Result<(), CliError> {
    if json {
        let text = serde_json::to_string_pretty(result)
            .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", text);
    } else {
        println!(
            "{} succeeded, {} failed, {} bytes transferred",
            style(result.success_count).green(),
            style(result.failure_count).red(),
            result.bytes_transferred
        );
        for failure in &result.failures {
            println!(
                "  {} {}: {}",
                style("✗").red(),
                failure.key,
                failure.reason
            );
        }
    }

    if result.has_failures() {
        return Err(CliError::TransfersFailed {
            failed: result.failure_count,
            total: result.total(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(ini: &str) -> Context {
        Context {
            config: ConfigFile::parse(ini).unwrap(),
            json: false,
        }
    }

    #[test]
    fn test_bucket_precedence() {
        let ctx = context("[s3]\nbucket = from-config\n");
        assert_eq!(ctx.bucket(Some("from-cli".into())).unwrap(), "from-cli");
        assert_eq!(ctx.bucket(None).unwrap(), "from-config");
        assert!(context("").bucket(None).is_err());
    }

    #[test]
    fn test_manager_config_precedence() {
        let ctx = context("[transfer]\nstrategy = hybrid\nworkers = 4\n");

        let from_config = ctx.manager_config(None, None);
        assert_eq!(from_config.strategy, ExecutionStrategy::Hybrid);
        assert_eq!(from_config.workers, 4);

        let from_cli = ctx.manager_config(Some(StrategyArg::Cooperative), Some(9));
        assert_eq!(from_cli.strategy, ExecutionStrategy::Cooperative);
        assert_eq!(from_cli.workers, 9);
    }

    #[test]
    fn test_load_explicit_config_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[s3]\nbucket = scans\n").unwrap();

        let ctx = Context::load(Some(&path), true).unwrap();
        assert!(ctx.json);
        assert_eq!(ctx.bucket(None).unwrap(), "scans");
    }

    #[test]
    fn test_load_missing_config_is_config_error() {
        let err = Context::load(Some(Path::new("/no/such/s3bulk.ini")), false)
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_pool_connections_follow_workers() {
        assert_eq!(context("").pool_connections(5), 10);
        assert_eq!(
            context("[transfer]\npool_connections = 3\n").pool_connections(5),
            3
        );
    }

    #[test]
    fn test_report_failures_are_errors() {
        let ok = TransferBatchResult {
            success_count: 2,
            ..Default::default()
        };
        assert!(report(&ok, true).is_ok());

        let failed = TransferBatchResult {
            success_count: 1,
            failure_count: 1,
            ..Default::default()
        };
        assert!(matches!(
            report(&failed, true),
            Err(CliError::TransfersFailed { failed: 1, total: 2 })
        ));
    }
}
