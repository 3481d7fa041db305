//! `s3bulk download` and `s3bulk download-prefix`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::common::{build_runtime, cancel_on_ctrlc, report, Context, StrategyArg};
use crate::error::CliError;
use crate::progress::TerminalProgress;

/// Arguments for `download`.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Object keys to download
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Local directory to download into
    #[arg(long)]
    pub to: PathBuf,

    /// Bucket to download from (defaults to the configured bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Put every file directly in the target directory instead of recreating key folders
    #[arg(long)]
    pub flat: bool,

    /// Execution strategy (overrides config)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Concurrent transfers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Arguments for `download-prefix`.
#[derive(Debug, Args)]
pub struct DownloadPrefixArgs {
    /// Key prefixes (folders) to download in full
    #[arg(required = true)]
    pub prefixes: Vec<String>,

    /// Local directory to download into
    #[arg(long)]
    pub to: PathBuf,

    /// Bucket to download from (defaults to the configured bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Execution strategy (overrides config)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Concurrent transfers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Run the `download` command.
pub fn run(args: DownloadArgs, ctx: &Context) -> Result<(), CliError> {
    let bucket = ctx.bucket(args.bucket)?;
    let config = ctx.manager_config(args.strategy, args.workers);
    let keep_structure = !args.flat && ctx.config.transfer.keep_structure;

    let cancel = CancellationToken::new();
    cancel_on_ctrlc(cancel.clone())?;
    let progress = Arc::new(TerminalProgress::new(ctx.json));
    let runtime = build_runtime()?;

    info!(
        bucket = %bucket,
        keys = args.keys.len(),
        destination = %args.to.display(),
        strategy = %config.strategy,
        "Downloading"
    );
    let result = runtime.block_on(async {
        let manager = ctx.manager(config, Arc::clone(&progress), cancel).await;
        manager
            .download_batch_async(&bucket, &args.keys, &args.to, keep_structure)
            .await
    });
    progress.finish();

    report(&result?, ctx.json)
}

/// Run the `download-prefix` command.
pub fn run_prefixes(args: DownloadPrefixArgs, ctx: &Context) -> Result<(), CliError> {
    let bucket = ctx.bucket(args.bucket)?;
    let config = ctx.manager_config(args.strategy, args.workers);

    let cancel = CancellationToken::new();
    cancel_on_ctrlc(cancel.clone())?;
    let progress = Arc::new(TerminalProgress::new(ctx.json));
    let runtime = build_runtime()?;

    let result = runtime.block_on(async {
        let manager = ctx.manager(config, Arc::clone(&progress), cancel).await;
        manager
            .download_prefixes_async(&bucket, &args.prefixes, &args.to)
            .await
    });
    progress.finish();

    report(&result?, ctx.json)
}
