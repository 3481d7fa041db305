//! `s3bulk upload`: upload files and directories.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use s3bulk::orchestrator::collect_files;
use tokio_util::sync::CancellationToken;

use super::common::{build_runtime, cancel_on_ctrlc, report, Context, StrategyArg};
use crate::error::CliError;
use crate::progress::TerminalProgress;

/// Arguments for `upload`.
#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Files or directories to upload. Directories are uploaded recursively,
    /// flattened to their file names.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Key prefix the files are stored under (e.g. uploads/2024/)
    #[arg(long, default_value = "")]
    pub key: String,

    /// Bucket to upload to (defaults to the configured bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Execution strategy (overrides config)
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Concurrent transfers (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,
}

/// Run the `upload` command.
pub fn run(args: UploadArgs, ctx: &Context) -> Result<(), CliError> {
    let bucket = ctx.bucket(args.bucket)?;
    let config = ctx.manager_config(args.strategy, args.workers);
    let files = expand_paths(args.paths)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrlc(cancel.clone())?;
    let progress = Arc::new(TerminalProgress::new(ctx.json));
    let runtime = build_runtime()?;

    let result = runtime.block_on(async {
        let manager = ctx.manager(config, Arc::clone(&progress), cancel).await;
        manager.upload_batch_async(&bucket, &args.key, &files).await
    });
    progress.finish();

    report(&result?, ctx.json)
}

/// Replace each directory with the files below it, keeping argument order.
///
/// Anything that is not a directory is passed through so a missing file is
/// counted as a failed transfer rather than aborting the batch.
fn expand_paths(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, CliError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        if path.is_dir() {
            files.extend(collect_files(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_paths_flattens_directories_into_one_list() {
        let dir = tempfile::tempdir().unwrap();
        let loose = dir.path().join("loose.txt");
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("nested")).unwrap();
        std::fs::write(&loose, b"1").unwrap();
        std::fs::write(tree.join("a.txt"), b"2").unwrap();
        std::fs::write(tree.join("nested/b.txt"), b"3").unwrap();

        let files = expand_paths(vec![loose.clone(), tree.clone()]).unwrap();

        assert_eq!(
            files,
            vec![loose, tree.join("a.txt"), tree.join("nested/b.txt")]
        );
    }

    #[test]
    fn test_expand_paths_keeps_missing_files() {
        let missing = PathBuf::from("/no/such/file.txt");
        assert_eq!(expand_paths(vec![missing.clone()]).unwrap(), vec![missing]);
    }
}
