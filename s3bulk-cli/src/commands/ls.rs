//! `s3bulk ls`: list keys under a prefix.

use std::sync::Arc;

use clap::Args;
use console::style;
use s3bulk::tree::{extract_folders, FolderTree, TREE_TITLE};
use s3bulk::ObjectKey;
use tokio_util::sync::CancellationToken;

use super::common::{build_runtime, Context};
use crate::error::CliError;
use crate::progress::TerminalProgress;

/// Arguments for `ls`.
#[derive(Debug, Args)]
pub struct LsArgs {
    /// Key prefix to list (e.g. docs/2024/)
    #[arg(default_value = "")]
    pub prefix: String,

    /// Bucket to list (defaults to the configured bucket)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Only keys ending with this extension (e.g. .pdf)
    #[arg(long)]
    pub ext: Option<String>,

    /// Show keys as a folder tree
    #[arg(long, conflicts_with = "folders")]
    pub tree: bool,

    /// Show only the folders implied by the keys
    #[arg(long)]
    pub folders: bool,
}

/// Run the `ls` command.
pub fn run(args: LsArgs, ctx: &Context) -> Result<(), CliError> {
    let bucket = ctx.bucket(args.bucket)?;
    let runtime = build_runtime()?;

    let keys = runtime.block_on(async {
        let manager = ctx
            .manager(
                ctx.manager_config(None, None),
                Arc::new(TerminalProgress::new(true)),
                CancellationToken::new(),
            )
            .await;
        manager
            .list_async(&bucket, &args.prefix, args.ext.as_deref())
            .await
    });

    let folders = args.folders.then(|| extract_folders(&keys));

    if ctx.json {
        let text = match &folders {
            Some(folders) => serde_json::to_string_pretty(folders),
            None => serde_json::to_string_pretty(&keys),
        }
        .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{}", text);
        return Ok(());
    }

    if keys.is_empty() {
        println!("No objects found under {}/{}", bucket, args.prefix);
        return Ok(());
    }

    if let Some(folders) = folders {
        for folder in folders {
            println!("{}", folder);
        }
    } else if args.tree {
        print_tree(&keys);
    } else {
        for key in &keys {
            println!("{}", key);
        }
    }
    Ok(())
}

fn print_tree(keys: &[ObjectKey]) {
    let rendered = FolderTree::from_keys(keys).render();
    let body = rendered.strip_prefix(TREE_TITLE).unwrap_or(&rendered);
    print!("{}{}", style(TREE_TITLE).bold().blue(), body);
}
