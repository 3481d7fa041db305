//! s3bulk CLI - parallel bulk transfers for S3-compatible object stores.
//!
//! ```text
//! s3bulk ls scans/ --ext .pdf --tree
//! s3bulk download scans/a.pdf scans/b.pdf --to ./out
//! s3bulk download-prefix scans/2024/ --to ./out --strategy hybrid
//! s3bulk upload ./reports --key uploads/2024/ --workers 16
//! ```

mod commands;
mod error;
mod progress;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use s3bulk::logging::init_logging;

use commands::common::Context;
use commands::download::{DownloadArgs, DownloadPrefixArgs};
use commands::ls::LsArgs;
use commands::upload::UploadArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "s3bulk")]
#[command(version = s3bulk::VERSION)]
#[command(about = "Parallel bulk upload and download for S3-compatible object stores", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/s3bulk/config.ini)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List object keys under a prefix
    Ls(LsArgs),

    /// Download specific keys
    Download(DownloadArgs),

    /// Download every file under one or more prefixes
    DownloadPrefix(DownloadPrefixArgs),

    /// Upload files and directories
    Upload(UploadArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let ctx = Context::load(cli.config.as_deref(), cli.json)?;

    let mut logging = ctx.config.logging.clone();
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    let _guard = init_logging(&logging)
        .map_err(|e| CliError::Config(format!("Failed to open log file: {}", e)))?;

    match cli.command {
        Commands::Ls(args) => commands::ls::run(args, &ctx),
        Commands::Download(args) => commands::download::run(args, &ctx),
        Commands::DownloadPrefix(args) => commands::download::run_prefixes(args, &ctx),
        Commands::Upload(args) => commands::upload::run(args, &ctx),
    }
}
