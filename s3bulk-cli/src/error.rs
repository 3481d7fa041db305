//! CLI error type and exit codes.

use std::fmt;

use s3bulk::ConfigError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Missing or invalid configuration.
    Config(String),
    /// The async runtime or a signal handler could not be set up.
    Runtime(String),
    /// Some transfers in the batch failed.
    TransfersFailed { failed: usize, total: usize },
    /// Writing command output failed.
    Output(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 2,
            CliError::Runtime(_) | CliError::Output(_) => 1,
            CliError::TransfersFailed { .. } => 3,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::TransfersFailed { failed, total } => {
                write!(f, "{} of {} transfers failed", failed, total)
            }
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}
