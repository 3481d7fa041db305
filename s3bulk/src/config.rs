//! Configuration file handling.
//!
//! Settings live in an INI file, by default `~/.config/s3bulk/config.ini`:
//!
//! ```ini
//! [s3]
//! endpoint = https://minio.local:9000
//! region = us-east-1
//! access_key_id = AKIA...
//! secret_access_key = ...
//! bucket = documents
//!
//! [transfer]
//! strategy = pooled
//! workers = 8
//! pool_connections = 16
//! timeout_secs = 300
//! keep_structure = true
//!
//! [logging]
//! level = info
//! file = /var/log/s3bulk.log
//! ```
//!
//! Every key is optional. Missing credentials, region and endpoint fall back
//! to the standard `AWS_*` environment variables, then to the SDK's own
//! provider chain.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use crate::error::ConfigError;
use crate::logging::LoggingConfig;
use crate::orchestrator::{default_workers, ExecutionStrategy, ManagerConfig};
use crate::store::ConnectionSlots;

/// Connection settings for the object store.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Default bucket when a command does not name one.
    pub bucket: Option<String>,
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("bucket", &self.bucket)
            .finish()
    }
}

/// Transfer tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    pub strategy: ExecutionStrategy,
    /// Concurrent transfers. Defaults to the CPU count.
    pub workers: Option<usize>,
    /// Connection slots. Defaults to twice the worker count.
    pub pool_connections: Option<usize>,
    pub timeout_secs: Option<u64>,
    /// Recreate key folders locally on download.
    pub keep_structure: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::default(),
            workers: None,
            pool_connections: None,
            timeout_secs: None,
            keep_structure: true,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub s3: S3Settings,
    pub transfer: TransferSettings,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("s3bulk").join("config.ini"))
    }

    /// Load from the default location, or use defaults when there is no file.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|e| match e {
            ConfigError::Read { reason, .. } => ConfigError::Read {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read {
            path: PathBuf::new(),
            reason: e.to_string(),
        })?;

        let mut config = Self::default();

        if let Some(section) = ini.section(Some("s3")) {
            config.s3 = S3Settings {
                endpoint: string(section, "endpoint"),
                region: string(section, "region"),
                access_key_id: string(section, "access_key_id"),
                secret_access_key: string(section, "secret_access_key"),
                bucket: string(section, "bucket"),
            };
        }

        if let Some(section) = ini.section(Some("transfer")) {
            if let Some(strategy) = parsed::<ExecutionStrategy>(section, "transfer.strategy", "strategy")? {
                config.transfer.strategy = strategy;
            }
            config.transfer.workers = parsed(section, "transfer.workers", "workers")?;
            config.transfer.pool_connections =
                parsed(section, "transfer.pool_connections", "pool_connections")?;
            config.transfer.timeout_secs = parsed(section, "transfer.timeout_secs", "timeout_secs")?;
            if let Some(keep) = string(section, "keep_structure") {
                config.transfer.keep_structure = parse_bool("transfer.keep_structure", &keep)?;
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(level) = string(section, "level") {
                config.logging.level = level;
            }
            config.logging.file = string(section, "file").map(PathBuf::from);
        }

        Ok(config)
    }

    /// Fill unset connection settings from the process environment.
    pub fn with_env_fallbacks(self) -> Self {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Fill unset connection settings from `lookup`.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fill = |slot: &mut Option<String>, name: &str| {
            if slot.is_none() {
                *slot = lookup(name).filter(|v| !v.trim().is_empty());
            }
        };
        fill(&mut self.s3.access_key_id, "AWS_ACCESS_KEY_ID");
        fill(&mut self.s3.secret_access_key, "AWS_SECRET_ACCESS_KEY");
        fill(&mut self.s3.region, "AWS_REGION");
        fill(&mut self.s3.endpoint, "AWS_ENDPOINT_URL");
        self
    }

    /// Effective worker count.
    pub fn workers(&self) -> usize {
        self.transfer.workers.unwrap_or_else(default_workers)
    }

    /// Effective connection slot count.
    pub fn pool_connections(&self) -> usize {
        self.transfer
            .pool_connections
            .unwrap_or_else(|| ConnectionSlots::for_workers(self.workers()).capacity())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.transfer.timeout_secs.map(Duration::from_secs)
    }

    /// Manager settings described by this file.
    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.transfer.strategy).with_workers(self.workers());
        if let Some(timeout) = self.timeout() {
            config = config.with_timeout(timeout);
        }
        config
    }
}

/// Trimmed value with any trailing `;` or `#` comment removed.
fn string(section: &Properties, key: &str) -> Option<String> {
    let raw = section.get(key)?;
    let value = [" ;", " #", "\t;", "\t#"]
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .map_or(raw, |cut| &raw[..cut])
        .trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parsed<T>(section: &Properties, field: &str, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    string(section, key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(field, format!("{:?}: {}", value, e)))
        })
        .transpose()
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(ConfigError::invalid(field, format!("{:?} is not a boolean", other))),
    }
}
