//! s3bulk - parallel bulk transfers against S3-compatible object stores.
//!
//! The library is organised in three layers:
//!
//! ```text
//! BulkTransferManager (orchestrator)
//!         │
//!         ├── ExecutionStrategy
//!         │       ├── Pooled       (fixed worker threads)
//!         │       ├── Cooperative  (async tasks on one shared client)
//!         │       └── Hybrid       (async tasks delegating to the blocking pool)
//!         │
//!         ├── transfer (one upload or download, never fails outward)
//!         │
//!         └── store (BlobStore / AsyncBlobStore: S3, in-memory)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use s3bulk::config::ConfigFile;
//! use s3bulk::orchestrator::BulkTransferManager;
//! use s3bulk::store::S3Store;
//!
//! let config = ConfigFile::load()?.with_env_fallbacks();
//! let store = S3Store::connect(&config.s3, config.pool_connections(), config.timeout()).await;
//! let manager = BulkTransferManager::new(Arc::new(store), config.manager_config());
//!
//! let keys = manager.list_async("documents", "scans/", Some(".pdf")).await;
//! let result = manager
//!     .download_batch_async("documents", &keys, "/tmp/out", true)
//!     .await?;
//! println!("{} ok, {} failed", result.success_count, result.failure_count);
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod orchestrator;
pub mod store;
pub mod transfer;
pub mod tree;

pub use error::{ConfigError, TransferError, TransferResult};
pub use key::ObjectKey;
pub use orchestrator::{BulkTransferManager, ExecutionStrategy, ManagerConfig, TransferBatchResult};

/// Crate version, for banners and user agents.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
