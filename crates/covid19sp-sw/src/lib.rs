//! # Covid19-SP Offline Cache
//!
//! The offline-caching worker of the Covid19-SP dashboard.
//!
//! ## Features
//!
//! - **Install**: precache the manifest into the current cache generation as one batch
//! - **Activate**: delete every other generation, then claim open pages
//! - **Fetch**: cache-first for same-origin requests, store-then-return on a miss
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost (registration)
//!     ├── installing / waiting / active (OfflineCacheManager)
//!     └── Fetcher (default network handling)
//!
//! OfflineCacheManager
//!     ├── CacheStorage (generation name → Request → Response)
//!     ├── Fetcher
//!     └── Clients
//! ```

use covid19sp_core::ConfigError;
use covid19sp_net::NetError;
use http::StatusCode;
use thiserror::Error;
use url::Url;

pub mod cache;
pub mod clients;
pub mod disk;
pub mod host;
pub mod worker;

pub use cache::{CacheEntry, CacheStorage, MemoryCacheStorage};
pub use clients::{Client, ClientList, Clients};
pub use disk::DiskCacheStorage;
pub use host::ServiceWorkerHost;
pub use worker::{ActivateReport, InstallReport, OfflineCacheManager, WorkerEvent, WorkerState};

// ==================== Errors ====================

/// Errors that can occur in offline cache operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Bad response for {url}: {status}")]
    BadStatus { url: Url, status: StatusCode },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not cacheable: {0}")]
    NotCacheable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for offline cache operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;
