//! Covid19-SP Core Library
//!
//! Shared configuration for the offline cache: the cache version key, the
//! precache manifest and the deployment settings that tie them together.

pub mod config;
pub mod error;
pub mod manifest;
pub mod version;

pub use config::OfflineConfig;
pub use error::{ConfigError, ConfigResult};
pub use manifest::Manifest;
pub use version::CacheVersion;
