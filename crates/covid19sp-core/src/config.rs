//! Offline cache configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::manifest::Manifest;
use crate::version::CacheVersion;

/// Deployment settings for the offline cache.
///
/// Missing fields in a config file fall back to [`OfflineConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Worker scope; its origin is the only origin intercepted
    pub scope: Url,

    /// Human-readable part of the cache generation name
    pub cache_label: String,

    /// Version part of the cache generation name
    pub cache_version: u32,

    /// Resources precached at install time
    pub manifest: Manifest,

    /// Directory holding the on-disk cache generations
    pub storage_dir: PathBuf,

    /// Upper bound on the cache write done before a network response is returned
    pub store_timeout_ms: u64,

    /// Network request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent string
    pub user_agent: String,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            cache_label: "Covid19-SP-23/10/2021".to_string(),
            cache_version: 1,
            manifest: Manifest::default(),
            storage_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("covid19sp")
                .join("offline"),
            store_timeout_ms: 5_000,
            request_timeout_secs: 30,
            user_agent: format!("covid19sp-offline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

fn default_scope() -> Url {
    Url::parse("http://localhost:8000/Covid-19-em-Sao-Paulo/")
        .expect("default scope is a valid URL")
}

impl OfflineConfig {
    /// Read a JSON config file and validate it.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), contents)?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !matches!(self.scope.scheme(), "http" | "https") {
            return Err(ConfigError::scope(format!(
                "'{}' must use http or https",
                self.scope
            )));
        }
        if !self.scope.path().ends_with('/') {
            return Err(ConfigError::scope(format!(
                "'{}' must end with '/'",
                self.scope
            )));
        }
        self.cache_version()?;
        self.manifest.validate()
    }

    pub fn cache_version(&self) -> ConfigResult<CacheVersion> {
        CacheVersion::new(self.cache_label.clone(), self.cache_version)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = OfflineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.cache_version().unwrap().name(),
            "Covid19-SP-23/10/2021-01"
        );
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_scope_must_be_directory() {
        let config = OfflineConfig {
            scope: Url::parse("https://example.org/app/index.html").unwrap(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_scope_must_be_http() {
        let config = OfflineConfig {
            scope: Url::parse("file:///srv/site/").unwrap(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        std::fs::write(
            &path,
            r#"{ "scope": "https://example.org/site/", "cache_label": "X", "manifest": ["index.html", "app.js"] }"#,
        )
        .unwrap();

        let config = OfflineConfig::load(&path).unwrap();
        assert_eq!(config.scope.as_str(), "https://example.org/site/");
        assert_eq!(config.cache_version().unwrap().name(), "X-01");
        assert_eq!(config.manifest.len(), 2);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_rejects_bad_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        std::fs::write(&path, r#"{ "manifest": ["a.js", "a.js"] }"#).unwrap();

        assert!(matches!(
            OfflineConfig::load(&path),
            Err(ConfigError::InvalidManifest(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.json");
        let config = OfflineConfig {
            cache_version: 7,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = OfflineConfig::load(&path).unwrap();
        assert_eq!(loaded.cache_version, 7);
        assert_eq!(loaded.manifest, config.manifest);
    }
}
