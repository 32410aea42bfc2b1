//! On-disk cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<url-encoded generation name>/<sha256 of request key>.json
//! ```
//!
//! Each file holds one [`CacheEntry`]. Writes land in a temp file that is then
//! renamed over the target, so concurrent writers to one key are last-write-wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use covid19sp_net::{Request, Response};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::{ensure_cacheable, CacheEntry, CacheStorage};
use crate::{Result, ServiceWorkerError};

const ENTRY_EXTENSION: &str = "json";

/// Cache storage persisted in a directory tree.
#[derive(Debug, Clone)]
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Use `root` as the storage directory, creating it if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Disk cache storage ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name == "." || name == ".." {
            return Err(ServiceWorkerError::CacheError(format!(
                "invalid generation name '{name}'"
            )));
        }
        Ok(self.root.join(urlencoding::encode(name).as_ref()))
    }

    fn entry_path(&self, name: &str, request: &Request) -> Result<PathBuf> {
        let digest = Sha256::digest(request.cache_key().as_bytes());
        Ok(self
            .generation_dir(name)?
            .join(format!("{digest:x}.{ENTRY_EXTENSION}")))
    }

    async fn read_entry(path: &Path) -> Result<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_entry(&self, dir: &Path, path: &Path, entry: &CacheEntry) -> Result<()> {
        static TEMP_COUNTER: AtomicU64 = AtomicU64::new(1);

        fs::create_dir_all(dir).await?;
        let temp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, serde_json::to_vec(entry)?).await?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.generation_dir(name)?).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        match fs::metadata(self.generation_dir(name)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let raw = item.file_name();
            let raw = raw.to_string_lossy();
            match urlencoding::decode(&raw) {
                Ok(name) => names.push(name.into_owned()),
                Err(e) => warn!(dir = %raw, error = %e, "Skipping undecodable cache directory"),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match fs::remove_dir_all(self.generation_dir(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let path = self.entry_path(name, request)?;
        match Self::read_entry(&path).await? {
            Some(entry) if entry.key() == request.cache_key() => Ok(Some(entry.to_response()?)),
            Some(entry) => {
                warn!(
                    stored = %entry.key(),
                    wanted = %request.cache_key(),
                    "Cache entry key mismatch"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
        ensure_cacheable(request, response)?;
        let dir = self.generation_dir(name)?;
        let path = self.entry_path(name, request)?;
        self.write_entry(&dir, &path, &CacheEntry::new(request, response))
            .await
    }

    async fn request_keys(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.generation_dir(name)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(item) = entries.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(entry) = Self::read_entry(&path).await? {
                keys.push(entry.key());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
