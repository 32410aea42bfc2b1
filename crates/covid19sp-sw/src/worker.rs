//! The offline cache manager: install, activate and fetch handling.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use covid19sp_core::{CacheVersion, OfflineConfig};
use covid19sp_net::{is_same_origin, origin_string, Fetcher, Request, Response};
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::{Result, ServiceWorkerError};

// ==================== State ====================

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WorkerState {
    /// Created, install not started.
    #[default]
    Parsed,
    /// Precaching the manifest.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Cleaning up old generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Install failed or replaced by a newer worker.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Parsed => write!(f, "parsed"),
            WorkerState::Installing => write!(f, "installing"),
            WorkerState::Installed => write!(f, "installed"),
            WorkerState::Activating => write!(f, "activating"),
            WorkerState::Activated => write!(f, "activated"),
            WorkerState::Redundant => write!(f, "redundant"),
        }
    }
}

/// Notifications for the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// State changed.
    StateChange {
        cache_name: String,
        state: WorkerState,
    },
    /// Open pages are now controlled by this worker.
    ControllerChange { cache_name: String, claimed: usize },
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub cache_name: String,
    pub stored: usize,
    pub bytes: usize,
}

/// Outcome of activation cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivateReport {
    /// Generations removed.
    pub deleted: Vec<String>,
    /// Generations whose deletion failed; they are left in place.
    pub failed: Vec<String>,
    /// Pages that switched to this worker.
    pub claimed: usize,
}

// ==================== Manager ====================

/// Offline cache manager for one deployed version.
pub struct OfflineCacheManager {
    version: CacheVersion,
    cache_name: String,
    scope: Url,
    precache: Vec<Url>,
    store_timeout: Duration,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<dyn Clients>,
    state: RwLock<WorkerState>,
    skip_waiting: AtomicBool,
    events: OnceLock<mpsc::UnboundedSender<WorkerEvent>>,
}

impl fmt::Debug for OfflineCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OfflineCacheManager")
            .field("cache_name", &self.cache_name)
            .field("scope", &self.scope.as_str())
            .field("precache", &self.precache.len())
            .finish_non_exhaustive()
    }
}

impl OfflineCacheManager {
    /// Create a manager for the version described by `config`.
    ///
    /// The manifest is resolved against the scope up front, so a bad manifest
    /// fails here rather than during install.
    pub fn new(
        config: &OfflineConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        clients: Arc<dyn Clients>,
    ) -> Result<Self> {
        config.validate()?;
        let version = config.cache_version()?;
        let precache = config.manifest.resolve(&config.scope)?;

        Ok(Self {
            cache_name: version.name(),
            version,
            scope: config.scope.clone(),
            precache,
            store_timeout: config.store_timeout(),
            storage,
            fetcher,
            clients,
            state: RwLock::new(WorkerState::Parsed),
            skip_waiting: AtomicBool::new(false),
            events: OnceLock::new(),
        })
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    /// Name of the current cache generation.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Resolved manifest URLs, in manifest order.
    pub fn precache_urls(&self) -> &[Url] {
        &self.precache
    }

    pub async fn state(&self) -> WorkerState {
        *self.state.read().await
    }

    /// Whether install asked to activate without waiting for old pages to close.
    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    /// Send state changes to `tx`. Only the first channel attached is used.
    pub fn attach_events(&self, tx: mpsc::UnboundedSender<WorkerEvent>) {
        let _ = self.events.set(tx);
    }

    fn emit(&self, event: WorkerEvent) {
        if let Some(tx) = self.events.get() {
            let _ = tx.send(event);
        }
    }

    async fn set_state(&self, state: WorkerState) {
        {
            let mut current = self.state.write().await;
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!(cache = %self.cache_name, %state, "Worker state changed");
        self.emit(WorkerEvent::StateChange {
            cache_name: self.cache_name.clone(),
            state,
        });
    }

    /// Replaced by a newer worker.
    pub async fn mark_redundant(&self) {
        self.set_state(WorkerState::Redundant).await;
    }

    // ==================== Install ====================

    /// Precache every manifest resource into the current generation.
    ///
    /// The batch is all-or-nothing: a transport failure or non-2xx status on any
    /// resource fails the install before anything is stored.
    pub async fn install(&self) -> Result<InstallReport> {
        self.set_state(WorkerState::Installing).await;
        self.skip_waiting.store(true, Ordering::Release);

        info!(
            cache = %self.cache_name,
            resources = self.precache.len(),
            "Saving resources to the cache"
        );

        let existed = match self.storage.has(&self.cache_name).await {
            Ok(existed) => existed,
            Err(e) => {
                self.set_state(WorkerState::Redundant).await;
                return Err(e);
            }
        };

        match self.precache_all().await {
            Ok(report) => {
                info!(
                    cache = %self.cache_name,
                    stored = report.stored,
                    bytes = report.bytes,
                    "Install complete"
                );
                self.set_state(WorkerState::Installed).await;
                Ok(report)
            }
            Err(e) => {
                if !existed {
                    self.discard_generation().await;
                }
                self.set_state(WorkerState::Redundant).await;
                Err(e)
            }
        }
    }

    /// Drop a generation this install created, so a later `resume` cannot adopt it.
    async fn discard_generation(&self) {
        match self.storage.delete(&self.cache_name).await {
            Ok(true) => debug!(cache = %self.cache_name, "Discarded incomplete cache"),
            Ok(false) => {}
            Err(e) => {
                warn!(cache = %self.cache_name, error = %e, "Failed to discard incomplete cache");
            }
        }
    }

    async fn precache_all(&self) -> Result<InstallReport> {
        let fetches = self.precache.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = self.fetcher.fetch(&request).await?;
            if !response.ok() {
                return Err(ServiceWorkerError::BadStatus {
                    url: url.clone(),
                    status: response.status,
                });
            }
            trace!(url = %url, bytes = response.body.len(), "Precached");
            Ok::<_, ServiceWorkerError>((request, response))
        });
        let entries = try_join_all(fetches).await?;

        self.storage.open(&self.cache_name).await?;

        let report = InstallReport {
            cache_name: self.cache_name.clone(),
            stored: entries.len(),
            bytes: entries.iter().map(|(_, r)| r.body.len()).sum(),
        };
        self.storage.put_all(&self.cache_name, entries).await?;
        Ok(report)
    }

    // ==================== Activate ====================

    /// Delete every other generation, then claim open pages.
    ///
    /// The worker ends up active even when this returns an error; the error
    /// only reports what was left undone.
    pub async fn activate(&self) -> Result<ActivateReport> {
        let state = self.state().await;
        if state != WorkerState::Installed {
            return Err(ServiceWorkerError::StateError(format!(
                "cannot activate a worker in state {state}"
            )));
        }
        self.set_state(WorkerState::Activating).await;

        let result = self.cleanup_and_claim().await;

        self.set_state(WorkerState::Activated).await;
        info!(cache = %self.cache_name, "Worker activated");
        result
    }

    async fn cleanup_and_claim(&self) -> Result<ActivateReport> {
        let names = self.storage.keys().await?;
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        let deletions = stale.iter().map(|name| async move {
            info!(cache = %name, "Deleting old cache");
            (name, self.storage.delete(name).await)
        });

        let mut report = ActivateReport::default();
        for (name, result) in join_all(deletions).await {
            match result {
                Ok(true) => report.deleted.push(name.clone()),
                Ok(false) => debug!(cache = %name, "Cache already gone"),
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete old cache");
                    report.failed.push(name.clone());
                }
            }
        }

        report.claimed = self.clients.claim(&self.scope, &self.cache_name).await?;
        self.emit(WorkerEvent::ControllerChange {
            cache_name: self.cache_name.clone(),
            claimed: report.claimed,
        });
        Ok(report)
    }

    /// Re-enter the active state for a generation installed by an earlier run.
    ///
    /// The generation must hold every manifest resource; an empty or partial
    /// one left by a failed install is refused.
    pub async fn resume(&self) -> Result<()> {
        if !self.storage.has(&self.cache_name).await? {
            return Err(ServiceWorkerError::NotFound(format!(
                "cache {} has not been installed",
                self.cache_name
            )));
        }

        let stored: HashSet<String> = self
            .storage
            .request_keys(&self.cache_name)
            .await?
            .into_iter()
            .collect();
        let missing = self
            .precache
            .iter()
            .filter(|url| !stored.contains(&Request::get((*url).clone()).cache_key()))
            .count();
        if missing > 0 {
            return Err(ServiceWorkerError::NotFound(format!(
                "cache {} is incomplete ({missing} of {} resources missing)",
                self.cache_name,
                self.precache.len()
            )));
        }

        self.set_state(WorkerState::Activated).await;
        Ok(())
    }

    // ==================== Fetch ====================

    /// Handle one intercepted request.
    ///
    /// Returns `None` for cross-origin requests: they are not intercepted and the
    /// cache is neither read nor written.
    pub async fn handle_fetch(&self, request: &Request) -> Option<Result<Response>> {
        if !is_same_origin(&request.url, &self.scope) {
            trace!(
                url = %request.url,
                origin = %origin_string(&request.url),
                "Cross-origin request, not intercepted"
            );
            return None;
        }
        Some(self.respond(request).await)
    }

    async fn respond(&self, request: &Request) -> Result<Response> {
        match self.storage.match_request(&self.cache_name, request).await {
            Ok(Some(cached)) => {
                debug!(url = %request.url, "Serving from cache");
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(url = %request.url, error = %e, "Cache lookup failed, treating as a miss");
            }
        }

        debug!(url = %request.url, "Fetching from network");
        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Could not fetch resource");
                return Err(e.into());
            }
        };

        let store = self.storage.put(&self.cache_name, request, &response);
        match timeout(self.store_timeout, store).await {
            Ok(Ok(())) => trace!(url = %request.url, "Stored network response"),
            Ok(Err(e)) => {
                warn!(
                    url = %request.url,
                    error = %e,
                    "Failed to store response, returning it uncached"
                );
            }
            Err(_) => {
                warn!(
                    url = %request.url,
                    timeout = ?self.store_timeout,
                    "Storing response timed out, returning it uncached"
                );
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClientList, MemoryCacheStorage};
    use async_trait::async_trait;
    use covid19sp_core::Manifest;
    use covid19sp_net::NetError;
    use http::StatusCode;

    struct EchoFetcher;

    #[async_trait]
    impl Fetcher for EchoFetcher {
        async fn fetch(&self, request: &Request) -> std::result::Result<Response, NetError> {
            Ok(Response::new(
                request.url.clone(),
                StatusCode::OK,
                request.url.path().to_string(),
            ))
        }
    }

    fn manager(storage: Arc<MemoryCacheStorage>) -> OfflineCacheManager {
        let config = OfflineConfig {
            scope: Url::parse("https://example.org/site/").unwrap(),
            cache_label: "X".to_string(),
            manifest: Manifest::new(["index.html", "app.js"]),
            ..Default::default()
        };
        OfflineCacheManager::new(
            &config,
            storage,
            Arc::new(EchoFetcher),
            Arc::new(ClientList::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Activated.to_string(), "activated");
        assert_eq!(WorkerState::default(), WorkerState::Parsed);
    }

    #[test]
    fn test_new_resolves_manifest() {
        let manager = manager(Arc::new(MemoryCacheStorage::new()));
        assert_eq!(manager.cache_name(), "X-01");
        assert_eq!(
            manager.precache_urls()[1].as_str(),
            "https://example.org/site/app.js"
        );
    }

    #[test]
    fn test_new_rejects_bad_manifest() {
        let config = OfflineConfig {
            manifest: Manifest::new(["a.js", "a.js"]),
            ..Default::default()
        };
        let result = OfflineCacheManager::new(
            &config,
            Arc::new(MemoryCacheStorage::new()),
            Arc::new(EchoFetcher),
            Arc::new(ClientList::new()),
        );
        assert!(matches!(result, Err(ServiceWorkerError::Config(_))));
    }

    #[tokio::test]
    async fn test_state_transitions_emit_events() {
        let manager = manager(Arc::new(MemoryCacheStorage::new()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_events(tx);

        manager.install().await.unwrap();
        manager.activate().await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let WorkerEvent::StateChange { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                WorkerState::Installing,
                WorkerState::Installed,
                WorkerState::Activating,
                WorkerState::Activated,
            ]
        );
        assert!(manager.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let manager = manager(Arc::new(MemoryCacheStorage::new()));
        assert!(matches!(
            manager.activate().await,
            Err(ServiceWorkerError::StateError(_))
        ));
        assert_eq!(manager.state().await, WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_resume_requires_generation() {
        let storage = Arc::new(MemoryCacheStorage::new());
        let first = manager(Arc::clone(&storage));
        assert!(matches!(
            first.resume().await,
            Err(ServiceWorkerError::NotFound(_))
        ));

        storage.open("X-01").await.unwrap();
        assert!(matches!(
            first.resume().await,
            Err(ServiceWorkerError::NotFound(_))
        ));

        first.install().await.unwrap();
        let restarted = manager(Arc::clone(&storage));
        restarted.resume().await.unwrap();
        assert_eq!(restarted.state().await, WorkerState::Activated);
    }
}
