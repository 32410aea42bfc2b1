//! Registration host: drives install/activate and routes fetches to the active worker.

use std::sync::Arc;

use covid19sp_net::{Fetcher, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info};

use crate::worker::{OfflineCacheManager, WorkerEvent, WorkerState};
use crate::Result;

/// Installing, waiting and active workers of one registration.
#[derive(Debug, Default)]
struct Registration {
    installing: Option<Arc<OfflineCacheManager>>,
    waiting: Option<Arc<OfflineCacheManager>>,
    active: Option<Arc<OfflineCacheManager>>,
}

/// The hosting side of the worker lifecycle.
///
/// Lifecycle handlers are awaited to completion before the lifecycle moves on;
/// their failures are logged here and never escape. Fetches run concurrently
/// and never hold the registration lock across I/O.
pub struct ServiceWorkerHost {
    registration: RwLock<Registration>,
    fetcher: Arc<dyn Fetcher>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorkerHost {
    /// Create a host. `fetcher` handles requests no worker intercepts.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(Registration::default()),
                fetcher,
                event_tx,
            },
            event_rx,
        )
    }

    /// Install a new worker version, activating it when it asked to skip waiting
    /// or when nothing is active yet.
    ///
    /// A failed install leaves the previous active worker serving.
    pub async fn register(&self, manager: Arc<OfflineCacheManager>) -> WorkerState {
        manager.attach_events(self.event_tx.clone());
        {
            let mut registration = self.registration.write().await;
            if let Some(previous) = registration.installing.replace(Arc::clone(&manager)) {
                previous.mark_redundant().await;
            }
        }

        let result = manager.install().await;

        let mut registration = self.registration.write().await;
        let still_current = registration
            .installing
            .as_ref()
            .is_some_and(|m| Arc::ptr_eq(m, &manager));
        if !still_current {
            debug!(cache = %manager.cache_name(), "Install superseded by a newer registration");
            manager.mark_redundant().await;
            return manager.state().await;
        }
        registration.installing = None;

        if let Err(e) = result {
            error!(
                cache = %manager.cache_name(),
                error = %e,
                "Install failed, the previous worker keeps serving"
            );
            return manager.state().await;
        }

        if let Some(previous) = registration.waiting.replace(Arc::clone(&manager)) {
            previous.mark_redundant().await;
        }
        let activate_now = manager.skip_waiting_requested() || registration.active.is_none();
        drop(registration);

        if activate_now {
            self.activate_waiting().await;
        }
        manager.state().await
    }

    /// Promote the waiting worker to active and run its activation.
    ///
    /// Activation failures are logged and not retried; the worker stays active.
    pub async fn activate_waiting(&self) -> Option<WorkerState> {
        let (manager, previous) = {
            let mut registration = self.registration.write().await;
            let manager = registration.waiting.take()?;
            let previous = registration.active.replace(Arc::clone(&manager));
            (manager, previous)
        };

        if let Some(previous) = previous {
            previous.mark_redundant().await;
        }

        match manager.activate().await {
            Ok(report) => info!(
                cache = %manager.cache_name(),
                deleted = report.deleted.len(),
                failed = report.failed.len(),
                claimed = report.claimed,
                "Activation complete"
            ),
            Err(e) => error!(
                cache = %manager.cache_name(),
                error = %e,
                "Activation incomplete, worker stays active"
            ),
        }
        Some(manager.state().await)
    }

    /// Make a worker whose generation was installed earlier the active one.
    pub async fn resume(&self, manager: Arc<OfflineCacheManager>) -> Result<WorkerState> {
        manager.attach_events(self.event_tx.clone());
        manager.resume().await?;

        let previous = self
            .registration
            .write()
            .await
            .active
            .replace(Arc::clone(&manager));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &manager) {
                previous.mark_redundant().await;
            }
        }
        info!(cache = %manager.cache_name(), "Resumed installed worker");
        Ok(manager.state().await)
    }

    pub async fn active(&self) -> Option<Arc<OfflineCacheManager>> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineCacheManager>> {
        self.registration.read().await.waiting.clone()
    }

    /// Serve a request from the page.
    ///
    /// The active worker handles it when it intercepts; otherwise the default
    /// network handling applies.
    pub async fn fetch(&self, request: &Request) -> Result<Response> {
        if let Some(worker) = self.active().await {
            if let Some(result) = worker.handle_fetch(request).await {
                return result;
            }
        }
        debug!(url = %request.url, "Default network handling");
        Ok(self.fetcher.fetch(request).await?)
    }
}
