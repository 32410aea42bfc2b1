//! Open pages the worker can take control of.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::Result;

/// A client (open page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Cache generation of the worker controlling this page, if any.
    pub controller: Option<String>,
}

/// Clients API consumed by the worker during activation.
#[async_trait]
pub trait Clients: Send + Sync {
    /// Make `controller` the controller of every open page inside `scope`.
    ///
    /// Returns the number of pages whose controller changed.
    async fn claim(&self, scope: &Url, controller: &str) -> Result<usize>;
}

/// In-memory list of open pages.
#[derive(Debug, Default)]
pub struct ClientList {
    clients: RwLock<HashMap<String, Client>>,
}

impl ClientList {
    /// Create an empty client list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page, initially uncontrolled.
    pub async fn open(&self, url: Url) -> Client {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let client = Client {
            id: format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)),
            url,
            controller: None,
        };
        self.clients
            .write()
            .await
            .insert(client.id.clone(), client.clone());
        client
    }

    /// Remove a closed page.
    pub async fn close(&self, id: &str) -> Option<Client> {
        self.clients.write().await.remove(id)
    }

    /// Get a client by ID.
    pub async fn get(&self, id: &str) -> Option<Client> {
        self.clients.read().await.get(id).cloned()
    }
}

#[async_trait]
impl Clients for ClientList {
    async fn claim(&self, scope: &Url, controller: &str) -> Result<usize> {
        let mut clients = self.clients.write().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if !client.url.as_str().starts_with(scope.as_str()) {
                continue;
            }
            if client.controller.as_deref() != Some(controller) {
                client.controller = Some(controller.to_string());
                claimed += 1;
            }
        }
        debug!(scope = %scope, controller, claimed, "Clients claimed");
        Ok(claimed)
    }
}
