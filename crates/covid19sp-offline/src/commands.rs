//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use covid19sp_core::OfflineConfig;
use covid19sp_net::{origin_string, LoaderConfig, Request, ResourceLoader};
use covid19sp_sw::{
    CacheStorage, ClientList, DiskCacheStorage, OfflineCacheManager, ServiceWorkerHost,
    WorkerEvent, WorkerState,
};
use tokio::sync::mpsc;
use tracing::info;
use url::Url;

/// Defaults, then the config file, then command-line overrides.
pub fn load_config(
    path: Option<&Path>,
    storage: Option<PathBuf>,
    scope: Option<Url>,
) -> Result<OfflineConfig> {
    let mut config = match path {
        Some(path) => OfflineConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => OfflineConfig::default(),
    };
    if let Some(storage) = storage {
        config.storage_dir = storage;
    }
    if let Some(scope) = scope {
        config.scope = scope;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Absolute URLs are used as-is; anything else is relative to the scope.
pub fn resolve_target(scope: &Url, target: &str) -> Result<Url> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(_) => scope
            .join(target)
            .with_context(|| format!("Cannot resolve '{target}' against {scope}")),
    }
}

struct Offline {
    config: OfflineConfig,
    storage: Arc<DiskCacheStorage>,
    loader: Arc<ResourceLoader>,
}

impl Offline {
    async fn open(config: OfflineConfig) -> Result<Self> {
        let storage = DiskCacheStorage::new(&config.storage_dir)
            .await
            .with_context(|| format!("Cannot open storage at {}", config.storage_dir.display()))?;
        let loader = ResourceLoader::new(LoaderConfig {
            user_agent: config.user_agent.clone(),
            default_timeout: config.request_timeout(),
            ..Default::default()
        })?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
            loader: Arc::new(loader),
        })
    }

    fn manager(&self) -> Result<Arc<OfflineCacheManager>> {
        let manager = OfflineCacheManager::new(
            &self.config,
            self.storage.clone(),
            self.loader.clone(),
            Arc::new(ClientList::new()),
        )?;
        Ok(Arc::new(manager))
    }

    fn host(&self) -> (ServiceWorkerHost, mpsc::UnboundedReceiver<WorkerEvent>) {
        ServiceWorkerHost::new(self.loader.clone())
    }
}

fn print_events(events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            WorkerEvent::StateChange { cache_name, state } => {
                println!("  {cache_name}: {state}");
            }
            WorkerEvent::ControllerChange {
                cache_name,
                claimed,
            } => {
                println!("  {cache_name}: controlling {claimed} page(s)");
            }
        }
    }
}

pub async fn install(config: OfflineConfig) -> Result<()> {
    let offline = Offline::open(config).await?;
    let manager = offline.manager()?;
    let (host, mut events) = offline.host();

    info!(cache = %manager.cache_name(), scope = %manager.scope(), "Installing");
    let state = host.register(Arc::clone(&manager)).await;
    print_events(&mut events);

    if state != WorkerState::Activated {
        bail!(
            "Install of {} did not complete (state: {state}); see the log for the cause",
            manager.cache_name()
        );
    }

    let stored = offline.storage.request_keys(manager.cache_name()).await?;
    println!("Installed {} ({} entries)", manager.cache_name(), stored.len());
    for name in offline.storage.keys().await? {
        println!("  generation: {name}");
    }
    Ok(())
}

pub async fn fetch(config: OfflineConfig, target: &str, output: Option<PathBuf>) -> Result<()> {
    let url = resolve_target(&config.scope, target)?;
    let offline = Offline::open(config).await?;
    let (host, _events) = offline.host();

    host.resume(offline.manager()?)
        .await
        .context("No complete cache for this version; run `install` first")?;

    let response = host
        .fetch(&Request::get(url.clone()))
        .await
        .with_context(|| format!("Failed to fetch {url}"))?;

    let source = if response.from_cache { "cache" } else { "network" };
    println!(
        "{} {} ({source}, {} bytes)",
        response.status,
        url,
        response.body.len()
    );

    if let Some(path) = output {
        tokio::fs::write(&path, &response.body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}

pub async fn list(config: OfflineConfig) -> Result<()> {
    let current = config.cache_version()?.name();
    let offline = Offline::open(config).await?;

    let names = offline.storage.keys().await?;
    if names.is_empty() {
        println!("No cache generations in {}", offline.storage.root().display());
        return Ok(());
    }

    for name in names {
        let keys = offline.storage.request_keys(&name).await?;
        let marker = if name == current { " (current)" } else { "" };
        println!("{name}{marker}: {} entries", keys.len());
        for key in keys {
            println!("  {key}");
        }
    }
    Ok(())
}

pub fn manifest(config: &OfflineConfig) -> Result<()> {
    let urls = config.manifest.resolve(&config.scope)?;
    println!(
        "{} ({} resources from {})",
        config.cache_version()?,
        urls.len(),
        origin_string(&config.scope)
    );
    for url in urls {
        println!("  {url}");
    }
    Ok(())
}

/// Advance the version key stored in the config file.
///
/// Only the file's own contents are rewritten; command-line overrides are not saved.
pub fn bump(path: Option<&Path>, date: NaiveDate) -> Result<()> {
    let path = path.context("`bump` rewrites a config file; pass --config")?;
    let mut config = OfflineConfig::load(path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;

    let current = config.cache_version()?;
    let next = current.next_for(date);
    config.cache_label = next.label.clone();
    config.cache_version = next.version;
    config
        .save(path)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;

    info!(from = %current, to = %next, "Cache version bumped");
    println!("{current} -> {next}");
    Ok(())
}
