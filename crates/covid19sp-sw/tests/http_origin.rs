//! End-to-end: a real HTTP origin, the reqwest loader and on-disk generations.

use std::sync::Arc;

use covid19sp_core::{Manifest, OfflineConfig};
use covid19sp_net::{LoaderConfig, Request, ResourceLoader};
use covid19sp_sw::{
    CacheStorage, ClientList, DiskCacheStorage, OfflineCacheManager, ServiceWorkerHost,
    WorkerState,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount(server: &MockServer, route: &str, body: &str, times: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(times)
        .mount(server)
        .await;
}

fn config(server: &MockServer, storage_dir: &std::path::Path) -> OfflineConfig {
    OfflineConfig {
        scope: Url::parse(&format!("{}/Covid-19-em-Sao-Paulo/", server.uri())).unwrap(),
        cache_label: "Covid19-SP-23/10/2021".to_string(),
        manifest: Manifest::new(["index.html", "app.js"]),
        storage_dir: storage_dir.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn precached_and_fetched_resources_hit_the_origin_once() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let server = MockServer::start().await;
    mount(&server, "/Covid-19-em-Sao-Paulo/index.html", "<html>index</html>", 1).await;
    mount(&server, "/Covid-19-em-Sao-Paulo/app.js", "var paginaAtual;", 1).await;
    mount(&server, "/Covid-19-em-Sao-Paulo/graficos/resumo.html", "B", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());
    let storage = Arc::new(DiskCacheStorage::new(&config.storage_dir).await.unwrap());
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());
    let (host, _events) = ServiceWorkerHost::new(loader.clone());

    let worker = Arc::new(
        OfflineCacheManager::new(&config, storage.clone(), loader, Arc::new(ClientList::new()))
            .unwrap(),
    );
    assert_eq!(host.register(worker).await, WorkerState::Activated);
    assert_eq!(storage.keys().await.unwrap(), vec!["Covid19-SP-23/10/2021-01"]);

    let index = config.scope.join("index.html").unwrap();
    let resumo = config.scope.join("graficos/resumo.html").unwrap();

    let first = host.fetch(&Request::get(index.clone())).await.unwrap();
    assert!(first.from_cache);
    assert_eq!(first.text().unwrap(), "<html>index</html>");

    let miss = host.fetch(&Request::get(resumo.clone())).await.unwrap();
    assert!(!miss.from_cache);
    assert_eq!(miss.text().unwrap(), "B");

    let hit = host.fetch(&Request::get(resumo)).await.unwrap();
    assert!(hit.from_cache);
    assert_eq!(hit.text().unwrap(), "B");
}

#[tokio::test]
async fn generations_persist_across_restarts() {
    let server = MockServer::start().await;
    mount(&server, "/Covid-19-em-Sao-Paulo/index.html", "<html>index</html>", 1).await;
    mount(&server, "/Covid-19-em-Sao-Paulo/app.js", "var paginaAtual;", 1).await;

    let dir = tempfile::tempdir().unwrap();
    let config = config(&server, dir.path());
    let loader = Arc::new(ResourceLoader::new(LoaderConfig::default()).unwrap());

    {
        let storage = Arc::new(DiskCacheStorage::new(&config.storage_dir).await.unwrap());
        let (host, _events) = ServiceWorkerHost::new(loader.clone());
        let worker = OfflineCacheManager::new(
            &config,
            storage,
            loader.clone(),
            Arc::new(ClientList::new()),
        )
        .unwrap();
        host.register(Arc::new(worker)).await;
    }

    let storage = Arc::new(DiskCacheStorage::new(&config.storage_dir).await.unwrap());
    let (host, _events) = ServiceWorkerHost::new(loader.clone());
    let worker =
        OfflineCacheManager::new(&config, storage, loader, Arc::new(ClientList::new())).unwrap();
    assert_eq!(
        host.resume(Arc::new(worker)).await.unwrap(),
        WorkerState::Activated
    );

    let app = config.scope.join("app.js").unwrap();
    let response = host.fetch(&Request::get(app)).await.unwrap();
    assert!(response.from_cache);
    assert_eq!(response.text().unwrap(), "var paginaAtual;");
}
