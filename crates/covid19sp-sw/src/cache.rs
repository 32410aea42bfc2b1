//! Cache storage: named generations of request/response pairs.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use covid19sp_net::{Request, Response};
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Keyed store of cache generations.
///
/// Generations are addressed by name, so writers to different generations never
/// interfere. Within one generation the last write for a request key wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open a generation, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Check if a generation exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Names of all existing generations.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a generation. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look up a request (method + URL) in one generation.
    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>>;

    /// Store a response for a request, creating the generation if needed.
    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()>;

    /// Store a batch. Nothing is written if any pair is not cacheable.
    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &entries {
            ensure_cacheable(request, response)?;
        }
        for (request, response) in &entries {
            self.put(name, request, response).await?;
        }
        Ok(())
    }

    /// Request keys stored in one generation.
    async fn request_keys(&self, name: &str) -> Result<Vec<String>>;
}

/// Only complete responses to GET requests can be stored.
pub fn ensure_cacheable(request: &Request, response: &Response) -> Result<()> {
    if request.method != Method::GET {
        return Err(ServiceWorkerError::NotCacheable(format!(
            "{} requests cannot be stored ({})",
            request.method, request.url
        )));
    }
    if response.status == StatusCode::PARTIAL_CONTENT {
        return Err(ServiceWorkerError::NotCacheable(format!(
            "partial response for {}",
            request.url
        )));
    }
    Ok(())
}

// ==================== Entry ====================

/// A stored request/response pair in serializable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request method.
    pub method: String,

    /// Request URL.
    pub url: String,

    /// Response URL (after redirects).
    pub response_url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: Vec<(String, String)>,

    /// Response body, base64.
    pub body: String,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    pub fn new(request: &Request, response: &Response) -> Self {
        Self {
            method: request.method.to_string(),
            url: request.url.to_string(),
            response_url: response.url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), v.to_string()))
                })
                .collect(),
            body: STANDARD.encode(&response.body),
            cached_at: now_millis(),
        }
    }

    /// Request identity, same format as [`Request::cache_key`].
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn to_response(&self) -> Result<Response> {
        let url = Url::parse(&self.response_url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("bad stored url: {e}")))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("bad stored status: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ServiceWorkerError::CacheError(e.to_string()))?;
            headers.append(name, value);
        }

        let body = STANDARD
            .decode(&self.body)
            .map_err(|e| ServiceWorkerError::CacheError(format!("bad stored body: {e}")))?;

        Ok(Response {
            url,
            status,
            headers,
            body: body.into(),
            from_cache: true,
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ==================== Memory Storage ====================

/// One cache generation held in memory.
#[derive(Debug, Default)]
struct Cache {
    name: String,
    entries: HashMap<String, Response>,
}

impl Cache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }
}

/// In-memory cache storage. Generations are listed in creation order.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<Vec<Cache>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn open_in<'a>(caches: &'a mut Vec<Cache>, name: &str) -> &'a mut Cache {
    match caches.iter().position(|c| c.name == name) {
        Some(index) => &mut caches[index],
        None => {
            caches.push(Cache::new(name));
            let last = caches.len() - 1;
            &mut caches[last]
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        open_in(&mut *self.caches.write().await, name);
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.caches.read().await.iter().any(|c| c.name == name))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .caches
            .read()
            .await
            .iter()
            .map(|c| c.name.clone())
            .collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut caches = self.caches.write().await;
        let before = caches.len();
        caches.retain(|c| c.name != name);
        Ok(caches.len() != before)
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        let caches = self.caches.read().await;
        Ok(caches
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.entries.get(&request.cache_key()))
            .map(|response| Response {
                from_cache: true,
                ..response.clone()
            }))
    }

    async fn put(&self, name: &str, request: &Request, response: &Response) -> Result<()> {
        ensure_cacheable(request, response)?;
        let mut caches = self.caches.write().await;
        open_in(&mut caches, name)
            .entries
            .insert(request.cache_key(), response.clone());
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(Request, Response)>) -> Result<()> {
        for (request, response) in &entries {
            ensure_cacheable(request, response)?;
        }
        let mut caches = self.caches.write().await;
        let cache = open_in(&mut caches, name);
        for (request, response) in entries {
            cache.entries.insert(request.cache_key(), response);
        }
        Ok(())
    }

    async fn request_keys(&self, name: &str) -> Result<Vec<String>> {
        let caches = self.caches.read().await;
        let mut keys: Vec<String> = caches
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(url: &str) -> Request {
        Request::get_str(url).unwrap()
    }

    fn response(url: &str, body: &'static str) -> Response {
        Response::new(Url::parse(url).unwrap(), StatusCode::OK, body)
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let storage = MemoryCacheStorage::new();
        storage.open("X-01").await.unwrap();
        storage.open("X-01").await.unwrap();
        storage.open("X-02").await.unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["X-01", "X-02"]);
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let storage = MemoryCacheStorage::new();
        let url = "https://example.com/style.css";
        storage
            .put("v1", &request(url), &response(url, "body{}"))
            .await
            .unwrap();

        let hit = storage.match_request("v1", &request(url)).await.unwrap().unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.body, Bytes::from_static(b"body{}"));

        let other = request("https://example.com/other.css");
        assert!(storage.match_request("v1", &other).await.unwrap().is_none());
        assert!(storage.match_request("v2", &request(url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let storage = MemoryCacheStorage::new();
        let url = "https://example.com/app.js";
        storage.put("v1", &request(url), &response(url, "old")).await.unwrap();
        storage.put("v1", &request(url), &response(url, "new")).await.unwrap();

        let hit = storage.match_request("v1", &request(url)).await.unwrap().unwrap();
        assert_eq!(hit.text().unwrap(), "new");
        assert_eq!(storage.request_keys("v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = MemoryCacheStorage::new();
        storage.open("v1").await.unwrap();

        assert!(storage.has("v1").await.unwrap());
        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_get_not_cacheable() {
        let storage = MemoryCacheStorage::new();
        let url = Url::parse("https://example.com/api").unwrap();
        let post = Request::post(url.clone(), Bytes::from_static(b"{}"));
        let result = storage
            .put("v1", &post, &Response::new(url, StatusCode::OK, "ok"))
            .await;

        assert!(matches!(result, Err(ServiceWorkerError::NotCacheable(_))));
        assert!(!storage.has("v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_all_rejects_whole_batch() {
        let storage = MemoryCacheStorage::new();
        let a = "https://example.com/a.js";
        let b = "https://example.com/b.mp4";
        let partial = Response::new(Url::parse(b).unwrap(), StatusCode::PARTIAL_CONTENT, "");

        let result = storage
            .put_all(
                "v1",
                vec![(request(a), response(a, "a")), (request(b), partial)],
            )
            .await;

        assert!(result.is_err());
        assert!(storage.request_keys("v1").await.unwrap().is_empty());
    }

    #[test]
    fn test_entry_to_response() {
        let url = "https://example.com/data.json";
        let mut original = response(url, "{}");
        original.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let entry = CacheEntry::new(&request(url), &original);
        assert_eq!(entry.key(), format!("GET {url}"));

        let restored = entry.to_response().unwrap();
        assert_eq!(restored.status, StatusCode::OK);
        assert!(restored.from_cache);
        assert_eq!(restored.content_type(), Some("application/json"));
        assert_eq!(restored.body, original.body);
    }
}
