//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;

use super::storage::CacheStorage;
use super::traits::{CacheHandle, CacheResult, CachedEntry};
use crate::net::Response;

/// Cache layer that applies fetch strategies over a storage backend.
///
/// Storage failures never surface from here: they are logged and the layer
/// behaves as if the cache were empty, so callers degrade to network-only.
pub struct CacheLayer {
  storage: Arc<dyn CacheStorage>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self { storage }
  }

  /// Read an entry, treating storage errors as a miss.
  pub fn lookup(&self, cache: &CacheHandle, key: &str) -> Option<CachedEntry> {
    match self.storage.match_entry(cache, key) {
      Ok(entry) => entry,
      Err(e) => {
        tracing::warn!(cache = cache.name(), key, error = %e, "cache read failed");
        None
      }
    }
  }

  /// Write an entry, logging storage errors.
  pub fn store(&self, cache: &CacheHandle, key: &str, response: &Response) {
    if let Err(e) = self.storage.put(cache, key, response) {
      tracing::warn!(cache = cache.name(), key, error = %e, "cache write failed");
    }
  }

  /// Fetch with a cache-first strategy.
  ///
  /// 1. Check cache - on hit, return immediately without touching the network
  /// 2. On miss, fetch from network
  /// 3. Store and return ok (2xx) responses
  ///
  /// Returns `None` when the network failed or answered non-ok; the caller
  /// picks the fallback.
  pub async fn cache_first<F, Fut>(
    &self,
    cache: &CacheHandle,
    key: &str,
    fetcher: F,
  ) -> Option<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    if let Some(cached) = self.lookup(cache, key) {
      return Some(CacheResult::from_cache(cached.response, cached.cached_at));
    }

    match fetcher().await {
      Ok(response) if response.is_ok() => {
        self.store(cache, key, &response);
        Some(CacheResult::from_network(response))
      }
      Ok(response) => {
        tracing::debug!(key, status = response.status, "non-ok response not cached");
        None
      }
      Err(e) => {
        tracing::debug!(key, error = %e, "network fetch failed");
        None
      }
    }
  }

  /// Fetch with a network-first strategy.
  ///
  /// 1. Fetch from network - any response the network produced is returned,
  ///    ok ones are stored first
  /// 2. On network failure, return the cached entry for the same key
  ///
  /// Returns `None` when the network failed and nothing was cached.
  pub async fn network_first<F, Fut>(
    &self,
    cache: &CacheHandle,
    key: &str,
    fetcher: F,
  ) -> Option<CacheResult<Response>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    match fetcher().await {
      Ok(response) => {
        if response.is_ok() {
          self.store(cache, key, &response);
        }
        Some(CacheResult::from_network(response))
      }
      Err(e) => {
        tracing::debug!(key, error = %e, "network fetch failed, trying cache");
        self
          .lookup(cache, key)
          .map(|cached| CacheResult::from_cache(cached.response, cached.cached_at))
      }
    }
  }
}

impl Clone for CacheLayer {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn layer() -> (CacheLayer, CacheHandle) {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let cache = storage.open("test").unwrap();
    (CacheLayer::new(storage), cache)
  }

  /// Storage whose every operation fails.
  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn open(&self, name: &str) -> Result<CacheHandle> {
      Ok(CacheHandle::new(name))
    }
    fn match_entry(&self, _: &CacheHandle, _: &str) -> Result<Option<CachedEntry>> {
      Err(eyre!("disk I/O error"))
    }
    fn put(&self, _: &CacheHandle, _: &str, _: &Response) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }
    fn delete(&self, _: &CacheHandle, _: &str) -> Result<bool> {
      Err(eyre!("disk I/O error"))
    }
    fn keys(&self) -> Result<std::collections::BTreeSet<String>> {
      Err(eyre!("disk I/O error"))
    }
    fn delete_cache(&self, _: &str) -> Result<bool> {
      Err(eyre!("disk I/O error"))
    }
    fn entries(&self, _: &CacheHandle) -> Result<Vec<String>> {
      Err(eyre!("disk I/O error"))
    }
  }

  #[tokio::test]
  async fn test_cache_first_hit_skips_network() {
    let (layer, cache) = layer();
    layer.store(&cache, "/crm", &Response::html(200, "cached"));

    let calls = AtomicU32::new(0);
    let result = layer
      .cache_first(&cache, "/crm", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Response::html(200, "fresh"))
      })
      .await
      .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.text(), "cached");
  }

  #[tokio::test]
  async fn test_cache_first_miss_stores_ok_response() {
    let (layer, cache) = layer();

    let result = layer
      .cache_first(&cache, "/crm", || async { Ok(Response::html(200, "fresh")) })
      .await
      .unwrap();

    assert!(result.is_from_network());
    assert_eq!(layer.lookup(&cache, "/crm").unwrap().response.text(), "fresh");
  }

  #[tokio::test]
  async fn test_cache_first_non_ok_is_not_cached() {
    let (layer, cache) = layer();

    let result = layer
      .cache_first(&cache, "/missing", || async { Ok(Response::new(404, "nope")) })
      .await;

    assert!(result.is_none());
    assert!(layer.lookup(&cache, "/missing").is_none());
  }

  #[tokio::test]
  async fn test_network_first_falls_back_to_cache() {
    let (layer, cache) = layer();
    layer
      .network_first(&cache, "GET:/api/x", || async { Ok(Response::new(200, "v1")) })
      .await
      .unwrap();

    let result = layer
      .network_first(&cache, "GET:/api/x", || async { Err(eyre!("offline")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Cache);
    assert_eq!(result.data.text(), "v1");
  }

  #[tokio::test]
  async fn test_network_first_returns_non_ok_without_caching() {
    let (layer, cache) = layer();

    let result = layer
      .network_first(&cache, "GET:/api/x", || async { Ok(Response::new(500, "boom")) })
      .await
      .unwrap();

    assert!(result.is_from_network());
    assert_eq!(result.data.status, 500);
    assert!(layer.lookup(&cache, "GET:/api/x").is_none());
  }

  #[tokio::test]
  async fn test_storage_errors_degrade_to_network_only() {
    let layer = CacheLayer::new(Arc::new(BrokenStorage));
    let cache = CacheHandle::new("broken");

    let result = layer
      .cache_first(&cache, "/crm", || async { Ok(Response::html(200, "fresh")) })
      .await
      .unwrap();
    assert!(result.is_from_network());

    let result = layer
      .network_first(&cache, "GET:/api/x", || async { Err(eyre!("offline")) })
      .await;
    assert!(result.is_none());
  }
}
