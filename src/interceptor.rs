//! Request interception: classify each request and apply its fetch strategy.
//!
//! - Static GETs are cache-first, falling back to the offline page
//! - API requests are network-first, falling back to the cached response,
//!   then to a synthetic empty batch (bootstrap endpoint only), then to the
//!   offline page
//! - Everything else goes straight to the network

use color_eyre::Result;
use reqwest::Method;
use std::sync::Arc;

use crate::cache::{CacheGeneration, CacheHandle, CacheLayer, CacheResult, CacheStorage};
use crate::config::{Config, RoutesConfig};
use crate::net::{Request, Response, Transport};
use crate::outbox::OfflineBatch;

/// Served when even the cached offline page is missing.
const BUILTIN_OFFLINE_PAGE: &str = "<!DOCTYPE html>\n<html><head><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Your changes are saved and will sync when the connection returns.</p></body></html>\n";

/// How a request is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// GET outside the API prefix: cache-first
  Static,
  /// Anything under the API prefix: network-first
  Api,
  /// Non-GET outside the API prefix: network only
  Passthrough,
}

pub struct Interceptor {
  layer: CacheLayer,
  transport: Arc<dyn Transport>,
  static_cache: CacheHandle,
  api_cache: CacheHandle,
  routes: RoutesConfig,
  entity_types: Vec<String>,
}

impl Interceptor {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
    generation: &CacheGeneration,
    config: &Config,
  ) -> Result<Self> {
    let static_cache = storage.open(&generation.static_cache())?;
    let api_cache = storage.open(&generation.api_cache())?;

    Ok(Self {
      layer: CacheLayer::new(storage),
      transport,
      static_cache,
      api_cache,
      routes: config.routes.clone(),
      entity_types: config.entity_types.clone(),
    })
  }

  pub fn routes(&self) -> &RoutesConfig {
    &self.routes
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.path.starts_with(&self.routes.api_prefix) {
      RequestClass::Api
    } else if request.method == Method::GET {
      RequestClass::Static
    } else {
      RequestClass::Passthrough
    }
  }

  /// Handle one intercepted request.
  ///
  /// Only pass-through requests can fail; static and API requests always
  /// produce some response.
  pub async fn handle(&self, request: Request) -> Result<CacheResult<Response>> {
    let class = self.classify(&request);
    tracing::debug!(method = %request.method, target = %request.identity(), ?class, "intercepted");

    match class {
      RequestClass::Static => Ok(self.handle_static(request).await),
      RequestClass::Api => Ok(self.handle_api(request).await),
      RequestClass::Passthrough => {
        let response = self.transport.send(request).await?;
        Ok(CacheResult::from_network(response))
      }
    }
  }

  async fn handle_static(&self, request: Request) -> CacheResult<Response> {
    let key = request.identity();
    let transport = Arc::clone(&self.transport);

    match self
      .layer
      .cache_first(&self.static_cache, &key, || async move {
        transport.send(request).await
      })
      .await
    {
      Some(result) => result,
      None => self.offline_page(),
    }
  }

  async fn handle_api(&self, request: Request) -> CacheResult<Response> {
    let key = request.api_key();
    let is_bootstrap = request.path == self.routes.offline_data;
    let transport = Arc::clone(&self.transport);

    let result = self
      .layer
      .network_first(&self.api_cache, &key, || async move {
        transport.send(request).await
      })
      .await;

    match result {
      Some(result) => result,
      None if is_bootstrap => {
        tracing::info!("serving empty offline batch");
        CacheResult::synthetic(self.empty_batch_response())
      }
      None => self.offline_page(),
    }
  }

  /// The cached offline page, or the built-in one if it was never cached.
  pub fn offline_page(&self) -> CacheResult<Response> {
    match self
      .layer
      .lookup(&self.static_cache, &self.routes.offline_page)
    {
      Some(cached) => CacheResult::offline_page(cached.response),
      None => {
        tracing::warn!(page = %self.routes.offline_page, "offline page not cached, using built-in");
        CacheResult::offline_page(Response::html(503, BUILTIN_OFFLINE_PAGE))
      }
    }
  }

  fn empty_batch_response(&self) -> Response {
    let batch = OfflineBatch::empty(self.entity_types.as_slice());
    match serde_json::to_value(&batch) {
      Ok(value) => Response::json(200, &value),
      Err(e) => {
        tracing::error!(error = %e, "failed to serialize empty batch");
        Response::json(200, &serde_json::json!({}))
      }
    }
  }

  /// Fetch assets into the static cache. Returns how many were stored.
  ///
  /// Failures are logged per asset and do not stop the others.
  pub async fn precache(&self, assets: &[String]) -> usize {
    let mut stored = 0;

    for asset in assets {
      match self.transport.send(Request::get(asset)).await {
        Ok(response) if response.is_ok() => {
          self.layer.store(&self.static_cache, asset, &response);
          stored += 1;
        }
        Ok(response) => {
          tracing::warn!(asset = %asset, status = response.status, "precache skipped non-ok asset");
        }
        Err(e) => tracing::warn!(asset = %asset, error = %e, "precache fetch failed"),
      }
    }

    stored
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::net::fake::FakeTransport;
  use serde_json::json;

  struct Harness {
    interceptor: Interceptor,
    transport: Arc<FakeTransport>,
  }

  fn harness() -> Harness {
    let storage: Arc<dyn CacheStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let transport = Arc::new(FakeTransport::new());
    let config = Config::default();
    let interceptor = Interceptor::new(
      storage,
      transport.clone(),
      &CacheGeneration::new("crm-pwa", "v2"),
      &config,
    )
    .unwrap();

    Harness {
      interceptor,
      transport,
    }
  }

  #[test]
  fn test_classify() {
    let h = harness();
    let i = &h.interceptor;
    assert_eq!(i.classify(&Request::get("/crm")), RequestClass::Static);
    assert_eq!(i.classify(&Request::get("/api/customers")), RequestClass::Api);
    assert_eq!(
      i.classify(&Request::post_json("/api/customers", &json!({}))),
      RequestClass::Api
    );
    assert_eq!(
      i.classify(&Request::post_json("/login", &json!({}))),
      RequestClass::Passthrough
    );
  }

  #[tokio::test]
  async fn test_static_hit_makes_no_network_call() {
    let h = harness();
    let body = vec![0u8, 159, 146, 150, 255];
    h.transport.route("GET:/icons/icon.png", Response::new(200, body.clone()));

    let first = h.interceptor.handle(Request::get("/icons/icon.png")).await.unwrap();
    assert!(first.is_from_network());

    h.transport.route("GET:/icons/icon.png", Response::new(200, "changed"));
    let second = h.interceptor.handle(Request::get("/icons/icon.png")).await.unwrap();

    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(second.data.body, body);
    assert_eq!(h.transport.sent().len(), 1);
  }

  #[tokio::test]
  async fn test_static_keyed_by_full_identity() {
    let h = harness();
    h.transport.route("GET:/crm?tab=a", Response::html(200, "a"));
    h.transport.route("GET:/crm?tab=b", Response::html(200, "b"));

    h.interceptor.handle(Request::get("/crm?tab=a")).await.unwrap();
    let b = h.interceptor.handle(Request::get("/crm?tab=b")).await.unwrap();

    assert!(b.is_from_network());
    assert_eq!(b.data.text(), "b");
  }

  #[tokio::test]
  async fn test_static_miss_offline_serves_offline_page() {
    let h = harness();
    h.transport.route("GET:/offline.html", Response::html(200, "cached offline page"));
    assert_eq!(h.interceptor.precache(&["/offline.html".to_string()]).await, 1);

    h.transport.set_offline(true);
    let result = h.interceptor.handle(Request::get("/crm")).await.unwrap();

    assert_eq!(result.source, CacheSource::OfflinePage);
    assert_eq!(result.data.text(), "cached offline page");
  }

  #[tokio::test]
  async fn test_static_non_ok_falls_back_like_network_error() {
    let h = harness();
    h.transport.route("GET:/crm", Response::new(502, "bad gateway"));

    let result = h.interceptor.handle(Request::get("/crm")).await.unwrap();

    assert_eq!(result.source, CacheSource::OfflinePage);
    assert_eq!(result.data.status, 503);
  }

  #[tokio::test]
  async fn test_api_success_is_cached_then_served_on_failure() {
    let h = harness();
    let list = Response::json(200, &json!([{"id": 1, "name": "Acme"}]));
    h.transport.route("GET:/api/customers?page=1", list.clone());

    let live = h
      .interceptor
      .handle(Request::get("/api/customers?page=1"))
      .await
      .unwrap();
    assert!(live.is_from_network());

    h.transport.fail("GET:/api/customers?page=1");
    let fallback = h
      .interceptor
      .handle(Request::get("/api/customers?page=1"))
      .await
      .unwrap();

    assert_eq!(fallback.source, CacheSource::Cache);
    assert_eq!(fallback.data, list);
  }

  #[tokio::test]
  async fn test_api_cache_is_keyed_by_method() {
    let h = harness();
    h.transport
      .route("POST:/api/customers", Response::json(201, &json!({"id": 9})));
    h.interceptor
      .handle(Request::post_json("/api/customers", &json!({"name": "Acme"})))
      .await
      .unwrap();

    h.transport.set_offline(true);
    let get = h.interceptor.handle(Request::get("/api/customers")).await.unwrap();
    assert_eq!(get.source, CacheSource::OfflinePage);
  }

  #[tokio::test]
  async fn test_api_non_ok_is_returned_not_cached() {
    let h = harness();
    h.transport.route("GET:/api/customers", Response::new(500, "boom"));

    let result = h.interceptor.handle(Request::get("/api/customers")).await.unwrap();
    assert!(result.is_from_network());
    assert_eq!(result.data.status, 500);

    h.transport.set_offline(true);
    let offline = h.interceptor.handle(Request::get("/api/customers")).await.unwrap();
    assert_eq!(offline.source, CacheSource::OfflinePage);
  }

  #[tokio::test]
  async fn test_api_failure_without_cache_serves_offline_page() {
    let h = harness();
    h.transport.fail("GET:/api/customers");

    let result = h.interceptor.handle(Request::get("/api/customers")).await.unwrap();

    assert_eq!(result.source, CacheSource::OfflinePage);
    assert!(result.data.text().contains("offline"));
  }

  #[tokio::test]
  async fn test_bootstrap_fallback_synthesizes_fresh_empty_batch() {
    let h = harness();
    h.transport.set_offline(true);

    let first = h.interceptor.handle(Request::get("/api/offline-data")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = h.interceptor.handle(Request::get("/api/offline-data")).await.unwrap();

    assert_eq!(first.source, CacheSource::Synthetic);
    let a = first.data.json_body().unwrap();
    let b = second.data.json_body().unwrap();

    for entity in ["customers", "opportunities", "contacts", "activities"] {
      assert_eq!(a[entity], json!([]));
      assert_eq!(a[entity], b[entity]);
    }
    assert_ne!(a["lastSync"], b["lastSync"]);
  }

  #[tokio::test]
  async fn test_passthrough_propagates_network_error() {
    let h = harness();
    h.transport.set_offline(true);

    let result = h
      .interceptor
      .handle(Request::post_json("/login", &json!({"user": "x"})))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_precache_skips_failures() {
    let h = harness();
    h.transport.route("GET:/", Response::html(200, "app"));
    h.transport.fail("GET:/manifest.json");

    let stored = h
      .interceptor
      .precache(&["/".to_string(), "/manifest.json".to_string(), "/missing.css".to_string()])
      .await;
    assert_eq!(stored, 1);
  }
}
