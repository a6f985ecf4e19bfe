//! Transport trait and the reqwest-backed implementation.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::time::Duration;
use url::Url;

use super::types::{Request, Response};
use crate::config::Config;

/// Sends a request to the origin.
///
/// An `Err` means the request never produced a response (connection refused,
/// timeout, offline). Any HTTP status, including 5xx, is an `Ok`.
pub trait Transport: Send + Sync {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

/// HTTP transport resolving request paths against a fixed origin.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  origin: Url,
}

impl HttpTransport {
  pub fn new(config: &Config) -> Result<Self> {
    let origin = Url::parse(&config.server.origin)
      .map_err(|e| eyre!("Invalid server origin {}: {}", config.server.origin, e))?;

    let mut builder = reqwest::Client::builder();
    if config.network.timeout_secs > 0 {
      builder = builder.timeout(Duration::from_secs(config.network.timeout_secs));
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }

  fn resolve(&self, request: &Request) -> Result<Url> {
    self
      .origin
      .join(&request.identity())
      .map_err(|e| eyre!("Invalid request target {}: {}", request.identity(), e))
  }

  async fn execute(&self, request: Request) -> Result<Response> {
    let url = self.resolve(&request)?;
    let label = format!("{} {}", request.method, request.identity());

    let mut builder = self.client.request(request.method.clone(), url);
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request {} failed: {}", label, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body: {}", e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

impl Transport for HttpTransport {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    Box::pin(self.execute(request))
  }
}
