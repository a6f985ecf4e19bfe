//! Scripted transport for tests.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::transport::Transport;
use super::types::{Request, Response};

/// Transport answering from a table of `METHOD:path?query` routes.
///
/// Unknown routes answer 404. While offline every request fails. Routes can
/// also be marked as failing individually.
#[derive(Default)]
pub struct FakeTransport {
  routes: Mutex<HashMap<String, Response>>,
  failing: Mutex<HashSet<String>>,
  failing_bodies: Mutex<Vec<serde_json::Value>>,
  delays: Mutex<HashMap<String, Duration>>,
  offline: AtomicBool,
  sent: Mutex<Vec<Request>>,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn route(&self, key: &str, response: Response) {
    self.routes.lock().unwrap().insert(key.to_string(), response);
  }

  pub fn fail(&self, key: &str) {
    self.failing.lock().unwrap().insert(key.to_string());
  }

  pub fn recover(&self, key: &str) {
    self.failing.lock().unwrap().remove(key);
  }

  /// Fail any request whose JSON body equals `body`.
  pub fn fail_body(&self, body: serde_json::Value) {
    self.failing_bodies.lock().unwrap().push(body);
  }

  pub fn delay(&self, key: &str, delay: Duration) {
    self.delays.lock().unwrap().insert(key.to_string(), delay);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn sent(&self) -> Vec<Request> {
    self.sent.lock().unwrap().clone()
  }

  pub fn sent_keys(&self) -> Vec<String> {
    self.sent().iter().map(Request::api_key).collect()
  }

  fn answer(&self, request: &Request) -> Result<Response> {
    let key = request.api_key();

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("network unreachable: {}", key));
    }
    if self.failing.lock().unwrap().contains(&key) {
      return Err(eyre!("connection reset: {}", key));
    }
    if let Some(body) = &request.body {
      if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if self.failing_bodies.lock().unwrap().contains(&value) {
          return Err(eyre!("connection reset: {}", key));
        }
      }
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

impl Transport for FakeTransport {
  fn send(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
    Box::pin(async move {
      self.sent.lock().unwrap().push(request.clone());
      let delay = self.delays.lock().unwrap().get(&request.api_key()).copied();
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      self.answer(&request)
    })
  }
}
