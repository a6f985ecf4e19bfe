//! Request and response values passed through the interceptor.

use reqwest::Method;

/// An outgoing request as issued by the hosting page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub query: Option<String>,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// Build a request from a method and a `path?query` target.
  pub fn new(method: Method, target: &str) -> Self {
    let (path, query) = match target.split_once('?') {
      Some((path, query)) if !query.is_empty() => (path.to_string(), Some(query.to_string())),
      Some((path, _)) => (path.to_string(), None),
      None => (target.to_string(), None),
    };

    Self {
      method,
      path,
      query,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(target: &str) -> Self {
    Self::new(Method::GET, target)
  }

  /// A JSON POST, the only shape the sync engine sends.
  pub fn post_json(target: &str, body: &serde_json::Value) -> Self {
    let mut request = Self::new(Method::POST, target);
    request
      .headers
      .push(("content-type".to_string(), "application/json".to_string()));
    request.body = Some(body.to_string().into_bytes());
    request
  }

  /// `path?query`, used as the static cache key.
  pub fn identity(&self) -> String {
    match &self.query {
      Some(query) => format!("{}?{}", self.path, query),
      None => self.path.clone(),
    }
  }

  /// `METHOD:path?query`, used as the API cache key.
  pub fn api_key(&self) -> String {
    format!("{}:{}", self.method.as_str(), self.identity())
  }
}

/// A response body with its status and headers.
///
/// The cache store keeps status, headers and body as separate columns, so a
/// cached response comes back byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body: value.to_string().into_bytes(),
    }
  }

  pub fn html(status: u16, body: &str) -> Self {
    Self {
      status,
      headers: vec![("content-type".to_string(), "text/html; charset=utf-8".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  /// 2xx
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }


  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }

  pub fn json_body(&self) -> serde_json::Result<serde_json::Value> {
    serde_json::from_slice(&self.body)
  }
}
