//! Core types shared by the cache store and the fetch strategies.

use chrono::{DateTime, Utc};

use crate::net::Response;

/// Handle to one named cache, as returned by `CacheStorage::open`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheHandle {
  name: String,
}

impl CacheHandle {
  pub(super) fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  pub fn name(&self) -> &str {
    &self.name
  }
}

/// A stored response together with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Result of an intercepted fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Data served from a cache entry.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Data built locally because neither network nor cache could answer.
  pub fn synthetic(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }

  /// The offline fallback document.
  pub fn offline_page(data: T) -> Self {
    Self {
      data,
      source: CacheSource::OfflinePage,
      cached_at: None,
    }
  }

  /// True only when the origin actually answered.
  pub fn is_from_network(&self) -> bool {
    self.source == CacheSource::Network
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Answered by the origin
  Network,
  /// Served from a cache entry
  Cache,
  /// Synthesized empty offline batch
  Synthetic,
  /// Offline fallback page
  OfflinePage,
}
