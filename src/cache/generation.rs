//! Generation-tagged cache names and the activation sweep.

use color_eyre::Result;

use super::storage::CacheStorage;
use crate::config::CacheConfig;

/// Names of the three logical caches for one deploy generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGeneration {
  prefix: String,
  version: String,
}

impl CacheGeneration {
  pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
      version: version.into(),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new(&config.prefix, &config.version)
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  /// Static assets and the offline page, e.g. `crm-pwa-v2`.
  pub fn static_cache(&self) -> String {
    format!("{}-{}", self.prefix, self.version)
  }

  /// API responses, e.g. `crm-pwa-api-v2`.
  pub fn api_cache(&self) -> String {
    format!("{}-api-{}", self.prefix, self.version)
  }

  /// The offline batch document, e.g. `crm-pwa-offline-v2`.
  pub fn offline_cache(&self) -> String {
    format!("{}-offline-{}", self.prefix, self.version)
  }

  pub fn allow_list(&self) -> [String; 3] {
    [self.static_cache(), self.api_cache(), self.offline_cache()]
  }

  /// Delete every cache not belonging to this generation.
  ///
  /// Returns the deleted names. A cache that fails to delete is logged and
  /// left for the next activation.
  pub fn sweep(&self, storage: &dyn CacheStorage) -> Result<Vec<String>> {
    let allowed = self.allow_list();
    let mut deleted = Vec::new();

    for name in storage.keys()? {
      if allowed.contains(&name) {
        continue;
      }
      match storage.delete_cache(&name) {
        Ok(_) => {
          tracing::info!(cache = %name, "deleted stale cache");
          deleted.push(name);
        }
        Err(e) => tracing::warn!(cache = %name, error = %e, "failed to delete stale cache"),
      }
    }

    Ok(deleted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;

  #[test]
  fn test_names_follow_prefix_and_version() {
    let generation = CacheGeneration::new("crm-pwa", "v2");
    assert_eq!(generation.static_cache(), "crm-pwa-v2");
    assert_eq!(generation.api_cache(), "crm-pwa-api-v2");
    assert_eq!(generation.offline_cache(), "crm-pwa-offline-v2");
  }

  #[test]
  fn test_sweep_removes_previous_generation() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("crm-pwa-v1").unwrap();
    storage.open("crm-pwa-api-v1").unwrap();
    storage.open("crm-pwa-v2").unwrap();
    storage.open("crm-pwa-offline-v2").unwrap();

    let generation = CacheGeneration::new("crm-pwa", "v2");
    let mut deleted = generation.sweep(&storage).unwrap();
    deleted.sort();

    assert_eq!(deleted, vec!["crm-pwa-api-v1", "crm-pwa-v1"]);
    let keys = storage.keys().unwrap();
    assert!(keys.contains("crm-pwa-v2"));
    assert!(keys.contains("crm-pwa-offline-v2"));
    assert!(!keys.contains("crm-pwa-v1"));
  }

  #[test]
  fn test_sweep_removes_foreign_caches_too() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("some-other-app").unwrap();

    let generation = CacheGeneration::new("crm-pwa", "v2");
    assert_eq!(generation.sweep(&storage).unwrap(), vec!["some-other-app"]);
  }
}
