use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  /// Static assets fetched into the static cache on install
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Entity types known to the outbox (unknown types are still accepted)
  #[serde(default = "default_entity_types")]
  pub entity_types: Vec<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      server: ServerConfig::default(),
      cache: CacheConfig::default(),
      network: NetworkConfig::default(),
      routes: RoutesConfig::default(),
      precache: default_precache(),
      entity_types: default_entity_types(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Origin all intercepted paths are resolved against
  #[serde(default = "default_origin")]
  pub origin: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      origin: default_origin(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Prefix shared by every cache name, e.g. "crm-pwa"
  #[serde(default = "default_cache_prefix")]
  pub prefix: String,
  /// Generation tag baked into cache names, e.g. "v2"
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// SQLite file holding the caches (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_cache_prefix(),
      version: default_cache_version(),
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Per-request deadline; 0 disables it
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// How often `serve` probes the origin for connectivity changes
  #[serde(default = "default_probe_interval_secs")]
  pub probe_interval_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      probe_interval_secs: default_probe_interval_secs(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  #[serde(default = "default_offline_data")]
  pub offline_data: String,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_app_root")]
  pub app_root: String,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
      offline_data: default_offline_data(),
      offline_page: default_offline_page(),
      app_root: default_app_root(),
    }
  }
}

fn default_origin() -> String {
  "http://localhost:3000".to_string()
}

fn default_cache_prefix() -> String {
  "crm-pwa".to_string()
}

fn default_cache_version() -> String {
  "v2".to_string()
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_probe_interval_secs() -> u64 {
  15
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_offline_data() -> String {
  "/api/offline-data".to_string()
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_app_root() -> String {
  "/".to_string()
}

fn default_precache() -> Vec<String> {
  [
    "/",
    "/crm",
    "/static/js/bundle.js",
    "/static/css/main.css",
    "/manifest.json",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_entity_types() -> Vec<String> {
  ["customers", "opportunities", "contacts", "activities"]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./crm-pwa.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/crm-pwa/config.yaml
  ///
  /// Without any file the built-in defaults are used. `CRM_PWA_ORIGIN`
  /// overrides the server origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("CRM_PWA_ORIGIN") {
      config.server.origin = origin;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("crm-pwa.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("crm-pwa").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory for the cache database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("crm-pwa"))
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.cache.database {
      Some(path) => Ok(path.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_yaml_falls_back_to_defaults() {
    let config = Config::from_yaml(
      r#"
server:
  origin: https://crm.example.com
cache:
  version: v3
"#,
    )
    .unwrap();

    assert_eq!(config.server.origin, "https://crm.example.com");
    assert_eq!(config.cache.prefix, "crm-pwa");
    assert_eq!(config.cache.version, "v3");
    assert_eq!(config.routes.offline_data, "/api/offline-data");
    assert_eq!(config.network.timeout_secs, 30);
    assert_eq!(config.entity_types.len(), 4);
    assert!(config.precache.contains(&"/".to_string()));
  }

  #[test]
  fn test_custom_entity_types() {
    let config = Config::from_yaml("entity_types: [customers, invoices]\n").unwrap();
    assert_eq!(config.entity_types, vec!["customers", "invoices"]);
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }
}
