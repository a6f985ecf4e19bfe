//! Offline outbox: mutations staged while the server was unreachable.
//!
//! The whole outbox is one JSON document (an [`OfflineBatch`]) stored under a
//! fixed key in the offline cache. Every save replaces the document.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheHandle, CacheStorage};
use crate::net::Response;

/// Key of the batch document inside the offline cache.
pub const OFFLINE_DATA_KEY: &str = "offline-data";

/// Queued records grouped by entity type, plus the time of the last sync.
///
/// Serializes as `{ "customers": [...], ..., "lastSync": "<ISO-8601>" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineBatch {
  #[serde(flatten)]
  pub entities: BTreeMap<String, Vec<Value>>,
  #[serde(rename = "lastSync", default = "Utc::now")]
  pub last_sync: DateTime<Utc>,
}

impl OfflineBatch {
  /// A batch with an empty list for each of the given entity types.
  pub fn empty<S: AsRef<str>>(entity_types: &[S]) -> Self {
    Self {
      entities: entity_types
        .iter()
        .map(|t| (t.as_ref().to_string(), Vec::new()))
        .collect(),
      last_sync: Utc::now(),
    }
  }

  pub fn push(&mut self, entity_type: &str, record: Value) {
    self
      .entities
      .entry(entity_type.to_string())
      .or_default()
      .push(record);
  }

  /// Number of queued records across all types.
  pub fn len(&self) -> usize {
    self.entities.values().map(Vec::len).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Entity types with at least one queued record.
  pub fn pending_types(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
    self.entities.iter().filter(|(_, records)| !records.is_empty())
  }
}

/// The outbox document store.
#[derive(Clone)]
pub struct Outbox {
  storage: Arc<dyn CacheStorage>,
  cache: CacheHandle,
}

impl Outbox {
  /// Open the outbox inside the named offline cache.
  pub fn open(storage: Arc<dyn CacheStorage>, cache_name: &str) -> Result<Self> {
    let cache = storage.open(cache_name)?;
    Ok(Self { storage, cache })
  }

  /// Persist `batch`, replacing any prior one.
  pub fn save(&self, batch: &OfflineBatch) -> Result<()> {
    let value = serde_json::to_value(batch)
      .map_err(|e| eyre!("Failed to serialize offline batch: {}", e))?;
    self
      .storage
      .put(&self.cache, OFFLINE_DATA_KEY, &Response::json(200, &value))
  }

  pub fn load(&self) -> Result<Option<OfflineBatch>> {
    let Some(entry) = self.storage.match_entry(&self.cache, OFFLINE_DATA_KEY)? else {
      return Ok(None);
    };

    let batch = serde_json::from_slice(&entry.response.body)
      .map_err(|e| eyre!("Failed to parse offline batch: {}", e))?;
    Ok(Some(batch))
  }

  pub fn clear(&self) -> Result<()> {
    self.storage.delete(&self.cache, OFFLINE_DATA_KEY)?;
    Ok(())
  }

  /// Append one record to the stored batch, creating the batch if needed.
  pub fn stage(&self, entity_type: &str, record: Value) -> Result<()> {
    let mut batch = self
      .load()?
      .unwrap_or_else(|| OfflineBatch::empty::<&str>(&[]));
    batch.push(entity_type, record);
    self.save(&batch)?;

    tracing::info!(entity_type, pending = batch.len(), "staged offline record");
    Ok(())
  }

  pub fn pending_count(&self) -> Result<usize> {
    Ok(self.load()?.map(|batch| batch.len()).unwrap_or(0))
  }
}
