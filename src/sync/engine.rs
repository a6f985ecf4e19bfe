//! Sync engine: replays the outbox against the server.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::connectivity::ConnectivityMonitor;
use super::status::{SyncStatus, SyncTracker};
use crate::interceptor::Interceptor;
use crate::net::Request;
use crate::outbox::{OfflineBatch, Outbox};

/// Per-type delivery results of one sync run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
  /// Number of records delivered per entity type
  pub delivered: BTreeMap<String, usize>,
  /// Records that failed and were put back into the outbox
  pub failed: BTreeMap<String, Vec<Value>>,
}

impl SyncReport {
  pub fn delivered_count(&self) -> usize {
    self.delivered.values().sum()
  }

  pub fn failed_count(&self) -> usize {
    self.failed.values().map(Vec::len).sum()
  }

  /// True when nothing was left behind.
  pub fn is_complete(&self) -> bool {
    self.failed_count() == 0
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
  /// Offline, or another sync was already running; nothing attempted
  Skipped,
  /// The outbox was drained; see the report for partial failures
  Completed(SyncReport),
}

/// Drains the outbox through the interceptor.
pub struct SyncEngine {
  interceptor: Arc<Interceptor>,
  outbox: Outbox,
  connectivity: Arc<ConnectivityMonitor>,
  tracker: SyncTracker,
}

impl SyncEngine {
  pub fn new(
    interceptor: Arc<Interceptor>,
    outbox: Outbox,
    connectivity: Arc<ConnectivityMonitor>,
  ) -> Self {
    Self {
      interceptor,
      outbox,
      connectivity,
      tracker: SyncTracker::new(),
    }
  }

  pub fn status(&self) -> SyncStatus {
    self.tracker.current()
  }

  pub fn tracker(&self) -> &SyncTracker {
    &self.tracker
  }

  pub fn outbox(&self) -> &Outbox {
    &self.outbox
  }

  /// Run one sync attempt.
  ///
  /// Type groups are submitted concurrently; records within a group go out
  /// one at a time in list order. Delivered records leave the outbox, failed
  /// ones stay for the next attempt. An `Err` means the outbox itself could
  /// not be read or written, in which case it is left untouched.
  pub async fn run(&self) -> Result<SyncOutcome> {
    if !self.connectivity.is_online() {
      tracing::debug!("offline, sync skipped");
      return Ok(SyncOutcome::Skipped);
    }
    if !self.tracker.begin() {
      tracing::debug!("sync already running");
      return Ok(SyncOutcome::Skipped);
    }

    match self.drain().await {
      Ok(report) => {
        if report.is_complete() {
          self.tracker.succeed();
        } else {
          self.tracker.fail();
        }
        tracing::info!(
          delivered = report.delivered_count(),
          failed = report.failed_count(),
          "sync finished"
        );
        Ok(SyncOutcome::Completed(report))
      }
      Err(e) => {
        self.tracker.fail();
        tracing::error!(error = %e, "sync failed");
        Err(e)
      }
    }
  }

  async fn drain(&self) -> Result<SyncReport> {
    let Some(batch) = self.outbox.load()? else {
      return Ok(SyncReport::default());
    };

    let groups = batch
      .pending_types()
      .map(|(entity_type, records)| self.sync_type(entity_type, records));
    let results = join_all(groups).await;

    let mut report = SyncReport::default();
    let mut delivered_records: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (entity_type, delivered, failed) in results {
      report
        .delivered
        .insert(entity_type.clone(), delivered.len());
      if !failed.is_empty() {
        report.failed.insert(entity_type.clone(), failed);
      }
      delivered_records.insert(entity_type, delivered);
    }

    self.settle(&delivered_records)?;
    Ok(report)
  }

  /// Submit one type's records in order. Returns (type, delivered, failed).
  async fn sync_type(
    &self,
    entity_type: &str,
    records: &[Value],
  ) -> (String, Vec<Value>, Vec<Value>) {
    let endpoint = self.endpoint(entity_type);
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for record in records {
      match self.deliver(&endpoint, record).await {
        Ok(()) => delivered.push(record.clone()),
        Err(e) => {
          tracing::warn!(entity_type, error = %e, "record sync failed");
          failed.push(record.clone());
        }
      }
    }

    (entity_type.to_string(), delivered, failed)
  }

  async fn deliver(&self, endpoint: &str, record: &Value) -> Result<()> {
    let result = self
      .interceptor
      .handle(Request::post_json(endpoint, record))
      .await?;

    if !result.is_from_network() {
      return Err(eyre!("POST {} not delivered, served {:?}", endpoint, result.source));
    }
    if !result.data.is_ok() {
      return Err(eyre!("POST {} rejected with status {}", endpoint, result.data.status));
    }
    Ok(())
  }

  /// Remove delivered records from the stored batch.
  ///
  /// The batch is re-read so records staged while the sync was running
  /// survive.
  fn settle(&self, delivered: &BTreeMap<String, Vec<Value>>) -> Result<()> {
    let Some(current) = self.outbox.load()? else {
      return Ok(());
    };

    let remaining = without_delivered(current, delivered);
    if remaining.is_empty() {
      self.outbox.clear()
    } else {
      self.outbox.save(&remaining)
    }
  }

  fn endpoint(&self, entity_type: &str) -> String {
    let prefix = self.interceptor.routes().api_prefix.trim_end_matches('/');
    format!("{}/{}", prefix, entity_type)
  }
}

/// Drop one stored occurrence per delivered record, keeping order.
fn without_delivered(
  mut batch: OfflineBatch,
  delivered: &BTreeMap<String, Vec<Value>>,
) -> OfflineBatch {
  for (entity_type, records) in delivered {
    if let Some(stored) = batch.entities.get_mut(entity_type) {
      for record in records {
        if let Some(pos) = stored.iter().position(|r| r == record) {
          stored.remove(pos);
        }
      }
    }
  }
  batch
}
