//! Sync status state machine.
//!
//! `Idle -> Syncing -> {Success, Error}`, back to `Idle` before the next
//! attempt. The current value is published on a `watch` channel so the
//! hosting page (or a test) can observe it.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::watch;

/// How many transitions are kept for diagnostics.
const HISTORY_LEN: usize = 16;

/// Outcome of the most recent sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  /// No sync attempted yet, or about to start a new one
  Idle,
  /// A sync is running
  Syncing,
  /// Every queued record was delivered
  Success,
  /// The sync failed or left records behind
  Error,
}

impl SyncStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyncStatus::Idle => "idle",
      SyncStatus::Syncing => "syncing",
      SyncStatus::Success => "success",
      SyncStatus::Error => "error",
    }
  }
}

impl std::fmt::Display for SyncStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Owner of the sync status.
pub struct SyncTracker {
  tx: watch::Sender<SyncStatus>,
  history: Mutex<VecDeque<(SyncStatus, DateTime<Utc>)>>,
}

impl SyncTracker {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(SyncStatus::Idle);
    let mut history = VecDeque::with_capacity(HISTORY_LEN);
    history.push_back((SyncStatus::Idle, Utc::now()));

    Self {
      tx,
      history: Mutex::new(history),
    }
  }

  pub fn current(&self) -> SyncStatus {
    *self.tx.borrow()
  }

  pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
    self.tx.subscribe()
  }

  /// Enter `Syncing`, passing through `Idle` if a previous attempt finished.
  ///
  /// Returns `false` if a sync is already running.
  pub fn begin(&self) -> bool {
    match self.current() {
      SyncStatus::Syncing => false,
      SyncStatus::Idle => {
        self.set(SyncStatus::Syncing);
        true
      }
      SyncStatus::Success | SyncStatus::Error => {
        self.set(SyncStatus::Idle);
        self.set(SyncStatus::Syncing);
        true
      }
    }
  }

  pub fn succeed(&self) {
    self.set(SyncStatus::Success);
  }

  pub fn fail(&self) {
    self.set(SyncStatus::Error);
  }

  /// Recent transitions, oldest first.
  pub fn history(&self) -> Vec<SyncStatus> {
    match self.history.lock() {
      Ok(history) => history.iter().map(|(status, _)| *status).collect(),
      Err(_) => Vec::new(),
    }
  }

  fn set(&self, status: SyncStatus) {
    self.tx.send_replace(status);
    tracing::debug!(%status, "sync status changed");

    if let Ok(mut history) = self.history.lock() {
      if history.len() == HISTORY_LEN {
        history.pop_front();
      }
      history.push_back((status, Utc::now()));
    }
  }
}

impl Default for SyncTracker {
  fn default() -> Self {
    Self::new()
  }
}
