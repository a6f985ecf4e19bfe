//! Worker lifecycle state.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
  /// Precaching for the new generation
  Installing,
  /// Installed, not yet controlling clients
  Waiting,
  /// Controlling clients
  Active,
}

/// Tracks `installing -> waiting -> active`.
#[derive(Debug)]
pub struct Lifecycle {
  state: WorkerState,
  skip_waiting: bool,
}

impl Lifecycle {
  pub fn new() -> Self {
    Self {
      state: WorkerState::Installing,
      skip_waiting: false,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Install finished. Returns `true` if activation should follow at once.
  pub fn installed(&mut self) -> bool {
    if self.state == WorkerState::Installing {
      self.state = WorkerState::Waiting;
    }
    self.skip_waiting && self.state == WorkerState::Waiting
  }

  /// Ask to bypass waiting. Returns `true` if activation should follow at
  /// once; otherwise it happens as soon as install finishes.
  pub fn skip_waiting(&mut self) -> bool {
    self.skip_waiting = true;
    self.state == WorkerState::Waiting
  }

  /// Move to `Active`. Returns `false` if it already was.
  pub fn activate(&mut self) -> bool {
    let changed = self.state != WorkerState::Active;
    self.state = WorkerState::Active;
    changed
  }
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self::new()
  }
}
