//! Online/offline state fed by environment connectivity events.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Offline,
}

/// Owner of the connectivity state.
pub struct ConnectivityMonitor {
  tx: watch::Sender<ConnectivityState>,
}

impl ConnectivityMonitor {
  pub fn new(initial: ConnectivityState) -> Self {
    let (tx, _rx) = watch::channel(initial);
    Self { tx }
  }

  pub fn state(&self) -> ConnectivityState {
    *self.tx.borrow()
  }

  pub fn is_online(&self) -> bool {
    self.state() == ConnectivityState::Online
  }

  /// Record a connectivity event. Returns `true` on an actual transition.
  pub fn set(&self, state: ConnectivityState) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == state {
        false
      } else {
        *current = state;
        true
      }
    });

    if changed {
      tracing::info!(?state, "connectivity changed");
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
    self.tx.subscribe()
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new(ConnectivityState::Online)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_real_transitions_report_change() {
    let monitor = ConnectivityMonitor::default();
    assert!(monitor.is_online());
    assert!(!monitor.set(ConnectivityState::Online));
    assert!(monitor.set(ConnectivityState::Offline));
    assert!(!monitor.is_online());
    assert!(monitor.set(ConnectivityState::Online));
  }
}
