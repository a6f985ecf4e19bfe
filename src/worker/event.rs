use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use super::notification::Notification;
use crate::cache::CacheResult;
use crate::net::{Request, Response};
use crate::outbox::OfflineBatch;
use crate::sync::SyncOutcome;

/// Tag of the background sync registration that drains the outbox.
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Events dispatched into the worker
#[derive(Debug)]
pub enum WorkerEvent {
  /// New generation installing: precache assets
  Install,
  /// New generation taking over: sweep stale caches, claim clients
  Activate,
  /// Request issued by the hosting page
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<CacheResult<Response>>>,
  },
  /// Raw control message posted by the page
  Message(Value),
  /// Push delivered, with optional text payload
  Push(Option<String>),
  /// Notification clicked, with the action id if a button was used
  NotificationClick { action: Option<String> },
  /// Connectivity restored
  Online,
  /// Connectivity lost
  Offline,
  /// Background sync fired for a registration tag
  Sync { tag: String },
}

/// Effects the worker asks its clients to perform
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEffect {
  ShowNotification(Notification),
  CloseNotification,
  OpenWindow(String),
  /// The worker controls all open clients now
  ClaimClients,
  SyncFinished(SyncOutcome),
  /// The outbox could not be read or written; it is left as it was
  SyncFailed(String),
}

/// Recognized control messages. Anything else is ignored, including a
/// `CACHE_OFFLINE_DATA` whose payload is not a well-formed batch.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  #[serde(rename = "CACHE_OFFLINE_DATA")]
  CacheOfflineData { data: OfflineBatch },
}

impl ControlMessage {
  pub fn parse(value: &Value) -> Option<Self> {
    Self::deserialize(value).ok()
  }
}

/// Sending side of the worker's event queue
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  pub(super) fn new(tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
    Self { tx }
  }

  pub fn send(&self, event: WorkerEvent) -> Result<()> {
    self
      .tx
      .send(event)
      .map_err(|_| eyre!("Worker has shut down"))
  }

  /// Route a request through the worker and wait for its response.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::Fetch { request, reply })?;
    rx.await
      .map_err(|_| eyre!("Worker dropped the request"))?
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_skip_waiting() {
    assert_eq!(
      ControlMessage::parse(&json!({"type": "SKIP_WAITING"})),
      Some(ControlMessage::SkipWaiting)
    );
  }

  #[test]
  fn test_parse_cache_offline_data() {
    let message = json!({
      "type": "CACHE_OFFLINE_DATA",
      "data": {"customers": [{"id": 1}], "lastSync": "2024-03-01T10:00:00Z"},
    });

    let Some(ControlMessage::CacheOfflineData { data }) = ControlMessage::parse(&message) else {
      panic!("expected CACHE_OFFLINE_DATA");
    };
    assert_eq!(data.entities["customers"], vec![json!({"id": 1})]);
    assert_eq!(data.last_sync.to_rfc3339(), "2024-03-01T10:00:00+00:00");
  }

  #[test]
  fn test_offline_data_that_is_not_a_batch_is_unrecognized() {
    let extra_field = json!({
      "type": "CACHE_OFFLINE_DATA",
      "data": {"customers": [], "meta": {"v": 1}},
    });
    let not_a_list = json!({"type": "CACHE_OFFLINE_DATA", "data": {"customers": "Acme"}});

    assert_eq!(ControlMessage::parse(&extra_field), None);
    assert_eq!(ControlMessage::parse(&not_a_list), None);
  }

  #[test]
  fn test_malformed_messages_are_unrecognized() {
    assert_eq!(ControlMessage::parse(&json!({"type": "RELOAD"})), None);
    assert_eq!(ControlMessage::parse(&json!({"type": "CACHE_OFFLINE_DATA"})), None);
    assert_eq!(ControlMessage::parse(&json!("SKIP_WAITING")), None);
    assert_eq!(ControlMessage::parse(&json!(null)), None);
  }
}
