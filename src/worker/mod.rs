//! The offline worker: one event queue driving every component.
//!
//! Events (install, activate, fetch, control messages, push, connectivity,
//! background sync) are handled one at a time in arrival order. Fetches and
//! syncs are the exception: the run loop hands each to its own task, so page
//! requests keep flowing while the outbox drains.

mod event;
mod lifecycle;
mod notification;

pub use event::{ClientEffect, ControlMessage, WorkerEvent, WorkerHandle, BACKGROUND_SYNC_TAG};
pub use lifecycle::{Lifecycle, WorkerState};
pub use notification::Notification;

use color_eyre::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::cache::{CacheGeneration, CacheStorage};
use crate::config::Config;
use crate::interceptor::Interceptor;
use crate::net::Transport;
use crate::outbox::Outbox;
use crate::sync::{ConnectivityMonitor, ConnectivityState, SyncEngine, SyncStatus};

/// Point-in-time view of the worker, printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
  pub state: WorkerState,
  pub generation: String,
  pub online: bool,
  pub sync_status: String,
  /// Recent sync status transitions, oldest first
  pub sync_history: Vec<String>,
  pub pending_records: usize,
  /// Cache name to the keys it holds
  pub caches: BTreeMap<String, Vec<String>>,
}

pub struct Worker {
  generation: CacheGeneration,
  storage: Arc<dyn CacheStorage>,
  interceptor: Arc<Interceptor>,
  engine: Arc<SyncEngine>,
  connectivity: Arc<ConnectivityMonitor>,
  lifecycle: Lifecycle,
  precache: Vec<String>,
  app_root: String,
  effects: mpsc::UnboundedSender<ClientEffect>,
}

impl Worker {
  /// Assemble a worker over the given storage and transport.
  ///
  /// Returns the worker and the receiving end of its client effects.
  pub fn new(
    config: &Config,
    storage: Arc<dyn CacheStorage>,
    transport: Arc<dyn Transport>,
  ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEffect>)> {
    let generation = CacheGeneration::from_config(&config.cache);
    let interceptor = Arc::new(Interceptor::new(
      Arc::clone(&storage),
      transport,
      &generation,
      config,
    )?);
    let outbox = Outbox::open(Arc::clone(&storage), &generation.offline_cache())?;
    let connectivity = Arc::new(ConnectivityMonitor::default());
    let engine = Arc::new(SyncEngine::new(
      Arc::clone(&interceptor),
      outbox,
      Arc::clone(&connectivity),
    ));

    let mut precache = config.precache.clone();
    if !precache.contains(&config.routes.offline_page) {
      precache.push(config.routes.offline_page.clone());
    }

    let (effects, effects_rx) = mpsc::unbounded_channel();

    Ok((
      Self {
        generation,
        storage,
        interceptor,
        engine,
        connectivity,
        lifecycle: Lifecycle::new(),
        precache,
        app_root: config.routes.app_root.clone(),
        effects,
      },
      effects_rx,
    ))
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn interceptor(&self) -> &Arc<Interceptor> {
    &self.interceptor
  }

  pub fn outbox(&self) -> &Outbox {
    self.engine.outbox()
  }

  pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
    &self.connectivity
  }

  pub fn snapshot(&self) -> Result<WorkerSnapshot> {
    let mut caches = BTreeMap::new();
    for name in self.storage.keys()? {
      let handle = self.storage.open(&name)?;
      caches.insert(name, self.storage.entries(&handle)?);
    }

    Ok(WorkerSnapshot {
      state: self.lifecycle.state(),
      generation: self.generation.version().to_string(),
      online: self.connectivity.is_online(),
      sync_status: self.engine.status().to_string(),
      sync_history: self
        .engine
        .tracker()
        .history()
        .iter()
        .map(ToString::to_string)
        .collect(),
      pending_records: self.outbox().pending_count()?,
      caches,
    })
  }

  /// Receiver for sync status transitions.
  pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncStatus> {
    self.engine.tracker().subscribe()
  }

  /// Handle one event to completion, including any sync it triggers.
  pub async fn handle(&mut self, event: WorkerEvent) {
    if let Some(sync) = self.dispatch(event).await {
      sync.await;
    }
  }

  /// Apply one event. A sync it triggers is returned instead of awaited so
  /// the caller decides whether to wait for it or spawn it.
  async fn dispatch(&mut self, event: WorkerEvent) -> Option<BoxFuture<'static, ()>> {
    match event {
      WorkerEvent::Install => self.install().await,
      WorkerEvent::Activate => self.activate(),
      WorkerEvent::Fetch { request, reply } => {
        let result = self.interceptor.handle(request).await;
        let _ = reply.send(result);
      }
      WorkerEvent::Message(message) => self.handle_message(message),
      WorkerEvent::Push(payload) => {
        self.emit(ClientEffect::ShowNotification(Notification::from_push(
          payload.as_deref(),
        )));
      }
      WorkerEvent::NotificationClick { action } => {
        self.emit(ClientEffect::CloseNotification);
        if notification::click_opens_app(action.as_deref()) {
          self.emit(ClientEffect::OpenWindow(self.app_root.clone()));
        }
      }
      WorkerEvent::Online => {
        if self.connectivity.set(ConnectivityState::Online) {
          return Some(self.sync());
        }
      }
      WorkerEvent::Offline => {
        self.connectivity.set(ConnectivityState::Offline);
      }
      WorkerEvent::Sync { tag } => {
        if tag == BACKGROUND_SYNC_TAG {
          return Some(self.sync());
        }
        tracing::debug!(%tag, "ignoring unknown sync tag");
      }
    }
    None
  }

  /// Spawn the event loop and return a handle for feeding it.
  pub fn spawn(self) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(self.run(rx));
    WorkerHandle::new(tx)
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = rx.recv().await {
      match event {
        WorkerEvent::Fetch { request, reply } => {
          let interceptor = Arc::clone(&self.interceptor);
          tokio::spawn(async move {
            let _ = reply.send(interceptor.handle(request).await);
          });
        }
        event => {
          if let Some(sync) = self.dispatch(event).await {
            tokio::spawn(sync);
          }
        }
      }
    }
    tracing::debug!("worker event queue closed");
  }

  async fn install(&mut self) {
    tracing::info!(generation = self.generation.version(), "installing");
    let stored = self.interceptor.precache(&self.precache).await;
    tracing::info!(stored, total = self.precache.len(), "precache finished");

    if self.lifecycle.installed() {
      self.activate();
    }
  }

  fn activate(&mut self) {
    if !self.lifecycle.activate() {
      return;
    }

    match self.generation.sweep(self.storage.as_ref()) {
      Ok(deleted) if !deleted.is_empty() => {
        tracing::info!(count = deleted.len(), "stale caches removed");
      }
      Ok(_) => {}
      Err(e) => tracing::warn!(error = %e, "cache sweep failed"),
    }

    tracing::info!(generation = self.generation.version(), "activated");
    self.emit(ClientEffect::ClaimClients);
  }

  fn handle_message(&mut self, message: Value) {
    match ControlMessage::parse(&message) {
      Some(ControlMessage::SkipWaiting) => {
        if self.lifecycle.skip_waiting() {
          self.activate();
        }
      }
      Some(ControlMessage::CacheOfflineData { data }) => {
        if let Err(e) = self.outbox().save(&data) {
          tracing::error!(error = %e, "failed to cache offline data");
        }
      }
      None => tracing::debug!(%message, "ignoring unrecognized message"),
    }
  }

  /// One sync attempt, detached from `self`. A second attempt started while
  /// one is running comes back `Skipped`.
  fn sync(&self) -> BoxFuture<'static, ()> {
    let engine = Arc::clone(&self.engine);
    let effects = self.effects.clone();

    async move {
      let effect = match engine.run().await {
        Ok(outcome) => ClientEffect::SyncFinished(outcome),
        Err(e) => ClientEffect::SyncFailed(e.to_string()),
      };
      if effects.send(effect).is_err() {
        tracing::debug!("no client listening for effects");
      }
    }
    .boxed()
  }

  pub fn sync_status(&self) -> SyncStatus {
    self.engine.status()
  }

  fn emit(&self, effect: ClientEffect) {
    if self.effects.send(effect).is_err() {
      tracing::debug!("no client listening for effects");
    }
  }
}
