use crate::cache::{CacheStorage, NoopStorage, SqliteStorage};
use crate::config::Config;
use crate::net::{HttpTransport, Request, Transport};
use crate::sync::SyncOutcome;
use crate::worker::{ClientEffect, Worker, WorkerEvent, BACKGROUND_SYNC_TAG};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// CLI subcommands, one per worker operation
#[derive(Subcommand, Debug)]
pub enum Command {
  /// Route a request through the interceptor and print the response
  Fetch {
    /// Request target, e.g. /api/customers?page=2
    target: String,
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Queue a record in the offline outbox
  Stage {
    /// Entity type, e.g. customers
    entity: String,
    /// Record as JSON
    record: String,
  },
  /// Replay the outbox against the server
  Sync,
  /// Show worker, cache and outbox state
  Status,
  /// Precache static assets for the configured generation
  Install {
    /// Activate right after installing
    #[arg(long)]
    skip_waiting: bool,
  },
  /// Activate the configured generation, deleting stale caches
  Activate,
  /// Post a control message, e.g. '{"type":"SKIP_WAITING"}'
  Message {
    /// Message as JSON
    json: String,
  },
  /// Simulate a push and print the resulting notification
  Push {
    /// Notification text
    text: Option<String>,
  },
  /// Run the worker, syncing whenever the origin becomes reachable
  Serve,
}

/// Wires configuration, storage and transport into a worker
pub struct App {
  config: Config,
  worker: Worker,
  effects: mpsc::UnboundedReceiver<ClientEffect>,
  transport: Arc<dyn Transport>,
}

impl App {
  pub fn new(config: Config, ephemeral: bool) -> Result<Self> {
    let storage = Self::open_storage(&config, ephemeral);
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config)?);
    let (worker, effects) = Worker::new(&config, storage, Arc::clone(&transport))?;

    Ok(Self {
      config,
      worker,
      effects,
      transport,
    })
  }

  /// Open the cache database, degrading to network-only if that fails.
  fn open_storage(config: &Config, ephemeral: bool) -> Arc<dyn CacheStorage> {
    let opened = if ephemeral {
      SqliteStorage::open_in_memory()
    } else {
      config
        .database_path()
        .and_then(|path| SqliteStorage::open(&path))
    };

    match opened {
      Ok(storage) => Arc::new(storage),
      Err(e) => {
        tracing::error!(error = %e, "cache storage unavailable, running network-only");
        Arc::new(NoopStorage)
      }
    }
  }

  pub async fn run(mut self, command: Command) -> Result<()> {
    match command {
      Command::Fetch {
        target,
        method,
        data,
      } => self.fetch(&target, &method, data.as_deref()).await?,
      Command::Stage { entity, record } => {
        let record: Value =
          serde_json::from_str(&record).map_err(|e| eyre!("Record is not valid JSON: {}", e))?;
        self.worker.outbox().stage(&entity, record)?;
        println!(
          "queued 1 {} record ({} pending)",
          entity,
          self.worker.outbox().pending_count()?
        );
      }
      Command::Sync => {
        self
          .worker
          .handle(WorkerEvent::Sync {
            tag: BACKGROUND_SYNC_TAG.to_string(),
          })
          .await;
        self.print_effects();
        println!("sync status: {}", self.worker.sync_status());
      }
      Command::Status => {
        let snapshot = self.worker.snapshot()?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
      }
      Command::Install { skip_waiting } => {
        if skip_waiting {
          self
            .worker
            .handle(WorkerEvent::Message(serde_json::json!({"type": "SKIP_WAITING"})))
            .await;
        }
        self.worker.handle(WorkerEvent::Install).await;
        println!("installed generation {}", self.config.cache.version);
        self.print_effects();
      }
      Command::Activate => {
        self.worker.handle(WorkerEvent::Activate).await;
        self.print_effects();
      }
      Command::Message { json } => {
        let message: Value =
          serde_json::from_str(&json).map_err(|e| eyre!("Message is not valid JSON: {}", e))?;
        self.worker.handle(WorkerEvent::Message(message)).await;
        self.print_effects();
      }
      Command::Push { text } => {
        self.worker.handle(WorkerEvent::Push(text)).await;
        self.print_effects();
      }
      Command::Serve => self.serve().await?,
    }

    Ok(())
  }

  async fn fetch(&self, target: &str, method: &str, data: Option<&str>) -> Result<()> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;

    let mut request = match data {
      Some(data) => {
        let body: Value =
          serde_json::from_str(data).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
        let mut request = Request::post_json(target, &body);
        request.method = method;
        request
      }
      None => Request::new(method, target),
    };
    request
      .headers
      .push(("accept".to_string(), "application/json, text/html".to_string()));

    let result = self.worker.interceptor().handle(request).await?;
    eprintln!("{} ({:?})", result.data.status, result.source);
    match result.data.json_body() {
      Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
      Err(_) => println!("{}", result.data.text()),
    }
    Ok(())
  }

  /// Install, activate, then hand the worker to its event loop and probe
  /// the origin on every tick until Ctrl-C.
  async fn serve(self) -> Result<()> {
    let Self {
      config,
      mut worker,
      mut effects,
      transport,
    } = self;

    worker.handle(WorkerEvent::Install).await;
    worker.handle(WorkerEvent::Activate).await;
    let mut connectivity = worker.connectivity().subscribe();
    let mut sync_status = worker.subscribe_sync_status();
    let handle = worker.spawn();

    let interval_secs = config.network.probe_interval_secs.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    let probe_target = config.routes.app_root.clone();

    tracing::info!(origin = %config.server.origin, interval_secs, "serving");
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let reachable = transport.send(Request::get(&probe_target)).await.is_ok();
          handle.send(if reachable { WorkerEvent::Online } else { WorkerEvent::Offline })?;
        }
        Some(effect) = effects.recv() => print_effect(effect),
        Ok(()) = connectivity.changed() => {
          let state = *connectivity.borrow_and_update();
          println!("connectivity: {:?}", state);
        }
        Ok(()) = sync_status.changed() => {
          let status = *sync_status.borrow_and_update();
          println!("sync status: {}", status);
        }
        _ = tokio::signal::ctrl_c() => {
          tracing::info!("shutting down");
          break;
        }
      }
    }

    Ok(())
  }

  fn print_effects(&mut self) {
    while let Ok(effect) = self.effects.try_recv() {
      print_effect(effect);
    }
  }
}

fn print_effect(effect: ClientEffect) {
  match effect {
    ClientEffect::ShowNotification(notification) => {
      match serde_json::to_string_pretty(&notification) {
        Ok(json) => println!("notification: {}", json),
        Err(e) => tracing::warn!(error = %e, "failed to render notification"),
      }
    }
    ClientEffect::CloseNotification => println!("notification closed"),
    ClientEffect::OpenWindow(url) => println!("open window: {}", url),
    ClientEffect::ClaimClients => println!("activated, controlling clients"),
    ClientEffect::SyncFinished(SyncOutcome::Skipped) => println!("sync skipped"),
    ClientEffect::SyncFinished(SyncOutcome::Completed(report)) => {
      println!(
        "synced {} record(s), {} failed and requeued",
        report.delivered_count(),
        report.failed_count()
      );
    }
    ClientEffect::SyncFailed(error) => println!("sync failed, outbox kept: {}", error),
  }
}
