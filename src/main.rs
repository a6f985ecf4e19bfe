mod app;
mod cache;
mod config;
mod interceptor;
mod net;
mod outbox;
mod sync;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crm-pwa")]
#[command(about = "Offline cache and background sync for the CRM front-end")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crm-pwa/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep caches in memory instead of the on-disk database
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: app::Command,
}

/// Log to a daily file in the data directory so stdout stays clean.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = config::Config::data_dir()?;
  let file_appender = tracing_appender::rolling::daily(log_dir, "crm-pwa.log");
  let (writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crm_pwa=info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_logging()?;

  let config = config::Config::load(args.config.as_deref())?;

  let app = app::App::new(config, args.ephemeral)?;
  app.run(args.command).await?;

  Ok(())
}
