use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use offline_worker::cache::{CacheStore, SqliteCacheStore};
use offline_worker::config::{self, Config};
use offline_worker::connectivity::{spawn_probe, OnlineFlag};
use offline_worker::http::HttpClient;
use offline_worker::lifecycle::NoClients;
use offline_worker::logging;
use offline_worker::queue::{QueueStore, SqliteQueueStore};
use offline_worker::{LifecycleController, WorkerDeps};

#[derive(Parser, Debug)]
#[command(name = "offline-worker")]
#[command(about = "Headless host for the offline request cache and write-replay queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-worker/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install, activate and keep replaying queued writes until interrupted
  Run,
  /// List requests waiting in the offline queue
  Queue,
  /// List cache namespaces
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config::data_dir()?.join("logs"), args.verbose)?;

  match args.command {
    Command::Run => run(config).await,
    Command::Queue => list_queue(&config),
    Command::Caches => list_caches(&config),
  }
}

async fn run(config: Config) -> Result<()> {
  let network = Arc::new(HttpClient::new()?);
  let flag = OnlineFlag::new(true);
  let probe = spawn_probe(
    network.clone(),
    config.origin.clone(),
    flag.clone(),
    config.poll_interval(),
  );

  let deps = WorkerDeps {
    cache_store: Arc::new(SqliteCacheStore::open_path(&config.cache_db_path()?)?),
    queue_store: Arc::new(SqliteQueueStore::open_path(&config.queue_db_path()?)?),
    network,
    connectivity: Arc::new(flag),
    clients: Arc::new(NoClients),
  };
  let worker = LifecycleController::new(config, deps);

  let assets = worker.install().await?;
  let report = worker.activate().await?;
  info!(assets, purged = report.purged.len(), "Worker running");

  tokio::signal::ctrl_c().await?;
  info!("Shutting down");
  probe.abort();
  Ok(())
}

fn list_queue(config: &Config) -> Result<()> {
  let store = SqliteQueueStore::open_path(&config.queue_db_path()?)?;
  let records = store.get_all()?;
  if records.is_empty() {
    println!("Queue is empty");
    return Ok(());
  }

  for record in records {
    println!(
      "{:>6}  {}  ({} bytes{})",
      record.id,
      record.url,
      record.payload.len(),
      if record.auth_header.is_some() { ", authorized" } else { "" }
    );
  }
  Ok(())
}

fn list_caches(config: &Config) -> Result<()> {
  let store = SqliteCacheStore::open_path(&config.cache_db_path()?)?;
  let current = config.namespace();
  for name in store.keys()? {
    let marker = if name == current { "*" } else { " " };
    println!("{} {}", marker, name);
  }
  Ok(())
}
