//! Tracing setup for the host binary.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the log filter directives.
pub const LOG_ENV: &str = "OFFLINE_WORKER_LOG";

/// Install the global subscriber: a daily rolling file under `log_dir`, plus
/// stderr when `verbose` is set.
///
/// The returned guard flushes the file writer on drop; keep it alive for the
/// lifetime of the process.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "offline-worker.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let file = fmt::layer().with_writer(writer).with_ansi(false);
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr).boxed());

  tracing_subscriber::registry()
    .with(filter)
    .with(file)
    .with(stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
