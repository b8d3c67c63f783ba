//! Tracing setup: env filter plus a daily rolling file.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "TICKETSYNC_LOG";

const DEFAULT_LEVEL: &str = "info";

/// Build the filter from `TICKETSYNC_LOG`, else `fallback`, else `info`.
pub fn env_filter(fallback: Option<&str>) -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV)
    .or_else(|_| EnvFilter::try_new(fallback.unwrap_or(DEFAULT_LEVEL)))
    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

/// Install the global subscriber writing to `directory/ticketsync.log.<date>`.
///
/// The returned guard flushes buffered lines on drop; keep it alive for the
/// life of the process.
pub fn init(directory: &Path, level: Option<&str>) -> Result<WorkerGuard> {
  std::fs::create_dir_all(directory)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", directory.display(), e))?;

  let appender = tracing_appender::rolling::daily(directory, "ticketsync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(env_filter(level))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false),
    )
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
