use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_REQUEST_TIMEOUT;

const APP_DIR: &str = "ticketsync";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Timeout for a single remote call, in seconds
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
  /// Owner identity for cache and queue partitioning
  pub user: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/ticketsync/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Directory for rolling log files (defaults to the data directory)
  pub directory: Option<PathBuf>,
  /// Filter directive used when TICKETSYNC_LOG is unset
  pub level: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
  DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ticketsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ticketsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/ticketsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("ticketsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.server.user.trim().is_empty() {
      return Err(eyre!("server.user must not be empty"));
    }
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }

  /// Resolved cache database path.
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }

  /// Resolved log directory.
  pub fn log_directory(&self) -> Result<PathBuf> {
    match &self.log.directory {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("logs")),
    }
  }

  /// Get the API token from environment variables.
  ///
  /// Checks TICKETSYNC_TOKEN first, then TICKETSYNC_API_TOKEN as fallback.
  /// Without one, requests go out unauthenticated; the cache and queue are
  /// still partitioned under `server.user`.
  pub fn api_token() -> Option<String> {
    std::env::var("TICKETSYNC_TOKEN")
      .or_else(|_| std::env::var("TICKETSYNC_API_TOKEN"))
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join(APP_DIR))
}
