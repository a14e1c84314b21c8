use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Worker configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin of the hosting application; relative URLs resolve against it
  pub origin: Url,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Path prefix of build-produced assets served without body transform
  #[serde(default = "default_static_prefix")]
  pub static_prefix: String,
  /// Path of the asset manifest fetched at install time
  #[serde(default = "default_manifest_path")]
  pub manifest_path: String,
  /// Manifest entries ending with this suffix are never pre-cached
  #[serde(default = "default_excluded_suffix")]
  pub excluded_suffix: String,
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  #[serde(default)]
  pub removal_policy: RemovalPolicy,
  pub queue_db: Option<PathBuf>,
  pub cache_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
  #[serde(default = "default_cache_name")]
  pub name: String,
  #[serde(default = "default_cache_version")]
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: default_cache_name(),
      version: default_cache_version(),
    }
  }
}

/// When replayed records leave the durable queue.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
  /// Delete each record once its replay has settled (at-least-once)
  #[default]
  OnSettle,
  /// Delete the whole snapshot as soon as the replay chain starts
  OnInitiate,
}

fn default_cache_name() -> String {
  "Application Cache".to_string()
}

fn default_cache_version() -> String {
  "1".to_string()
}

fn default_static_prefix() -> String {
  "/static/".to_string()
}

fn default_manifest_path() -> String {
  "/application/resources/asset-manifest.json".to_string()
}

fn default_excluded_suffix() -> String {
  ".map".to_string()
}

fn default_poll_interval_ms() -> u64 {
  3000
}

impl Config {
  /// Configuration with every optional field at its default.
  pub fn for_origin(origin: Url) -> Self {
    Self {
      origin,
      cache: CacheConfig::default(),
      static_prefix: default_static_prefix(),
      manifest_path: default_manifest_path(),
      excluded_suffix: default_excluded_suffix(),
      poll_interval_ms: default_poll_interval_ms(),
      removal_policy: RemovalPolicy::default(),
      queue_db: None,
      cache_db: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
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
        "No configuration file found. Create one at ~/.config/offline-worker/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Reject values the worker cannot run with.
  pub fn validate(&self) -> Result<()> {
    if self.poll_interval_ms == 0 {
      return Err(eyre!("poll_interval_ms must be greater than zero"));
    }
    // Every manifest entry ends with ""
    if self.excluded_suffix.is_empty() {
      return Err(eyre!("excluded_suffix must not be empty"));
    }
    Ok(())
  }

  /// Identity of the current cache namespace: name followed by version.
  pub fn namespace(&self) -> String {
    format!("{}{}", self.cache.name, self.cache.version)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  /// Resolve a possibly relative URL against the origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin
      .join(url)
      .map_err(|e| eyre!("Failed to resolve '{}' against {}: {}", url, self.origin, e))
  }

  pub fn manifest_url(&self) -> Result<Url> {
    self.resolve(&self.manifest_path)
  }

  pub fn queue_db_path(&self) -> Result<PathBuf> {
    match &self.queue_db {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("queue.db")),
    }
  }

  pub fn cache_db_path(&self) -> Result<PathBuf> {
    match &self.cache_db {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

/// Per-user data directory for the worker's databases and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-worker"))
}
