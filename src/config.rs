use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  pub cache: CacheConfig,
  /// Fixed precache manifest: static assets plus an allow-list of GET
  /// API endpoints, relative to the remote base URL.
  #[serde(default)]
  pub precache: Vec<String>,
  /// How long activation waits for old clients before claiming.
  #[serde(default = "default_grace_secs")]
  pub activation_grace_secs: u64,
  /// Override for the database location (defaults to the platform data dir).
  pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL the gateway fronts, e.g. "https://app.example.com".
  pub base_url: String,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cache name, versioned into the namespace identifier.
  pub name: String,
  /// Deployment version; bumping it supersedes the previous namespace.
  pub version: String,
  /// Path prefix that marks API requests.
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
}

fn default_grace_secs() -> u64 {
  5
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_api_prefix() -> String {
  "/api/v1/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offramp.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offramp/config.yaml
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
        "No configuration file found. Create one at ~/.config/offramp/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offramp.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offramp").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The current cache namespace, e.g. "app-cache-v1.0.0".
  pub fn namespace(&self) -> String {
    format!("{}-v{}", self.cache.name, self.cache.version)
  }

  pub fn activation_grace(&self) -> Duration {
    Duration::from_secs(self.activation_grace_secs)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.remote.timeout_secs)
  }
}
