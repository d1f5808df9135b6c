use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Default results per page for list commands (validated per view)
  pub results_per_page: Option<u32>,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the REST backend, e.g. https://api.battlestationdb.com
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Seconds before cached list data is considered stale
  #[serde(default = "default_stale_secs")]
  pub stale_secs: u64,
  /// Seconds an unread, unsubscribed entry survives before eviction
  #[serde(default = "default_gc_secs")]
  pub gc_secs: u64,
}

fn default_stale_secs() -> u64 {
  60 * 60
}

fn default_gc_secs() -> u64 {
  5 * 60
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: default_stale_secs(),
      gc_secs: default_gc_secs(),
    }
  }
}

impl CacheConfig {
  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_secs)
  }

  pub fn gc_after(&self) -> Duration {
    Duration::from_secs(self.gc_secs)
  }
}

impl Config {
  /// Load configuration.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./stationdb.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/stationdb/config.yaml
  ///
  /// With no file present, the configuration is built from the
  /// STATIONDB_API_URL environment variable alone.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::from_env()?,
    };

    // Environment always wins over the file for the base URL.
    if let Ok(url) = std::env::var("STATIONDB_API_URL") {
      config.api.url = url;
    }

    Ok(config)
  }

  fn from_env() -> Result<Self> {
    let url = std::env::var("STATIONDB_API_URL").map_err(|_| {
      eyre!(
        "No configuration found. Create ~/.config/stationdb/config.yaml \
         or set STATIONDB_API_URL."
      )
    })?;

    Ok(Self {
      api: ApiConfig { url },
      results_per_page: None,
      cache: CacheConfig::default(),
    })
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("stationdb.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("stationdb").join("config.yaml");
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

  /// Get the static API token from environment variables.
  ///
  /// Used by the CLI's static identity provider for authenticated commands.
  pub fn get_api_token() -> Result<String> {
    std::env::var("STATIONDB_API_TOKEN")
      .map_err(|_| eyre!("API token not found. Set the STATIONDB_API_TOKEN environment variable."))
  }

  /// Get the user id the static token belongs to.
  pub fn get_user_id() -> Result<String> {
    std::env::var("STATIONDB_USER_ID")
      .map_err(|_| eyre!("User id not found. Set the STATIONDB_USER_ID environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_config_yaml() {
    let yaml = "api:\n  url: https://api.example.com\ncache:\n  stale_secs: 120\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.api.url, "https://api.example.com");
    assert_eq!(config.cache.stale_after(), Duration::from_secs(120));
    // gc_secs falls back to its default when omitted
    assert_eq!(config.cache.gc_after(), Duration::from_secs(300));
  }

  #[test]
  fn test_cache_defaults() {
    let yaml = "api:\n  url: https://api.example.com\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.cache.stale_after(), Duration::from_secs(3600));
    assert!(config.results_per_page.is_none());
  }
}
