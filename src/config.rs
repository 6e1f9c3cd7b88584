use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{Manifest, SqliteStorage, StoreName};
use crate::policy::{Eligibility, PolicyConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// App name, used as the store name prefix
  pub app: String,
  /// Store generation; bump to invalidate everything stored so far
  pub version: u32,
  pub origin: Url,
  /// Resources seeded on activation, in order
  pub manifest: Vec<String>,
  /// Resource served to offline navigations
  pub shell: Option<String>,
  #[serde(default)]
  pub eligibility: Eligibility,
  /// Database file (defaults to the user data directory)
  pub database: Option<PathBuf>,
  pub request_timeout_secs: Option<u64>,
  #[serde(default)]
  pub prune_orphans: bool,
  #[serde(default)]
  pub storage: StorageKind,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Caching disabled; every request goes to the network
  None,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/shellcache/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    if config.app.trim().is_empty() {
      return Err(eyre!("app name must not be empty"));
    }
    Ok(config)
  }

  pub fn store_name(&self) -> StoreName {
    StoreName::versioned(&self.app, self.version)
  }

  /// Build the policy configuration, resolving manifest and shell against the origin.
  pub fn policy_config(&self) -> Result<PolicyConfig> {
    let manifest = Manifest::new(&self.origin, self.manifest.as_slice())?;

    let mut policy = PolicyConfig::new(self.origin.clone(), self.store_name(), manifest)
      .with_eligibility(self.eligibility)
      .with_prune_orphans(self.prune_orphans);

    if let Some(ref shell) = self.shell {
      policy = policy.with_shell(shell)?;
    }

    Ok(policy)
  }

  /// Database location.
  ///
  /// Checks SHELLCACHE_DATABASE first, then the config file, then the default.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SHELLCACHE_DATABASE") {
      return Ok(PathBuf::from(path));
    }

    match self.database {
      Some(ref path) => Ok(expand_home(path)),
      None => Ok(SqliteStorage::default_path()?),
    }
  }

  pub fn request_timeout(&self) -> Option<Duration> {
    self.request_timeout_secs.map(Duration::from_secs)
  }
}

fn expand_home(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), dirs::home_dir()) {
    (Ok(rest), Some(home)) => home.join(rest),
    _ => path.to_path_buf(),
  }
}
