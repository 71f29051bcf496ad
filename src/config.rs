use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheLayer, FileStorage, NoopStorage};
use crate::loader::{SyncOptions, DEFAULT_CONCURRENCY, DEFAULT_PAGE_SIZE};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub jira: JiraConfig,
  /// JQL selecting the issues to synchronize
  pub jql: String,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JiraConfig {
  pub url: String,
  pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// Cache directory (default: $XDG_CACHE_HOME/jsync)
  pub dir: Option<PathBuf>,
  /// How long responses stay fresh, in hours
  pub ttl_hours: u64,
  /// Let concurrent requests for the same URL share one network call
  pub single_flight: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      dir: None,
      ttl_hours: 7 * 24,
      single_flight: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub page_size: u32,
  pub concurrency: usize,
  pub fields: Vec<String>,
  pub expand: Vec<String>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      page_size: DEFAULT_PAGE_SIZE,
      concurrency: DEFAULT_CONCURRENCY,
      fields: Vec::new(),
      expand: vec!["changelog".to_string()],
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// An explicit path must exist. Otherwise the first of ./jsync.yaml and
  /// $XDG_CONFIG_HOME/jsync/config.yaml that exists is used, and with neither
  /// present everything comes from defaults and command line flags.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = match explicit_path {
      Some(p) if !p.exists() => return Err(eyre!("Config file not found: {}", p.display())),
      Some(p) => Some(p.to_path_buf()),
      None => Self::search_paths().into_iter().find(|p| p.exists()),
    };

    path.map_or_else(|| Ok(Self::default()), |p| Self::load_from_path(&p))
  }

  /// Implicit config locations, most specific first.
  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("jsync.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("jsync").join("config.yaml")));
    paths
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;

    // An empty document is null rather than an empty mapping.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }

    serde_yaml::from_str(&contents)
      .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))
  }

  /// Check that everything needed to reach Jira is present.
  pub fn validate_connection(&self) -> Result<()> {
    if self.jira.url.is_empty() {
      return Err(eyre!("Jira URL missing. Set jira.url in the config or pass --host."));
    }
    if self.jira.email.is_empty() {
      return Err(eyre!("Jira user missing. Set jira.email in the config or pass --user."));
    }
    Ok(())
  }

  /// Check that a sync can run: connection details, a query, sane limits.
  pub fn validate(&self) -> Result<()> {
    self.validate_connection()?;
    if self.jql.is_empty() {
      return Err(eyre!("JQL query missing. Set jql in the config or pass --jql."));
    }
    if self.sync.page_size == 0 {
      return Err(eyre!("sync.page_size must be at least 1"));
    }
    if self.sync.concurrency == 0 {
      return Err(eyre!("sync.concurrency must be at least 1"));
    }
    Ok(())
  }

  /// Resolve the Jira API token.
  ///
  /// `explicit` (the --token flag) wins over the environment, where
  /// JSYNC_JIRA_TOKEN is checked before JIRA_API_TOKEN. Empty values count as
  /// unset.
  pub fn api_token(explicit: Option<String>) -> Result<String> {
    resolve_token(explicit, |name| std::env::var(name).ok())
  }

  pub fn cache_dir(&self) -> PathBuf {
    self
      .cache
      .dir
      .clone()
      .unwrap_or_else(FileStorage::default_dir)
  }

  pub fn cache_ttl(&self) -> Duration {
    Duration::from_secs(self.cache.ttl_hours.saturating_mul(3600))
  }

  pub fn cache_layer(&self) -> CacheLayer {
    let layer = if self.cache.enabled {
      CacheLayer::new(FileStorage::new(self.cache_dir(), self.cache_ttl()))
    } else {
      CacheLayer::new(NoopStorage)
    };
    layer.with_single_flight(self.cache.single_flight)
  }

  pub fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      jql: self.jql.clone(),
      page_size: self.sync.page_size,
      concurrency: self.sync.concurrency,
      fields: self.sync.fields.clone(),
      expand: self.sync.expand.clone(),
    }
  }
}

const TOKEN_VARS: [&str; 2] = ["JSYNC_JIRA_TOKEN", "JIRA_API_TOKEN"];

fn resolve_token(explicit: Option<String>, env: impl Fn(&str) -> Option<String>) -> Result<String> {
  let token = match explicit {
    Some(token) => token,
    None => TOKEN_VARS
      .iter()
      .find_map(|name| env(name).filter(|t| !t.is_empty()))
      .unwrap_or_default(),
  };

  if token.is_empty() {
    return Err(eyre!(
      "Jira API token missing. Pass --token or set JSYNC_JIRA_TOKEN or JIRA_API_TOKEN."
    ));
  }
  Ok(token)
}
