use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::gerrit::SizePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub gerrit: GerritConfig,
  #[serde(default)]
  pub smtp: Option<SmtpConfig>,
  /// Directory holding `<user>.yaml` recipient files and stylesheets
  #[serde(default = "default_users_dir")]
  pub users_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GerritConfig {
  /// Base URL of the Gerrit instance, e.g. https://android-review.googlesource.com/
  pub url: String,
  /// Display name used in digest titles (e.g. "AOSP")
  pub project: String,
  #[serde(default = "default_branch")]
  pub branch: String,
  #[serde(default = "default_cache_filename")]
  pub cache_filename: PathBuf,
  /// How far back each sync looks for merged changes, in Gerrit age syntax
  #[serde(default = "default_age")]
  pub age: String,
  /// Cached records last updated longer ago than this are dropped
  #[serde(default = "default_retention_days")]
  pub retention_days: i64,
  #[serde(default)]
  pub size_policy: SizePolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
  pub url: String,
  #[serde(default)]
  pub authentication: bool,
  pub uname: Option<String>,
  /// 'From:' address
  pub from: String,
  /// mutt configuration file used for delivery
  #[serde(default = "default_muttrc")]
  pub muttrc: PathBuf,
}

fn default_users_dir() -> PathBuf {
  PathBuf::from("users")
}

fn default_branch() -> String {
  "master".to_string()
}

fn default_cache_filename() -> PathBuf {
  PathBuf::from("cache.gz")
}

fn default_age() -> String {
  "5days".to_string()
}

fn default_retention_days() -> i64 {
  30
}

fn default_muttrc() -> PathBuf {
  PathBuf::from("muttrc")
}

/// HTTP credential handed to the Gerrit client as-is.
#[derive(Clone)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl std::fmt::Debug for Credentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Credentials")
      .field("username", &self.username)
      .finish_non_exhaustive()
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./gerrit-digest.yaml
  /// 3. ./config.yaml
  /// 4. $XDG_CONFIG_HOME/gerrit-digest/config.yaml
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
        "No configuration file found. Create ./config.yaml or ~/.config/gerrit-digest/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    for local in ["gerrit-digest.yaml", "config.yaml"] {
      let local = PathBuf::from(local);
      if local.exists() {
        return Some(local);
      }
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gerrit-digest").join("config.yaml");
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

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the Gerrit HTTP credential from environment variables.
  ///
  /// Checks GERRIT_DIGEST_USERNAME/GERRIT_DIGEST_PASSWORD first, then
  /// GERRIT_USERNAME/GERRIT_PASSWORD. Returns None for anonymous access.
  pub fn credentials() -> Option<Credentials> {
    let var = |primary: &str, fallback: &str| {
      std::env::var(primary)
        .or_else(|_| std::env::var(fallback))
        .ok()
    };

    let username = var("GERRIT_DIGEST_USERNAME", "GERRIT_USERNAME")?;
    let password = var("GERRIT_DIGEST_PASSWORD", "GERRIT_PASSWORD")?;
    Some(Credentials { username, password })
  }
}
