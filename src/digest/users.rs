//! Digest recipients.
//!
//! Each recipient lives in `<users_dir>/<name>.yaml`:
//!
//! ```yaml
//! email: jane@example.com
//! filters:
//!   - title: Build
//!     match:
//!       projects: [platform/build]
//! ```
//!
//! and may have a `<name>.css` stylesheet merged over `default.css`.

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::Path;

use super::css::merge_stylesheets;
use super::filter::{Filter, FilterSpec};
use crate::error::DigestError;

#[derive(Debug, Deserialize)]
struct UserFile {
  email: Option<String>,
  #[serde(default)]
  filters: Vec<FilterSpec>,
}

#[derive(Debug, Clone)]
pub struct Recipient {
  pub name: String,
  pub email: String,
  pub filters: Vec<FilterSpec>,
  pub stylesheet: String,
}

impl Recipient {
  pub fn compile_filters(&self, today: NaiveDate) -> Result<Vec<Filter>, DigestError> {
    self.filters.iter().map(|f| f.compile(today)).collect()
  }
}

/// Names of every recipient file in `dir`, sorted.
pub fn list_users(dir: &Path) -> Result<Vec<String>> {
  let entries = std::fs::read_dir(dir)
    .map_err(|e| eyre!("Failed to list users in {}: {}", dir.display(), e))?;

  let mut users: Vec<String> = entries
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| path.extension().is_some_and(|ext| ext == "yaml"))
    .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
    .collect();
  users.sort();

  Ok(users)
}

/// Load `name`'s recipient file and stylesheet.
pub fn load_recipient(dir: &Path, name: &str) -> Result<Recipient> {
  let path = dir.join(format!("{}.yaml", name));
  let contents = std::fs::read_to_string(&path).map_err(|_| DigestError::ConfigMissing {
    recipient: name.to_string(),
    what: format!("a recipient file at {}", path.display()),
  })?;

  let file: UserFile = serde_yaml::from_str(&contents)
    .map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))?;

  let email = file
    .email
    .filter(|e| !e.trim().is_empty())
    .ok_or_else(|| DigestError::ConfigMissing {
      recipient: name.to_string(),
      what: "an email address".to_string(),
    })?;

  if file.filters.is_empty() {
    return Err(
      DigestError::ConfigMissing {
        recipient: name.to_string(),
        what: "filters".to_string(),
      }
      .into(),
    );
  }

  Ok(Recipient {
    name: name.to_string(),
    email,
    filters: file.filters,
    stylesheet: load_stylesheet(dir, name),
  })
}

fn load_stylesheet(dir: &Path, name: &str) -> String {
  let default = std::fs::read_to_string(dir.join("default.css")).ok();
  let user = std::fs::read_to_string(dir.join(format!("{}.css", name))).ok();
  merge_stylesheets(default.as_deref(), user.as_deref())
}
