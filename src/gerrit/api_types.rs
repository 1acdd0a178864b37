//! Serde-deserializable types matching Gerrit REST responses.
//!
//! Pages are kept as raw JSON values until a change is known to be new or
//! updated, so one undecodable change cannot spoil the rest of a page.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::cache::FileStats;

/// One element of a `/changes/` reply, as received.
pub type RawChange = Value;

/// True when Gerrit flagged that another page follows this element.
pub fn has_more_changes(change: &RawChange) -> bool {
  match change.get("_more_changes") {
    None | Some(Value::Null) | Some(Value::Bool(false)) => false,
    Some(_) => true,
  }
}

/// Just enough of a change to decide whether it differs from the cache.
#[derive(Debug, Deserialize)]
pub struct ApiChangeHeader {
  #[serde(rename = "_number")]
  pub number: u64,
  pub updated: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiChange {
  #[serde(rename = "_number")]
  pub number: u64,
  pub project: String,
  pub subject: String,
  pub updated: String,
  pub current_revision: Option<String>,
  #[serde(default)]
  pub revisions: BTreeMap<String, ApiRevision>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRevision {
  /// Patch set number
  #[serde(rename = "_number")]
  pub number: Option<u64>,
  pub commit: ApiCommit,
  #[serde(default)]
  pub files: BTreeMap<String, FileStats>,
}

#[derive(Debug, Deserialize)]
pub struct ApiCommit {
  #[serde(default)]
  pub message: String,
  pub author: ApiGitPerson,
}

#[derive(Debug, Deserialize)]
pub struct ApiGitPerson {
  pub name: String,
  pub email: String,
}
