//! Error kinds shared by the synchronizer and the digest renderer.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Error, Debug)]
pub enum DigestError {
  /// The server reply broke the wire contract (missing magic prefix, not a JSON array).
  #[error("Malformed response: {0}")]
  MalformedResponse(String),

  /// Transport error or non-success status. The pass is aborted.
  #[error("Fetch failed: {0}")]
  FetchFailed(String),

  #[error("Failed to persist cache {}: {source}", .path.display())]
  PersistFailure {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("Failed to read cache {}: {reason}", .path.display())]
  CacheUnreadable { path: PathBuf, reason: String },

  #[error("Cache {} is locked by another process", .path.display())]
  CacheLocked { path: PathBuf },

  #[error("Recipient {recipient} is missing {what}")]
  ConfigMissing { recipient: String, what: String },

  #[error("Invalid filter '{title}': {reason}")]
  InvalidFilter { title: String, reason: String },

  #[error("Failed to render digest: {0}")]
  RenderFailed(#[from] minijinja::Error),

  #[error("No content")]
  NoContent,

  #[error("Failed to send mail: {0}")]
  MailFailed(String),
}
