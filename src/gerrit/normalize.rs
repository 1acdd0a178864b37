//! Reduce a Gerrit change to a cache record.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::api_types::{ApiChange, ApiRevision};
use crate::cache::{Author, ChangeRecord, FileStats};

/// How per-file line counts add up to a change's size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizePolicy {
  /// Deleted lines only count for files that also report inserted lines.
  /// Pure deletions therefore show up as size zero.
  #[default]
  RequireInsertions,
  /// Inserted and deleted lines are summed separately.
  Independent,
}

/// Build the cache record for `change`, or None if it has no revisions
/// (such changes cannot be displayed by Gerrit either).
///
/// The `cached` stamp is left empty for the caller to fill in.
pub fn normalize(change: ApiChange, policy: SizePolicy) -> Option<ChangeRecord> {
  let ApiChange {
    number,
    project,
    subject,
    updated,
    current_revision,
    mut revisions,
  } = change;

  let key = latest_revision_key(current_revision.as_deref(), &revisions)?;
  let revision = revisions.remove(&key)?;

  Some(ChangeRecord {
    number: number.to_string(),
    updated,
    cached: String::new(),
    project,
    subject,
    message: revision.commit.message,
    author: Author {
      name: revision.commit.author.name,
      email: revision.commit.author.email,
    },
    size: diff_size(&revision.files, policy),
    files: revision.files,
  })
}

/// The explicit current revision if the server named one, else the highest
/// patch set number, else the last revision key.
fn latest_revision_key(
  current: Option<&str>,
  revisions: &BTreeMap<String, ApiRevision>,
) -> Option<String> {
  if let Some(current) = current.filter(|c| revisions.contains_key(*c)) {
    return Some(current.to_string());
  }

  revisions
    .iter()
    .enumerate()
    .max_by_key(|(position, (_, revision))| (revision.number, *position))
    .map(|(_, (key, _))| key.clone())
}

/// Sum (insertions, deletions) over `files`.
pub fn diff_size(files: &BTreeMap<String, FileStats>, policy: SizePolicy) -> (u64, u64) {
  files
    .values()
    .fold((0, 0), |(insertions, deletions), stats| {
      let deleted = stats.lines_deleted.unwrap_or(0);
      match (stats.lines_inserted, policy) {
        (Some(inserted), _) => (insertions + inserted, deletions + deleted),
        (None, SizePolicy::Independent) => (insertions, deletions + deleted),
        (None, SizePolicy::RequireInsertions) => (insertions, deletions),
      }
    })
}
