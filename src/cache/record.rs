//! The durable cache entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A merged change, reduced to what the digest needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
  /// Remote change number as a string. Unique within the cache.
  pub number: String,
  pub updated: String,
  /// When this record was last written locally.
  #[serde(default)]
  pub cached: String,
  pub project: String,
  pub subject: String,
  pub message: String,
  pub author: Author,
  #[serde(default)]
  pub files: BTreeMap<String, FileStats>,
  /// (insertions, deletions)
  pub size: (u64, u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
  pub name: String,
  pub email: String,
}

/// Per-file diff stats as reported by Gerrit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lines_inserted: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub lines_deleted: Option<u64>,
  // status, size_delta, old_path, ...
  #[serde(flatten)]
  pub extra: BTreeMap<String, Value>,
}

/// String-valued fields the store can project and filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKey {
  Number,
  Updated,
  Cached,
}

impl ChangeRecord {
  pub fn field(&self, key: RecordKey) -> &str {
    match key {
      RecordKey::Number => &self.number,
      RecordKey::Updated => &self.updated,
      RecordKey::Cached => &self.cached,
    }
  }
}

/// Boolean test over a cached change.
///
/// Recipient filters and the store's predicate operations go through this
/// trait, so filter logic stays behind a narrow interface.
pub trait ChangePredicate {
  fn matches(&self, record: &ChangeRecord) -> bool;
}

impl<F> ChangePredicate for F
where
  F: Fn(&ChangeRecord) -> bool,
{
  fn matches(&self, record: &ChangeRecord) -> bool {
    self(record)
  }
}

#[cfg(test)]
pub(crate) fn sample(number: &str, updated: &str) -> ChangeRecord {
  ChangeRecord {
    number: number.to_string(),
    updated: updated.to_string(),
    cached: updated.to_string(),
    project: "platform/build".to_string(),
    subject: format!("Change {}", number),
    message: format!("Change {}\n\nChange-Id: I{}\n", number, number),
    author: Author {
      name: "Jane Doe".to_string(),
      email: "jane@example.com".to_string(),
    },
    files: BTreeMap::new(),
    size: (0, 0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_serialized_size_is_a_pair() {
    let mut record = sample("100", "2024-01-01 10:00:00.000000000");
    record.size = (5, 2);
    let value = serde_json::to_value(&record).unwrap();
    assert_eq!(value["size"], serde_json::json!([5, 2]));
  }

  #[test]
  fn test_file_stats_keep_unknown_fields() {
    let stats: FileStats =
      serde_json::from_str(r#"{"lines_inserted": 3, "status": "A", "size_delta": 120}"#).unwrap();
    assert_eq!(stats.lines_inserted, Some(3));
    assert_eq!(stats.lines_deleted, None);
    assert_eq!(stats.extra["status"], "A");

    let back = serde_json::to_value(&stats).unwrap();
    assert!(back.get("lines_deleted").is_none());
    assert_eq!(back["size_delta"], 120);
  }

  #[test]
  fn test_field_projection() {
    let record = sample("7", "2024-02-02 00:00:00.000000000");
    assert_eq!(record.field(RecordKey::Number), "7");
    assert_eq!(record.field(RecordKey::Cached), "2024-02-02 00:00:00.000000000");
  }

  #[test]
  fn test_closure_is_a_predicate() {
    let record = sample("7", "2024-02-02 00:00:00.000000000");
    let is_build = |r: &ChangeRecord| r.project == "platform/build";
    assert!(is_build.matches(&record));
  }
}
