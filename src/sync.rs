//! One synchronization pass: load the cache, detect changed remote entries,
//! evict superseded and expired records, append fresh ones, persist.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, RecordKey};
use crate::config::GerritConfig;
use crate::error::Result;
use crate::gerrit::{normalize, ApiChange, ApiChangeHeader, ChangeQuery, ChangeSource, RawChange, SizePolicy};
use crate::timestamp;

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Changes returned by the server
  pub fetched: usize,
  /// New or changed since the last pass
  pub updated: usize,
  /// Cached records dropped as superseded or expired
  pub evicted: usize,
  pub appended: usize,
  /// Changes that could not be decoded, have nothing to show or are
  /// already past retention
  pub skipped: usize,
  /// Records in the cache after the pass
  pub total: usize,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
  pub query: ChangeQuery,
  pub retention_days: i64,
  pub size_policy: SizePolicy,
}

impl From<&GerritConfig> for SyncSettings {
  fn from(config: &GerritConfig) -> Self {
    Self {
      query: ChangeQuery::merged_recently(&config.branch, &config.age),
      retention_days: config.retention_days,
      size_policy: config.size_policy,
    }
  }
}

pub struct Synchronizer<'a, S: ChangeSource> {
  source: &'a S,
  settings: SyncSettings,
}

impl<'a, S: ChangeSource> Synchronizer<'a, S> {
  pub fn new(source: &'a S, settings: SyncSettings) -> Self {
    Self { source, settings }
  }

  /// Run a full pass against `store` as of `now`.
  ///
  /// The store is only written if every step before it succeeded, so a failed
  /// fetch leaves the cache file untouched.
  pub async fn sync(&self, store: &mut CacheStore, now: DateTime<Utc>) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    store.read()?;

    let known: HashMap<String, String> = store
      .filter_key(RecordKey::Number)
      .into_iter()
      .zip(store.filter_key(RecordKey::Updated))
      .map(|(number, updated)| (number.to_string(), updated.to_string()))
      .collect();

    let remote = self.source.fetch_changes(&self.settings.query).await?;
    report.fetched = remote.len();

    let delta = self.discover(remote, &known, &mut report);
    report.updated = delta.len();

    let superseded: HashSet<String> = delta.iter().map(|(number, _)| number.clone()).collect();
    let threshold = timestamp::retention_threshold(now, self.settings.retention_days);
    report.evicted = store.filter_delta(RecordKey::Number, &superseded)
      + store.filter_threshold(RecordKey::Updated, &threshold);

    let cached = timestamp::format(now);
    for (number, raw) in delta {
      let change = match ApiChange::deserialize(&raw) {
        Ok(change) => change,
        Err(e) => {
          warn!("Skipping change {}: {}", number, e);
          report.skipped += 1;
          continue;
        }
      };

      let Some(mut record) = normalize(change, self.settings.size_policy) else {
        debug!("Skipping change {}: no revisions", number);
        report.skipped += 1;
        continue;
      };

      if record.updated.as_str() <= threshold.as_str() {
        debug!("Skipping change {}: older than retention", number);
        report.skipped += 1;
        continue;
      }

      record.cached = cached.clone();
      store.append(record);
      report.appended += 1;
    }

    store.write()?;
    report.total = store.len();

    info!(
      "Synced {}: fetched {}, updated {}, evicted {}, appended {}, skipped {}, total {}",
      store.path().display(),
      report.fetched,
      report.updated,
      report.evicted,
      report.appended,
      report.skipped,
      report.total
    );
    Ok(report)
  }

  /// Remote changes that are absent from `known` or carry a different
  /// `updated` value, in server order. A number listed twice keeps its first
  /// position and its last payload.
  fn discover(
    &self,
    remote: Vec<RawChange>,
    known: &HashMap<String, String>,
    report: &mut SyncReport,
  ) -> Vec<(String, RawChange)> {
    let mut delta: Vec<(String, RawChange)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for raw in remote {
      let header = match ApiChangeHeader::deserialize(&raw) {
        Ok(header) => header,
        Err(e) => {
          warn!("Skipping undecodable change: {}", e);
          report.skipped += 1;
          continue;
        }
      };

      let number = header.number.to_string();
      if known.get(&number) == Some(&header.updated) {
        continue;
      }

      match positions.get(&number) {
        Some(&at) => delta[at].1 = raw,
        None => {
          positions.insert(number.clone(), delta.len());
          delta.push((number, raw));
        }
      }
    }

    delta
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{sample, ChangeRecord};
  use crate::error::DigestError;
  use crate::gerrit::{collect_pages, parse_page};
  use chrono::TimeZone;
  use serde_json::{json, Value};
  use std::path::Path;

  /// Serves a fixed listing, or fails if there is none.
  struct FakeSource(Option<Vec<RawChange>>);

  impl ChangeSource for FakeSource {
    async fn fetch_changes(&self, _query: &ChangeQuery) -> Result<Vec<RawChange>> {
      self
        .0
        .clone()
        .ok_or_else(|| DigestError::FetchFailed("connection refused".to_string()))
    }
  }

  /// Serves raw page bodies through the real page parser.
  struct BodySource(Vec<&'static str>);

  impl ChangeSource for BodySource {
    async fn fetch_changes(&self, _query: &ChangeQuery) -> Result<Vec<RawChange>> {
      let mut pages = self.0.iter();
      collect_pages(|_| {
        let body = pages.next().copied().unwrap_or(")]}'\n[]");
        async move { parse_page(body) }
      })
      .await
    }
  }

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 10, 8, 0, 0).unwrap()
  }

  fn settings() -> SyncSettings {
    SyncSettings {
      query: ChangeQuery::merged_recently("master", "5days"),
      retention_days: 30,
      size_policy: SizePolicy::default(),
    }
  }

  fn remote(number: u64, updated: &str) -> Value {
    json!({
      "_number": number,
      "project": "platform/build",
      "subject": format!("Change {}", number),
      "updated": updated,
      "revisions": {
        "deadbeef": {
          "_number": 1,
          "commit": {
            "message": "Change\n",
            "author": {"name": "Jane Doe", "email": "jane@example.com"}
          },
          "files": {"Android.bp": {"lines_inserted": 5, "lines_deleted": 2}}
        }
      }
    })
  }

  fn seed(path: &Path, records: Vec<ChangeRecord>) {
    let mut store = CacheStore::new(path);
    for record in records {
      store.append(record);
    }
    store.write().unwrap();
  }

  async fn run(source: &FakeSource, path: &Path, at: DateTime<Utc>) -> Result<SyncReport> {
    let mut store = CacheStore::new(path);
    Synchronizer::new(source, settings()).sync(&mut store, at).await
  }

  fn load(path: &Path) -> Vec<ChangeRecord> {
    let mut store = CacheStore::new(path);
    store.read().unwrap();
    store.records().to_vec()
  }

  #[tokio::test]
  async fn test_new_change_enters_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let source = FakeSource(Some(vec![remote(100, "2024-01-01 10:00:00.000000000")]));

    let report = run(&source, &path, now()).await.unwrap();
    assert_eq!(report.appended, 1);

    let records = load(&path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].number, "100");
    assert_eq!(records[0].size, (5, 2));
    assert_eq!(records[0].cached, "2024-01-10 08:00:00.000000000");
  }

  #[tokio::test]
  async fn test_unchanged_change_keeps_its_stamp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let mut existing = sample("100", "2024-01-01 10:00:00.000000000");
    existing.cached = "2024-01-02 04:56:00.000000000".to_string();
    seed(&path, vec![existing.clone()]);

    let source = FakeSource(Some(vec![remote(100, "2024-01-01 10:00:00.000000000")]));
    let report = run(&source, &path, now()).await.unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(report.appended, 0);
    assert_eq!(load(&path), vec![existing]);
  }

  #[tokio::test]
  async fn test_updated_change_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    seed(&path, vec![sample("100", "2024-01-01 10:00:00.000000000")]);

    let source = FakeSource(Some(vec![remote(100, "2024-01-09 17:00:00.000000000")]));
    let report = run(&source, &path, now()).await.unwrap();
    assert_eq!(report.evicted, 1);

    let records = load(&path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].updated, "2024-01-09 17:00:00.000000000");
    assert_eq!(records[0].cached, "2024-01-10 08:00:00.000000000");
  }

  #[tokio::test]
  async fn test_expired_record_is_evicted_without_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    seed(
      &path,
      vec![
        sample("200", "2023-12-01 10:00:00.000000000"),
        sample("300", "2024-01-05 10:00:00.000000000"),
      ],
    );

    let source = FakeSource(Some(Vec::new()));
    run(&source, &path, now()).await.unwrap();

    let numbers: Vec<String> = load(&path).into_iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec!["300"]);
  }

  #[tokio::test]
  async fn test_record_exactly_at_threshold_is_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    seed(&path, vec![sample("1", "2023-12-11 08:00:00.000000000")]);

    run(&FakeSource(Some(Vec::new())), &path, now())
      .await
      .unwrap();
    assert!(load(&path).is_empty());
  }

  #[tokio::test]
  async fn test_fetched_change_past_retention_is_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let source = FakeSource(Some(vec![
      remote(1, "2023-12-01 10:00:00.000000000"),
      remote(2, "2024-01-09 10:00:00.000000000"),
    ]));

    let report = run(&source, &path, now()).await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.appended, 1);
    assert_eq!(report.skipped, 1);
    let numbers: Vec<String> = load(&path).into_iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec!["2"]);
  }

  #[tokio::test]
  async fn test_retention_shorter_than_discovery_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let source = FakeSource(Some(vec![
      remote(1, "2024-01-07 10:00:00.000000000"),
      remote(2, "2024-01-09 10:00:00.000000000"),
    ]));
    let settings = SyncSettings {
      retention_days: 2,
      ..settings()
    };

    let mut store = CacheStore::new(&path);
    let report = Synchronizer::new(&source, settings)
      .sync(&mut store, now())
      .await
      .unwrap();

    assert_eq!(report.skipped, 1);
    let records = load(&path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].number, "2");
  }

  #[tokio::test]
  async fn test_fetch_failure_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    // Expired, so a completed pass would have rewritten the file.
    seed(&path, vec![sample("200", "2023-12-01 10:00:00.000000000")]);
    let before = std::fs::read(&path).unwrap();

    let result = run(&FakeSource(None), &path, now()).await;
    assert!(matches!(result, Err(DigestError::FetchFailed(_))));
    assert_eq!(std::fs::read(&path).unwrap(), before);
  }

  #[tokio::test]
  async fn test_malformed_reply_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    seed(&path, vec![sample("200", "2023-12-01 10:00:00.000000000")]);
    let before = std::fs::read(&path).unwrap();

    let source = BodySource(vec!["[{\"_number\": 1}]"]);
    let mut store = CacheStore::new(&path);
    let result = Synchronizer::new(&source, settings())
      .sync(&mut store, now())
      .await;

    assert!(matches!(result, Err(DigestError::MalformedResponse(_))));
    assert_eq!(std::fs::read(&path).unwrap(), before);
  }

  #[tokio::test]
  async fn test_paged_reply_is_synced_in_full() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let first = format!(
      ")]}}'\n[{}, {}]",
      remote(1, "2024-01-08 10:00:00.000000000"),
      {
        let mut last = remote(2, "2024-01-08 11:00:00.000000000");
        last["_more_changes"] = json!(true);
        last
      }
    );
    let second = format!(")]}}'\n[{}]", remote(3, "2024-01-09 10:00:00.000000000"));
    let first: &'static str = Box::leak(first.into_boxed_str());
    let second: &'static str = Box::leak(second.into_boxed_str());
    let source = BodySource(vec![first, second]);

    let mut store = CacheStore::new(&path);
    let report = Synchronizer::new(&source, settings())
      .sync(&mut store, now())
      .await
      .unwrap();

    assert_eq!(report.fetched, 3);
    let numbers: Vec<String> = load(&path).into_iter().map(|r| r.number).collect();
    assert_eq!(numbers, vec!["1", "2", "3"]);
  }

  #[tokio::test]
  async fn test_bad_records_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let mut no_revisions = remote(2, "2024-01-08 10:00:00.000000000");
    no_revisions["revisions"] = json!({});
    let source = FakeSource(Some(vec![
      json!({"subject": "no number"}),
      no_revisions,
      json!({"_number": 3, "updated": "2024-01-08 10:00:00.000000000"}),
      remote(4, "2024-01-08 10:00:00.000000000"),
    ]));

    let report = run(&source, &path, now()).await.unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(report.appended, 1);
    assert_eq!(load(&path)[0].number, "4");
  }

  #[tokio::test]
  async fn test_second_pass_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    let source = FakeSource(Some(vec![
      remote(1, "2024-01-08 10:00:00.000000000"),
      remote(2, "2024-01-09 10:00:00.000000000"),
    ]));

    run(&source, &path, now()).await.unwrap();
    let first = load(&path);
    let later = now() + chrono::Duration::hours(1);
    let report = run(&source, &path, later).await.unwrap();

    assert_eq!(report.updated, 0);
    assert_eq!(load(&path), first);
  }

  #[tokio::test]
  async fn test_duplicate_numbers_never_reach_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    seed(&path, vec![sample("1", "2024-01-01 10:00:00.000000000")]);
    let source = FakeSource(Some(vec![
      remote(1, "2024-01-08 10:00:00.000000000"),
      remote(2, "2024-01-08 10:00:00.000000000"),
      remote(1, "2024-01-09 10:00:00.000000000"),
    ]));

    run(&source, &path, now()).await.unwrap();
    let records = load(&path);
    let numbers: HashSet<&str> = records.iter().map(|r| r.number.as_str()).collect();
    assert_eq!(numbers.len(), records.len());
    assert_eq!(records[0].number, "1");
    assert_eq!(records[0].updated, "2024-01-09 10:00:00.000000000");
  }
}
