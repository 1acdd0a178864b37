//! Gzip-compressed JSON cache file.

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::debug;

use super::record::{ChangePredicate, ChangeRecord, RecordKey};
use crate::error::{DigestError, Result};

/// In-memory view of the cache file.
///
/// The collection is read whole, mutated in place by the filter operations
/// and written whole. Key uniqueness is the caller's job.
#[derive(Debug)]
pub struct CacheStore {
  path: PathBuf,
  records: Vec<ChangeRecord>,
}

impl CacheStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      records: Vec::new(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  #[cfg(test)]
  pub fn records(&self) -> &[ChangeRecord] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  /// Load the cache file. A missing file is an empty cache.
  pub fn read(&mut self) -> Result<()> {
    if !self.path.exists() {
      debug!("No cache at {}, starting empty", self.path.display());
      self.records = Vec::new();
      return Ok(());
    }

    let file = File::open(&self.path).map_err(|e| self.unreadable(e))?;
    let reader = BufReader::new(GzDecoder::new(file));
    self.records = serde_json::from_reader(reader).map_err(|e| self.unreadable(e))?;

    debug!(
      "Read {} records from {}",
      self.records.len(),
      self.path.display()
    );
    Ok(())
  }

  /// Replace the cache file with the current collection.
  ///
  /// The data goes to a temporary file in the same directory which is then
  /// renamed over the cache, so a failed write leaves the old file intact.
  pub fn write(&self) -> Result<()> {
    self
      .write_atomic()
      .map_err(|source| DigestError::PersistFailure {
        path: self.path.clone(),
        source,
      })?;

    debug!(
      "Wrote {} records to {}",
      self.records.len(),
      self.path.display()
    );
    Ok(())
  }

  fn write_atomic(&self) -> std::io::Result<()> {
    // Going through Value sorts object keys.
    let value = serde_json::to_value(&self.records)?;

    let dir = match self.path.parent() {
      Some(parent) if !parent.as_os_str().is_empty() => parent,
      _ => Path::new("."),
    };
    let mut builder = Builder::new();
    builder.prefix(".cache");
    // tempfile defaults to 0600; with 0666 a new cache gets the umask default
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;

    {
      let mut encoder = GzEncoder::new(BufWriter::new(tmp.as_file_mut()), Compression::default());
      let mut serializer =
        serde_json::Serializer::with_formatter(&mut encoder, PrettyFormatter::with_indent(b"    "));
      value.serialize(&mut serializer)?;
      encoder.finish()?.flush()?;
    }

    // The replacement keeps the existing file's mode.
    if let Ok(existing) = std::fs::metadata(&self.path) {
      tmp.as_file().set_permissions(existing.permissions())?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(&self.path).map_err(|e| e.error)?;
    Ok(())
  }

  fn unreadable(&self, reason: impl std::fmt::Display) -> DigestError {
    DigestError::CacheUnreadable {
      path: self.path.clone(),
      reason: reason.to_string(),
    }
  }

  /// Project one field of every record, in collection order.
  pub fn filter_key(&self, key: RecordKey) -> Vec<&str> {
    self.records.iter().map(|r| r.field(key)).collect()
  }

  /// Drop records whose `key` is in `excluded`. Returns how many were removed.
  pub fn filter_delta(&mut self, key: RecordKey, excluded: &HashSet<String>) -> usize {
    self.retain(|r| !excluded.contains(r.field(key)))
  }

  /// Keep only records whose `key` sorts strictly after `threshold`.
  pub fn filter_threshold(&mut self, key: RecordKey, threshold: &str) -> usize {
    self.retain(|r| r.field(key) > threshold)
  }

  /// Keep only records matching `predicate`.
  pub fn filter_predicate<P: ChangePredicate + ?Sized>(&mut self, predicate: &P) -> usize {
    self.retain(|r| predicate.matches(r))
  }

  pub fn get_by_predicate<P: ChangePredicate + ?Sized>(&self, predicate: &P) -> Vec<&ChangeRecord> {
    self.records.iter().filter(|r| predicate.matches(r)).collect()
  }

  pub fn append(&mut self, record: ChangeRecord) {
    self.records.push(record);
  }

  fn retain(&mut self, keep: impl Fn(&ChangeRecord) -> bool) -> usize {
    let before = self.records.len();
    self.records.retain(|r| keep(r));
    before - self.records.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::record::sample;
  use flate2::read::GzDecoder;
  use std::io::Read;

  fn store_with(dir: &Path, records: Vec<ChangeRecord>) -> CacheStore {
    let mut store = CacheStore::new(dir.join("cache.gz"));
    for record in records {
      store.append(record);
    }
    store
  }

  #[test]
  fn test_read_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CacheStore::new(dir.path().join("absent.gz"));
    store.read().unwrap();
    assert!(store.is_empty());
  }

  #[test]
  fn test_write_then_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
      dir.path(),
      vec![
        sample("1", "2024-01-01 00:00:00.000000000"),
        sample("2", "2024-01-02 00:00:00.000000000"),
      ],
    );
    store.write().unwrap();

    let mut reread = CacheStore::new(store.path());
    reread.read().unwrap();
    assert_eq!(reread.records(), store.records());
  }

  #[test]
  fn test_written_file_is_gzip_with_sorted_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![sample("1", "2024-01-01 00:00:00.000000000")]);
    store.write().unwrap();

    let mut json = String::new();
    GzDecoder::new(File::open(store.path()).unwrap())
      .read_to_string(&mut json)
      .unwrap();

    let author = json.find("\"author\"").unwrap();
    let cached = json.find("\"cached\"").unwrap();
    let updated = json.find("\"updated\"").unwrap();
    assert!(author < cached && cached < updated);
    assert!(json.contains("\n        \"number\": \"1\""));
  }

  #[test]
  fn test_write_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![sample("1", "2024-01-01 00:00:00.000000000")]);
    store.write().unwrap();
    let first = std::fs::read(store.path()).unwrap();
    store.write().unwrap();
    let second = std::fs::read(store.path()).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn test_failed_write_keeps_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![sample("1", "2024-01-01 00:00:00.000000000")]);
    store.write().unwrap();
    let before = std::fs::read(store.path()).unwrap();

    // A directory where the temp file should go makes the write fail.
    let broken = CacheStore::new(dir.path().join("missing-dir").join("cache.gz"));
    assert!(matches!(
      broken.write(),
      Err(DigestError::PersistFailure { .. })
    ));
    assert_eq!(std::fs::read(store.path()).unwrap(), before);
  }

  #[cfg(unix)]
  #[test]
  fn test_write_keeps_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(dir.path(), vec![sample("1", "2024-01-01 00:00:00.000000000")]);
    store.write().unwrap();
    std::fs::set_permissions(store.path(), std::fs::Permissions::from_mode(0o640)).unwrap();

    store.write().unwrap();
    let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o640);
  }

  #[test]
  fn test_read_garbage_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.gz");
    std::fs::write(&path, b"not gzip").unwrap();
    let mut store = CacheStore::new(&path);
    assert!(matches!(
      store.read(),
      Err(DigestError::CacheUnreadable { .. })
    ));
  }

  #[test]
  fn test_filter_key_preserves_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
      dir.path(),
      vec![
        sample("3", "2024-01-03 00:00:00.000000000"),
        sample("1", "2024-01-01 00:00:00.000000000"),
      ],
    );
    assert_eq!(store.filter_key(RecordKey::Number), vec!["3", "1"]);
  }

  #[test]
  fn test_filter_delta_and_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = store_with(
      dir.path(),
      vec![
        sample("1", "2024-01-01 00:00:00.000000000"),
        sample("2", "2024-01-15 00:00:00.000000000"),
        sample("3", "2024-01-20 00:00:00.000000000"),
      ],
    );

    let excluded: HashSet<String> = ["3".to_string()].into_iter().collect();
    assert_eq!(store.filter_delta(RecordKey::Number, &excluded), 1);

    // Equal to the threshold is not strictly greater.
    assert_eq!(
      store.filter_threshold(RecordKey::Updated, "2024-01-15 00:00:00.000000000"),
      2
    );
    assert!(store.is_empty());
  }

  #[test]
  fn test_predicates() {
    let dir = tempfile::tempdir().unwrap();
    let mut other = sample("2", "2024-01-02 00:00:00.000000000");
    other.project = "platform/art".to_string();
    let mut store = store_with(
      dir.path(),
      vec![sample("1", "2024-01-01 00:00:00.000000000"), other],
    );

    let is_art = |r: &ChangeRecord| r.project == "platform/art";
    let found = store.get_by_predicate(&is_art);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].number, "2");
    assert_eq!(store.len(), 2);

    assert_eq!(store.filter_predicate(&is_art), 1);
    assert_eq!(store.filter_key(RecordKey::Number), vec!["2"]);
  }
}
