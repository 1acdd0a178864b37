use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DigestError, Result};

/// Exclusive advisory lock held for the length of a sync pass.
///
/// The lock lives in `<cache>.lock` next to the cache file and is released
/// when the guard is dropped.
#[derive(Debug)]
pub struct CacheLock {
  file: File,
  path: PathBuf,
}

impl CacheLock {
  pub fn acquire(cache_path: &Path) -> Result<Self> {
    let path = lock_path(cache_path);
    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .truncate(false)
      .open(&path)
      .map_err(|source| DigestError::PersistFailure {
        path: path.clone(),
        source,
      })?;

    if file.try_lock_exclusive().is_err() {
      return Err(DigestError::CacheLocked {
        path: cache_path.to_path_buf(),
      });
    }

    debug!("Locked {}", path.display());
    Ok(Self { file, path })
  }
}

impl Drop for CacheLock {
  fn drop(&mut self) {
    let _ = FileExt::unlock(&self.file);
    debug!("Unlocked {}", self.path.display());
  }
}

fn lock_path(cache_path: &Path) -> PathBuf {
  let mut name = cache_path.as_os_str().to_owned();
  name.push(".lock");
  PathBuf::from(name)
}
