//! Local snapshot of recently merged changes.
//!
//! The cache is a single gzip-compressed JSON array of [`ChangeRecord`]s.
//! A sync pass reads it whole, filters and appends in memory, and writes it
//! back in one atomic replace. Digest runs only read it.

mod lock;
mod record;
mod store;

pub use lock::CacheLock;
pub use record::{Author, ChangePredicate, ChangeRecord, FileStats, RecordKey};
pub use store::CacheStore;

#[cfg(test)]
pub(crate) use record::sample;
