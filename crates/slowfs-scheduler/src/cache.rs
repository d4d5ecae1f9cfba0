//! Write-back cache model: per-file dirty-byte accounting.
//!
//! Models OS page-cache dirty bytes under the fast-write strategy. Bytes
//! enter on write, leave when the device has spare time
//! ([`WriteBackCache::write_back`]) or when a file is fsynced in full
//! ([`WriteBackCache::write_back_file`]). CLOSE drops a file's entry
//! outright: no further work is owed on a closed file.

use slowfs_types::{ByteCount, ByteRate};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct WriteBackCache {
    write_rate: ByteRate,
    // BTreeMap so a budgeted drain visits paths in a deterministic
    // (sorted) order.
    dirty: BTreeMap<PathBuf, ByteCount>,
}

impl WriteBackCache {
    pub(crate) fn new(write_rate: ByteRate) -> Self {
        Self {
            write_rate,
            dirty: BTreeMap::new(),
        }
    }

    /// Record `size` freshly dirtied bytes for `path`.
    pub(crate) fn write(&mut self, path: &Path, size: ByteCount) {
        let entry = self
            .dirty
            .entry(path.to_path_buf())
            .or_insert(ByteCount::ZERO);
        *entry = entry.saturating_add(size);
    }

    /// Dirty bytes currently owed for `path`.
    pub(crate) fn unwritten_bytes(&self, path: &Path) -> ByteCount {
        self.dirty.get(path).copied().unwrap_or(ByteCount::ZERO)
    }

    /// Total dirty bytes across all files.
    pub(crate) fn total_unwritten_bytes(&self) -> ByteCount {
        self.dirty
            .values()
            .fold(ByteCount::ZERO, |acc, v| acc.saturating_add(*v))
    }

    /// Write back everything owed for `path` (a whole-file fsync).
    pub(crate) fn write_back_file(&mut self, path: &Path) {
        if let Some(entry) = self.dirty.get_mut(path) {
            *entry = ByteCount::ZERO;
        }
    }

    /// Drain dirty bytes against a time budget.
    ///
    /// At most `write_rate × budget` bytes leave, distributed across files
    /// in path order. Surplus budget is discarded; it does not bank for
    /// later drains.
    pub(crate) fn write_back(&mut self, budget: Duration) {
        let mut remaining = self.write_rate.bytes_in(budget);
        for entry in self.dirty.values_mut() {
            if remaining == ByteCount::ZERO {
                break;
            }
            let drained = (*entry).min(remaining);
            *entry = entry.saturating_sub(drained);
            remaining = remaining.saturating_sub(drained);
        }
    }

    /// Forget `path` entirely. Remaining dirty bytes are dropped from the
    /// model; a closed file owes nothing.
    pub(crate) fn close(&mut self, path: &Path) {
        self.dirty.remove(path);
    }
}
