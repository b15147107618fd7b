//! Suppression of the assistant's own writes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Content hashes of files the assistant just wrote.
///
/// The writer registers the hash right after writing; the first change
/// observed for that path afterwards consumes the entry. A matching hash
/// means the change is our own write.
#[derive(Debug, Clone, Default)]
pub struct SelfWriteGuard {
    expected: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl SelfWriteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PathBuf, String>> {
        // The map stays consistent even if a holder panicked.
        self.expected.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `path` now holds content with `hash`.
    pub fn register(&self, path: &Path, hash: impl Into<String>) {
        self.entries().insert(path.to_path_buf(), hash.into());
    }

    /// Consume the entry for `path` and report whether `hash` matches it.
    pub fn is_own_write(&self, path: &Path, hash: &str) -> bool {
        match self.entries().remove(path) {
            Some(expected) => expected == hash,
            None => false,
        }
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.entries().contains_key(path)
    }
}
