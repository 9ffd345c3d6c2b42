//! Per-file serialization.
//!
//! Stage moves and queue transitions on the same logical file must not
//! interleave (a reprocess racing a stage move would lose one of the two
//! updates). `FileLockMap` hands out one mutex per file key; everything else
//! in the crate runs without fine-grained locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Registry of per-file-key locks. The key is `tpa/file_name`.
///
/// Cloning is cheap (inner `Arc`); `StageStore` and `QueueLedger` share one
/// instance so their mutations on the same file serialize.
#[derive(Clone, Default)]
pub struct FileLockMap {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl FileLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the canonical lock key for a file.
    pub fn key(tpa: &str, file_name: &str) -> String {
        format!("{}/{}", tpa, file_name)
    }

    /// Returns the lock for `key`, creating it on first use.
    ///
    /// Callers hold the returned `Arc` and lock it for the duration of the
    /// mutation. Lock entries are never evicted; the map grows with the
    /// number of distinct files, which is bounded by queue history.
    pub fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("file lock map poisoned");
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Convenience wrapper: runs `f` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.acquire(key);
        let _guard: MutexGuard<'_, ()> = lock.lock().expect("file lock poisoned");
        f()
    }
}
