//! External warehouse seam.
//!
//! The raw and transformed row stores live outside this crate. The core only
//! reaches them for two destructive operations: purging the rows derived from
//! one file, and truncating everything during clear-all.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// Errors reported by the warehouse collaborator. The message is kept
/// verbatim when surfaced to callers.
#[derive(Error, Debug)]
pub enum DataStoreError {
    #[error("{0}")]
    Backend(String),
}

/// Downstream data store holding raw and transformed rows.
pub trait DataStore: Send + Sync {
    /// Deletes all rows derived from one file. Returns rows deleted.
    fn delete_file_rows(&self, file_name: &str, tpa: &str) -> Result<u64, DataStoreError>;

    /// Truncates every managed table. Returns the names of truncated tables.
    fn truncate_all(&self) -> Result<Vec<String>, DataStoreError>;
}

/// In-memory stand-in used in tests and when no warehouse is attached.
///
/// Tracks per-file row counts so delete/truncate accounting is observable.
#[derive(Default)]
pub struct NullDataStore {
    rows: Mutex<HashMap<String, u64>>,
}

impl NullDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds row counts for a file, as if a processing run had loaded them.
    pub fn seed(&self, file_name: &str, tpa: &str, rows: u64) {
        let mut map = self.rows.lock().expect("data store lock poisoned");
        map.insert(format!("{}/{}", tpa, file_name), rows);
    }

    pub fn row_count(&self, file_name: &str, tpa: &str) -> u64 {
        let map = self.rows.lock().expect("data store lock poisoned");
        map.get(&format!("{}/{}", tpa, file_name)).copied().unwrap_or(0)
    }
}

impl DataStore for NullDataStore {
    fn delete_file_rows(&self, file_name: &str, tpa: &str) -> Result<u64, DataStoreError> {
        let mut map = self.rows.lock().expect("data store lock poisoned");
        Ok(map.remove(&format!("{}/{}", tpa, file_name)).unwrap_or(0))
    }

    fn truncate_all(&self) -> Result<Vec<String>, DataStoreError> {
        let mut map = self.rows.lock().expect("data store lock poisoned");
        map.clear();
        Ok(vec!["RAW_DATA_TABLE".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_store_delete_accounting() {
        let store = NullDataStore::new();
        store.seed("claims.csv", "provider_a", 120);

        assert_eq!(store.row_count("claims.csv", "provider_a"), 120);
        assert_eq!(store.delete_file_rows("claims.csv", "provider_a").unwrap(), 120);
        assert_eq!(store.row_count("claims.csv", "provider_a"), 0);

        // Deleting again reports zero rows.
        assert_eq!(store.delete_file_rows("claims.csv", "provider_a").unwrap(), 0);
    }

    #[test]
    fn test_null_store_truncate() {
        let store = NullDataStore::new();
        store.seed("a.csv", "provider_a", 10);
        store.seed("b.csv", "provider_b", 20);

        let tables = store.truncate_all().unwrap();
        assert_eq!(tables, vec!["RAW_DATA_TABLE".to_string()]);
        assert_eq!(store.row_count("a.csv", "provider_a"), 0);
        assert_eq!(store.row_count("b.csv", "provider_b"), 0);
    }
}
