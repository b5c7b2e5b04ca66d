//! Redb-backed key/value persistence.
//!
//! Every named value (options, usage counters, the scheduler heap, seen
//! records) is stored as JSON under its name in a single table. Reads are
//! served from an in-memory snapshot that is refreshed on every write.
//!
//! # Schema
//!
//! ```text
//! STORE: name -> serde_json::Value
//! ```

use parking_lot::{Mutex, RwLock};
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Redb table holding every persisted value.
const STORE: TableDefinition<&str, &[u8]> = TableDefinition::new("store");

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared handle to the persistent store.
#[derive(Clone)]
pub struct Database {
    db: Arc<redb::Database>,
    cache: Arc<RwLock<HashMap<String, Value>>>,
    /// Serializes read-modify-write sequences.
    writer: Arc<Mutex<()>>,
}

impl Database {
    /// Open (or create) the database at `path` and load its snapshot.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = redb::Database::create(path.as_ref())?;

        // Ensure table exists
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(STORE)?;
        }
        write_txn.commit()?;

        let mut cache = HashMap::new();
        {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(STORE)?;
            for item in table.iter()? {
                let (key, value) = item?;
                match serde_json::from_slice::<Value>(value.value()) {
                    Ok(parsed) => {
                        cache.insert(key.value().to_string(), parsed);
                    }
                    Err(e) => {
                        warn!(key = key.value(), error = %e, "Failed to decode stored value, skipping");
                    }
                }
            }
        }

        info!(path = %path.as_ref().display(), entries = cache.len(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            cache: Arc::new(RwLock::new(cache)),
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Read a value straight from disk.
    pub fn load(&self, name: &str) -> Result<Option<Value>, StorageError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STORE)?;
        match table.get(name)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// Read a value from the in-memory snapshot.
    pub fn cached(&self, name: &str) -> Option<Value> {
        self.cache.read().get(name).cloned()
    }

    /// Persist `value` under `name`.
    pub fn dump(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let _guard = self.writer.lock();
        self.write(name, value)
    }

    /// Run `f` over the value stored under `name` and persist the result.
    ///
    /// A missing value starts as an empty JSON object. The whole
    /// read-modify-write runs under the write lock.
    pub fn with_collection<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, StorageError> {
        let _guard = self.writer.lock();
        let mut value = self
            .cached(name)
            .unwrap_or_else(|| Value::Object(Default::default()));
        let result = f(&mut value);
        self.write(name, &value)?;
        Ok(result)
    }

    fn write(&self, name: &str, value: &Value) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(value)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STORE)?;
            table.insert(name, encoded.as_slice())?;
        }
        write_txn.commit()?;

        self.cache.write().insert(name.to_string(), value.clone());
        debug!(key = name, bytes = encoded.len(), "Stored value");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn create_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("test.redb")).unwrap();
        (db, dir)
    }

    #[test]
    fn dump_then_load() {
        let (db, _dir) = create_test_db();
        assert!(db.load("options").unwrap().is_none());
        assert!(db.cached("options").is_none());

        db.dump("options", &json!({"flood": true})).unwrap();
        assert_eq!(db.load("options").unwrap(), Some(json!({"flood": true})));
        assert_eq!(db.cached("options"), Some(json!({"flood": true})));
    }

    #[test]
    fn with_collection_starts_empty_and_persists() {
        let (db, _dir) = create_test_db();
        let count = db
            .with_collection("usage", |usage| {
                let entry = usage
                    .as_object_mut()
                    .unwrap()
                    .entry("echo")
                    .or_insert(json!(0));
                *entry = json!(entry.as_u64().unwrap_or(0) + 1);
                entry.as_u64()
            })
            .unwrap();
        assert_eq!(count, Some(1));
        assert_eq!(db.load("usage").unwrap(), Some(json!({"echo": 1})));
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let db = Database::open(&path).unwrap();
            db.dump("schedule", &json!([])).unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.cached("schedule"), Some(json!([])));
    }

    #[test]
    fn concurrent_updates_are_serialized() {
        let (db, _dir) = create_test_db();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        db.with_collection("counter", |v| {
                            let n = v.get("n").and_then(Value::as_u64).unwrap_or(0);
                            *v = json!({"n": n + 1});
                        })
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(db.cached("counter"), Some(json!({"n": 80})));
    }
}
