//! Snapshot persistence backends.
//!
//! A snapshot is the full materialized state of an aggregate at a given
//! version; writing one replaces any prior snapshot for that identity.
//! Backends implement [`SnapshotStore`] with a JSON-valued boundary so a
//! single store can hold snapshots for any owner type; [`Persistence`]
//! (in the `persistence` module) does the typed (de)serialization.
//!
//! [`FsSnapshotStore`] stores JSON files at
//! `<base_dir>/<owner_type>/<key>/snapshot.json`. Writes are atomic via a
//! temp-rename pattern to prevent corruption from crashes mid-write.
//!
//! [`Persistence`]: crate::persistence::Persistence

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::PersistenceError;

/// A point-in-time snapshot of an aggregate's state.
///
/// `version` records how many events have been folded into `state`, so
/// catch-up after a load can resume from `version`. A snapshot is a full
/// replacement, never a diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Serialize", deserialize = "S: DeserializeOwned"))]
pub struct Snapshot<S> {
    /// The aggregate state at the time of the snapshot.
    pub state: S,
    /// Number of events folded into `state` at snapshot time.
    pub version: u64,
}

/// Per-identity snapshot storage with version-conditioned writes.
///
/// `write` must reject the snapshot when `expected_version` differs from
/// the currently persisted version (0 when no snapshot exists), leaving the
/// stored snapshot untouched. The grain layer prevents concurrent writers;
/// this check is the second guard against callers bypassing it.
pub trait SnapshotStore: Send + Sync + 'static {
    /// Load the latest snapshot for `(owner_type, key)`, or `None` when the
    /// identity has never been written.
    fn load(
        &self,
        owner_type: &str,
        key: &str,
    ) -> Result<Option<Snapshot<serde_json::Value>>, PersistenceError>;

    /// Replace the snapshot for `(owner_type, key)`, conditioned on
    /// `expected_version` matching the currently persisted version.
    fn write(
        &self,
        owner_type: &str,
        key: &str,
        snapshot: &Snapshot<serde_json::Value>,
        expected_version: u64,
    ) -> Result<(), PersistenceError>;
}

/// File-based [`SnapshotStore`] storing one JSON document per identity.
pub struct FsSnapshotStore {
    base_dir: PathBuf,
    // Serializes the read-compare-write sequence within this process.
    write_guard: Mutex<()>,
}

impl FsSnapshotStore {
    /// Create a store rooted at `base_dir`. The directory is created lazily
    /// on first write.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_owned(),
            write_guard: Mutex::new(()),
        }
    }

    fn snapshot_path(&self, owner_type: &str, key: &str) -> PathBuf {
        self.base_dir.join(owner_type).join(key).join("snapshot.json")
    }

    fn read_file(&self, path: &Path) -> Result<Option<Snapshot<serde_json::Value>>, PersistenceError> {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<Snapshot<serde_json::Value>>(&bytes) {
            Ok(snap) => Ok(Some(snap)),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to deserialize snapshot; treating as missing"
                );
                Ok(None)
            }
        }
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn load(
        &self,
        owner_type: &str,
        key: &str,
    ) -> Result<Option<Snapshot<serde_json::Value>>, PersistenceError> {
        self.read_file(&self.snapshot_path(owner_type, key))
    }

    fn write(
        &self,
        owner_type: &str,
        key: &str,
        snapshot: &Snapshot<serde_json::Value>,
        expected_version: u64,
    ) -> Result<(), PersistenceError> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let path = self.snapshot_path(owner_type, key);
        let actual = self.read_file(&path)?.map(|s| s.version).unwrap_or(0);
        if actual != expected_version {
            return Err(PersistenceError::Conflict {
                expected: expected_version,
                actual,
            });
        }

        let dir = path
            .parent()
            .expect("snapshot path always has a parent directory");
        std::fs::create_dir_all(dir)?;

        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

/// In-memory [`SnapshotStore`] used in tests and embedded scenarios.
///
/// Tracks the total number of accepted writes so tests can assert the
/// one-write-per-mutation behavior of grains.
#[derive(Default)]
pub struct MemSnapshotStore {
    inner: Mutex<HashMap<(String, String), Snapshot<serde_json::Value>>>,
    writes: AtomicU64,
}

impl MemSnapshotStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of accepted snapshot writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }
}

impl SnapshotStore for MemSnapshotStore {
    fn load(
        &self,
        owner_type: &str,
        key: &str,
    ) -> Result<Option<Snapshot<serde_json::Value>>, PersistenceError> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner.get(&(owner_type.to_owned(), key.to_owned())).cloned())
    }

    fn write(
        &self,
        owner_type: &str,
        key: &str,
        snapshot: &Snapshot<serde_json::Value>,
        expected_version: u64,
    ) -> Result<(), PersistenceError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let slot = (owner_type.to_owned(), key.to_owned());
        let actual = inner.get(&slot).map(|s| s.version).unwrap_or(0);
        if actual != expected_version {
            return Err(PersistenceError::Conflict {
                expected: expected_version,
                actual,
            });
        }
        inner.insert(slot, snapshot.clone());
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(value: serde_json::Value, version: u64) -> Snapshot<serde_json::Value> {
        Snapshot {
            state: value,
            version,
        }
    }

    #[test]
    fn fs_save_then_load_roundtrips() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());

        store
            .write("app", "a-1", &snap(json!({"value": 42}), 1), 0)
            .expect("write should succeed");

        let loaded = store
            .load("app", "a-1")
            .expect("load should succeed")
            .expect("snapshot should exist");
        assert_eq!(loaded.state["value"], 42);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn fs_load_nonexistent_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());
        let result = store.load("app", "no-such-id").expect("load should succeed");
        assert!(result.is_none());
    }

    #[test]
    fn fs_load_corrupt_json_returns_none() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());
        let path = store.snapshot_path("app", "a-bad");
        std::fs::create_dir_all(path.parent().unwrap()).expect("create dir");
        std::fs::write(&path, b"this is not valid json!!!").expect("write corrupt file");

        let result = store.load("app", "a-bad").expect("load should succeed (not Err)");
        assert!(
            result.is_none(),
            "corrupt JSON should load as None, not Some(...)"
        );
    }

    #[test]
    fn fs_write_rejects_stale_expected_version() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());

        store
            .write("app", "a-1", &snap(json!({"value": 1}), 1), 0)
            .expect("first write should succeed");

        // A second writer that still believes version 0 is persisted must
        // be rejected without changing the stored snapshot.
        let err = store
            .write("app", "a-1", &snap(json!({"value": 99}), 1), 0)
            .expect_err("stale write should fail");
        assert!(matches!(
            err,
            PersistenceError::Conflict {
                expected: 0,
                actual: 1
            }
        ));

        let loaded = store.load("app", "a-1").unwrap().unwrap();
        assert_eq!(loaded.state["value"], 1, "rejected write must not change state");
    }

    #[test]
    fn fs_write_replaces_prior_snapshot() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());

        store
            .write("app", "a-1", &snap(json!({"value": 1}), 1), 0)
            .expect("first write should succeed");
        store
            .write("app", "a-1", &snap(json!({"value": 2}), 2), 1)
            .expect("second write should succeed");

        let loaded = store.load("app", "a-1").unwrap().unwrap();
        assert_eq!(loaded.state["value"], 2);
        assert_eq!(loaded.version, 2);
    }

    #[test]
    fn fs_write_uses_atomic_temp_rename() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = FsSnapshotStore::new(dir.path());

        store
            .write("app", "a-atomic", &snap(json!({}), 1), 0)
            .expect("write should succeed");

        let final_path = store.snapshot_path("app", "a-atomic");
        let tmp_path = final_path.with_extension("json.tmp");
        assert!(final_path.exists(), "final snapshot file should exist");
        assert!(
            !tmp_path.exists(),
            "temp file should not exist after successful write"
        );
    }

    #[test]
    fn mem_store_counts_accepted_writes_only() {
        let store = MemSnapshotStore::new();
        store
            .write("app", "a-1", &snap(json!({}), 1), 0)
            .expect("write should succeed");
        assert_eq!(store.write_count(), 1);

        let _ = store
            .write("app", "a-1", &snap(json!({}), 1), 0)
            .expect_err("stale write should fail");
        assert_eq!(store.write_count(), 1, "rejected writes are not counted");

        store
            .write("app", "a-1", &snap(json!({}), 2), 1)
            .expect("write should succeed");
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn mem_store_isolates_identities() {
        let store = MemSnapshotStore::new();
        store.write("app", "a-1", &snap(json!(1), 1), 0).unwrap();
        store.write("app", "a-2", &snap(json!(2), 1), 0).unwrap();
        store.write("schema", "a-1", &snap(json!(3), 1), 0).unwrap();

        assert_eq!(store.load("app", "a-1").unwrap().unwrap().state, json!(1));
        assert_eq!(store.load("app", "a-2").unwrap().unwrap().state, json!(2));
        assert_eq!(store.load("schema", "a-1").unwrap().unwrap().state, json!(3));
    }
}
