//! Persistence of last-seen trigger markers.
//!
//! A marker is the commit SHA (or time slot) a schedule last fired for on a
//! given branch. Stores must survive process restarts so a restarted trigger
//! does not fire twice for the same commit.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{MatrixError, Result};

/// Storage seam for trigger markers.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    /// Last marker recorded for `(schedule, branch)`, if any.
    async fn last_marker(&self, schedule: &str, branch: &str) -> Result<Option<String>>;

    /// Replace the marker for `(schedule, branch)`.
    async fn record_marker(&self, schedule: &str, branch: &str, marker: &str) -> Result<()>;

    /// Replace several `(schedule, marker)` pairs for one branch.
    ///
    /// Stores that can write all pairs at once should override this; the
    /// default records them one by one.
    async fn record_markers(&self, branch: &str, markers: &[(String, String)]) -> Result<()> {
        for (schedule, marker) in markers {
            self.record_marker(schedule, branch, marker).await?;
        }
        Ok(())
    }
}

/// One persisted marker entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkerEntry {
    pub marker: String,
    pub recorded_at: DateTime<Utc>,
}

type MarkerTable = BTreeMap<String, BTreeMap<String, MarkerEntry>>;

/// JSON-file marker store.
///
/// Layout: `{ "<schedule>": { "<branch>": { "marker": .., "recorded_at": .. } } }`.
/// Every write replaces the file atomically (temp file + rename in the same directory).
pub struct FsMarkerStore {
    path: PathBuf,
    table: Mutex<MarkerTable>,
}

impl FsMarkerStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let table = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => MarkerTable::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MarkerTable::new(),
            Err(e) => return Err(MatrixError::Io(e)),
        };
        debug!(path = %path.display(), schedules = table.len(), "opened marker store");
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, table: &MarkerTable) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&serde_json::to_vec_pretty(table)?)?;
        tmp.persist(&self.path).map_err(|e| MatrixError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl MarkerStore for FsMarkerStore {
    async fn last_marker(&self, schedule: &str, branch: &str) -> Result<Option<String>> {
        let table = self
            .table
            .lock()
            .map_err(|_| MatrixError::MarkerStore("marker table lock poisoned".to_string()))?;
        Ok(table
            .get(schedule)
            .and_then(|branches| branches.get(branch))
            .map(|entry| entry.marker.clone()))
    }

    async fn record_marker(&self, schedule: &str, branch: &str, marker: &str) -> Result<()> {
        self.record_markers(branch, &[(schedule.to_string(), marker.to_string())])
            .await
    }

    /// One file write for all pairs. The in-memory table only changes once
    /// the write has succeeded.
    async fn record_markers(&self, branch: &str, markers: &[(String, String)]) -> Result<()> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| MatrixError::MarkerStore("marker table lock poisoned".to_string()))?;
        let mut updated = table.clone();
        let recorded_at = Utc::now();
        for (schedule, marker) in markers {
            updated.entry(schedule.clone()).or_default().insert(
                branch.to_string(),
                MarkerEntry {
                    marker: marker.clone(),
                    recorded_at,
                },
            );
        }
        self.persist(&updated)?;
        *table = updated;
        Ok(())
    }
}

/// In-memory marker store for tests.
#[derive(Debug, Default)]
pub struct MemoryMarkerStore {
    markers: Mutex<HashMap<(String, String), String>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarkerStore for MemoryMarkerStore {
    async fn last_marker(&self, schedule: &str, branch: &str) -> Result<Option<String>> {
        let markers = self.markers.lock().unwrap();
        Ok(markers
            .get(&(schedule.to_string(), branch.to_string()))
            .cloned())
    }

    async fn record_marker(&self, schedule: &str, branch: &str, marker: &str) -> Result<()> {
        let mut markers = self.markers.lock().unwrap();
        markers.insert(
            (schedule.to_string(), branch.to_string()),
            marker.to_string(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMarkerStore::open(dir.path().join("markers.json")).unwrap();
        assert_eq!(store.last_marker("commit_master", "master").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("markers.json");

        let store = FsMarkerStore::open(&path).unwrap();
        store
            .record_marker("commit_master", "master", "abc123")
            .await
            .unwrap();
        drop(store);

        let reopened = FsMarkerStore::open(&path).unwrap();
        assert_eq!(
            reopened.last_marker("commit_master", "master").await.unwrap(),
            Some("abc123".to_string())
        );
        assert_eq!(reopened.last_marker("commit_master", "dev").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_store_overwrites_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsMarkerStore::open(dir.path().join("markers.json")).unwrap();
        store.record_marker("nightly", "master", "2026-10-16").await.unwrap();
        store.record_marker("nightly", "master", "2026-10-17").await.unwrap();
        assert_eq!(
            store.last_marker("nightly", "master").await.unwrap(),
            Some("2026-10-17".to_string())
        );
    }

    #[tokio::test]
    async fn test_fs_store_failed_write_leaves_markers_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let store = FsMarkerStore::open(state.join("markers.json")).unwrap();
        // The store directory cannot be created once a file holds its name.
        std::fs::write(&state, "not a directory").unwrap();

        assert!(store.record_marker("commit", "master", "abc123").await.is_err());
        assert_eq!(store.last_marker("commit", "master").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_store_records_batch_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        let store = FsMarkerStore::open(&path).unwrap();
        store
            .record_markers(
                "master",
                &[
                    ("commit".to_string(), "abc123".to_string()),
                    ("adhoc".to_string(), "req-1".to_string()),
                ],
            )
            .await
            .unwrap();

        let reopened = FsMarkerStore::open(&path).unwrap();
        assert_eq!(
            reopened.last_marker("commit", "master").await.unwrap().as_deref(),
            Some("abc123")
        );
        assert_eq!(
            reopened.last_marker("adhoc", "master").await.unwrap().as_deref(),
            Some("req-1")
        );
    }

    #[test]
    fn test_fs_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markers.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FsMarkerStore::open(&path),
            Err(MatrixError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryMarkerStore::new();
        store.record_marker("s", "b", "m").await.unwrap();
        assert_eq!(store.last_marker("s", "b").await.unwrap(), Some("m".to_string()));
    }
}
