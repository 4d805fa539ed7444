//! SnapshotStore: redb-backed persistence for run snapshots.
//!
//! Values are JSON in `&[u8]` columns. The store opens on disk for real
//! runs and in memory for tests.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Stringify a redb error into the given `StateError` variant.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe snapshot store backed by redb.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "snapshot store opened");
        Ok(store)
    }

    /// Open the store file inside a state directory, creating the directory.
    pub fn open_dir(dir: &Path) -> StateResult<Self> {
        std::fs::create_dir_all(dir).map_err(map_err!(Open))?;
        Self::open(&dir.join("gantry.redb"))
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory snapshot store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        txn.open_table(SNAPSHOTS).map_err(map_err!(Storage))?;
        txn.open_table(RUNS).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Storage))?;
        Ok(())
    }

    // ── Snapshots ──────────────────────────────────────────────────

    pub fn put_snapshot(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        let key = snapshot.table_key();
        let value = serde_json::to_vec(snapshot).map_err(StateError::encode(&key))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(SNAPSHOTS).map_err(map_err!(Storage))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(%key, kind = ?snapshot.kind, "snapshot stored");
        Ok(())
    }

    pub fn get_snapshot(&self, run_id: &str, seq: u64) -> StateResult<Option<StateSnapshot>> {
        let key = snapshot_key(run_id, seq);
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Storage))?;
        match table.get(key.as_str()).map_err(map_err!(Storage))? {
            Some(guard) => {
                let snapshot: StateSnapshot =
                    serde_json::from_slice(guard.value()).map_err(StateError::corrupt(&key))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// All snapshots of one run, in recording order.
    pub fn list_for_run(&self, run_id: &str) -> StateResult<Vec<StateSnapshot>> {
        let prefix = format!("{run_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            if key.value().starts_with(&prefix) {
                let snapshot: StateSnapshot = serde_json::from_slice(value.value())
                    .map_err(StateError::corrupt(key.value()))?;
                results.push(snapshot);
            }
        }
        Ok(results)
    }

    /// The most recently recorded snapshot across all runs.
    pub fn latest(&self) -> StateResult<Option<StateSnapshot>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(SNAPSHOTS).map_err(map_err!(Storage))?;
        let mut latest: Option<StateSnapshot> = None;
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let snapshot: StateSnapshot = serde_json::from_slice(value.value())
                .map_err(StateError::corrupt(key.value()))?;
            let newer = latest.as_ref().is_none_or(|current| {
                (snapshot.recorded_at, snapshot.seq) >= (current.recorded_at, current.seq)
            });
            if newer {
                latest = Some(snapshot);
            }
        }
        Ok(latest)
    }

    // ── Runs ───────────────────────────────────────────────────────

    pub fn put_run(&self, run: &RunRecord) -> StateResult<()> {
        let value = serde_json::to_vec(run).map_err(StateError::encode(&run.run_id))?;
        let txn = self.db.begin_write().map_err(map_err!(Storage))?;
        {
            let mut table = txn.open_table(RUNS).map_err(map_err!(Storage))?;
            table
                .insert(run.run_id.as_str(), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Storage))?;
        debug!(run_id = %run.run_id, outcome = ?run.outcome, "run stored");
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> StateResult<Option<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Storage))?;
        match table.get(run_id).map_err(map_err!(Storage))? {
            Some(guard) => {
                let run: RunRecord =
                    serde_json::from_slice(guard.value()).map_err(StateError::corrupt(run_id))?;
                Ok(Some(run))
            }
            None => Ok(None),
        }
    }

    /// All runs, oldest first.
    pub fn list_runs(&self) -> StateResult<Vec<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Storage))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (key, value) = entry.map_err(map_err!(Storage))?;
            let run: RunRecord = serde_json::from_slice(value.value())
                .map_err(StateError::corrupt(key.value()))?;
            results.push(run);
        }
        results.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(results)
    }
}
