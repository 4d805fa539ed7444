//! Where the run loop sends its snapshots.

use std::sync::Mutex;

use crate::error::StateResult;
use crate::store::SnapshotStore;
use crate::types::{RunRecord, StateSnapshot};

/// Receives snapshots on every dispatch and at teardown.
pub trait SnapshotSink: Send + Sync {
    fn record(&self, snapshot: &StateSnapshot) -> StateResult<()>;

    /// Record or update the run itself.
    fn record_run(&self, _run: &RunRecord) -> StateResult<()> {
        Ok(())
    }
}

impl SnapshotSink for SnapshotStore {
    fn record(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        self.put_snapshot(snapshot)
    }

    fn record_run(&self, run: &RunRecord) -> StateResult<()> {
        self.put_run(run)
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl SnapshotSink for NullSink {
    fn record(&self, _snapshot: &StateSnapshot) -> StateResult<()> {
        Ok(())
    }
}

/// Keeps snapshots in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<StateSnapshot>>,
    runs: Mutex<Vec<RunRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<StateSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SnapshotSink for MemorySink {
    fn record(&self, snapshot: &StateSnapshot) -> StateResult<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(snapshot.clone());
        Ok(())
    }

    fn record_run(&self, run: &RunRecord) -> StateResult<()> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotKind;
    use gantry_core::Position;
    use std::collections::BTreeMap;

    fn teardown(run_id: &str) -> StateSnapshot {
        StateSnapshot {
            run_id: run_id.to_string(),
            seq: 0,
            kind: SnapshotKind::Teardown,
            station_id: None,
            task_index: None,
            resource_levels: BTreeMap::new(),
            actuator_position: Position::ORIGIN,
            elapsed_ms: 0,
            recorded_at: 1,
        }
    }

    #[test]
    fn store_as_sink() {
        let store = SnapshotStore::open_in_memory().unwrap();
        let sink: &dyn SnapshotSink = &store;
        sink.record(&teardown("run-1")).unwrap();
        assert_eq!(store.list_for_run("run-1").unwrap().len(), 1);
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(&teardown("a")).unwrap();
        sink.record(&teardown("b")).unwrap();
        let ids: Vec<_> = sink.snapshots().into_iter().map(|s| s.run_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
