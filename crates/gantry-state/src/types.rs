//! Records persisted by the run loop.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use gantry_core::{Position, SourceId, StationId};
use serde::{Deserialize, Serialize};

/// Point in the run a snapshot was taken at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// After preparation, before the first dispatch.
    Prepared,
    /// After a task was transferred and its local process started.
    Dispatch,
    /// After cleanup, with the final resource levels and position.
    Teardown,
}

/// Serializable state of a run at one instant, enough to resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub run_id: String,
    pub seq: u64,
    pub kind: SnapshotKind,
    pub station_id: Option<StationId>,
    pub task_index: Option<usize>,
    pub resource_levels: BTreeMap<SourceId, f64>,
    pub actuator_position: Position,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    /// Wall-clock time, unix milliseconds.
    pub recorded_at: u64,
}

impl StateSnapshot {
    pub fn table_key(&self) -> String {
        snapshot_key(&self.run_id, self.seq)
    }
}

pub(crate) fn snapshot_key(run_id: &str, seq: u64) -> String {
    format!("{run_id}:{seq:010}")
}

/// One experiment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment: String,
    pub policy: String,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    /// Final outcome (`completed`, `timed_out`, ...) once the run is over.
    pub outcome: Option<String>,
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A fresh run id derived from the wall clock.
pub fn new_run_id() -> String {
    format!("run-{}", now_millis())
}
