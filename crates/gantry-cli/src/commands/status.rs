//! `gantry status`: what the snapshot store holds.

use std::path::Path;

use anyhow::{Context, Result};
use gantry_state::{RunRecord, SnapshotStore, StateSnapshot};

pub fn status(state_dir: &Path, limit: usize) -> Result<i32> {
    let store = SnapshotStore::open_dir(state_dir)
        .with_context(|| format!("opening snapshot store in {}", state_dir.display()))?;

    match store.latest()? {
        Some(snapshot) => print!("{}", render_snapshot(&snapshot)),
        None => println!("no snapshots in {}", state_dir.display()),
    }

    let mut runs = store.list_runs()?;
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    if !runs.is_empty() {
        println!();
        print!("{}", render_runs(&runs[..runs.len().min(limit)]));
    }
    Ok(0)
}

fn render_snapshot(snapshot: &StateSnapshot) -> String {
    let at = match (&snapshot.station_id, snapshot.task_index) {
        (Some(station), Some(task)) => format!(" after {station} task {task}"),
        _ => String::new(),
    };
    let kind = serde_json::to_value(snapshot.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    let mut out = format!(
        "latest snapshot: {} #{} ({kind}{at}), +{:.1}s\nactuator at {}\n",
        snapshot.run_id,
        snapshot.seq,
        snapshot.elapsed_ms as f64 / 1000.0,
        snapshot.actuator_position
    );
    for (id, level) in &snapshot.resource_levels {
        out.push_str(&format!("  {:<10} {level:>10.2}\n", id.as_str()));
    }
    out
}

fn render_runs(runs: &[RunRecord]) -> String {
    let mut out = format!("{:<20} {:<16} {:<12} {}\n", "RUN", "EXPERIMENT", "POLICY", "OUTCOME");
    for run in runs {
        out.push_str(&format!(
            "{:<20} {:<16} {:<12} {}\n",
            run.run_id,
            run.experiment,
            run.policy,
            run.outcome.as_deref().unwrap_or("running")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{Position, SourceId};
    use gantry_state::SnapshotKind;
    use std::collections::BTreeMap;

    #[test]
    fn snapshot_names_last_dispatch() {
        let snapshot = StateSnapshot {
            run_id: "run-7".into(),
            seq: 4,
            kind: SnapshotKind::Dispatch,
            station_id: Some("B".into()),
            task_index: Some(1),
            resource_levels: BTreeMap::from([(SourceId::new("s0"), 70.0)]),
            actuator_position: Position::on_track(-200.0),
            elapsed_ms: 12_500,
            recorded_at: 0,
        };
        let text = render_snapshot(&snapshot);
        assert!(text.contains("run-7 #4 (dispatch after B task 1), +12.5s"));
        assert!(text.contains("70.00"));
    }

    #[test]
    fn unfinished_run_shows_running() {
        let text = render_runs(&[RunRecord {
            run_id: "run-1".into(),
            experiment: "paraspin".into(),
            policy: "scanning".into(),
            started_at: 1,
            finished_at: None,
            outcome: None,
        }]);
        assert!(text.contains("running"));
    }
}
