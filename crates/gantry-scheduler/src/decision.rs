//! Snapshots handed to policies and the decisions they return.

use std::fmt;

use gantry_actuator::{ActuatorView, ResourceView};
use gantry_core::{Position, SourceId, StationId, Task};
use gantry_station::StationView;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Everything a policy may look at, copied out of the live state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Stations in scan order (`stations[i].index == i`).
    pub stations: Vec<StationView>,
    pub pool: ResourceView,
    pub actuator: ActuatorView,
    /// Rest position the actuator parks at.
    pub rest: Position,
    pub now: Instant,
}

impl Snapshot {
    pub fn all_complete(&self) -> bool {
        self.stations.iter().all(|s| s.is_complete())
    }

    /// Sources that queued heads still need, unprimed, lowest id first.
    /// Empty when the actuator cannot prime at all.
    pub fn unprimed_sources(&self) -> Vec<SourceId> {
        if !self.actuator.can_prime {
            return Vec::new();
        }
        let mut ids: Vec<SourceId> = self
            .stations
            .iter()
            .filter(|s| !s.is_complete())
            .filter_map(|s| s.head.as_ref())
            .filter(|task| task.amount > 0.0 && self.pool.can_serve(task))
            .map(|task| task.source_id.clone())
            .filter(|id| !self.pool.is_primed(id))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Why a queue head was passed over without running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UnknownSource {
        source: SourceId,
    },
    InsufficientResource {
        source: SourceId,
        requested: f64,
        available: f64,
    },
    /// The dispatch failed and the retry budget is spent.
    DispatchFailed {
        error: String,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnknownSource { source } => write!(f, "unknown source {source}"),
            SkipReason::InsufficientResource {
                source,
                requested,
                available,
            } => write!(f, "source {source} holds {available}, task needs {requested}"),
            SkipReason::DispatchFailed { error } => write!(f, "dispatch failed: {error}"),
        }
    }
}

/// Housekeeping the run loop may do while no station can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum IdleHint {
    /// Nothing useful to do; sleep one poll interval.
    Wait,
    /// Return to the rest position.
    Park,
    /// Prime this source's line.
    Prime { source: SourceId },
    /// Prime `source` if needed and pre-position over `station`, which is
    /// expected to free up next.
    Stage { station: StationId, source: SourceId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleDecision {
    /// Dequeue `task` from `station` and run it.
    Dispatch { station: StationId, task: Task },
    /// Dequeue `task` from `station` without running it.
    Skip {
        station: StationId,
        task: Task,
        reason: SkipReason,
    },
    /// No station is ready.
    Idle(IdleHint),
}

impl ScheduleDecision {
    pub fn is_idle(&self) -> bool {
        matches!(self, ScheduleDecision::Idle(_))
    }
}

/// Why `task` can't be served from the pool, if it can't.
pub fn infeasibility(pool: &ResourceView, task: &Task) -> Option<SkipReason> {
    if pool.can_serve(task) {
        return None;
    }
    Some(match pool.get(&task.source_id) {
        None => SkipReason::UnknownSource {
            source: task.source_id.clone(),
        },
        Some(source) => SkipReason::InsufficientResource {
            source: task.source_id.clone(),
            requested: task.amount,
            available: source.volume,
        },
    })
}

/// Dispatch or skip the head of `station`.
pub(crate) fn decide_head(pool: &ResourceView, station: &StationView) -> Option<ScheduleDecision> {
    let task = station.head.clone()?;
    Some(match infeasibility(pool, &task) {
        None => ScheduleDecision::Dispatch {
            station: station.id.clone(),
            task,
        },
        Some(reason) => ScheduleDecision::Skip {
            station: station.id.clone(),
            task,
            reason,
        },
    })
}

/// Immediate admission: the first Idle station with work, in index order.
pub(crate) fn admit_first_ready(snapshot: &Snapshot) -> Option<ScheduleDecision> {
    snapshot
        .stations
        .iter()
        .find(|s| s.is_ready())
        .and_then(|s| decide_head(&snapshot.pool, s))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Snapshot builders shared by the policy tests.

    use std::collections::BTreeMap;
    use std::time::Duration;

    use gantry_actuator::{ActuatorView, ResourceView, SourceView};
    use gantry_core::{Position, SourceId, Task};
    use gantry_station::{StationState, StationView};
    use tokio::time::Instant;

    use super::Snapshot;

    pub fn task(station: &str, source: &str, amount: f64, seq: usize) -> Task {
        Task {
            station_id: station.into(),
            source_id: source.into(),
            amount,
            phases: vec![],
            seq,
            attempts: 0,
        }
    }

    pub fn station(index: usize, id: &str, state: StationState, queue: &[Task]) -> StationView {
        StationView {
            id: id.into(),
            index,
            position: Position::on_track(-100.0 * (index as f64 + 1.0)),
            state,
            etc: None,
            head: queue.first().cloned(),
            queue_len: queue.len(),
        }
    }

    pub fn busy_until(mut view: StationView, now: Instant, secs: u64) -> StationView {
        view.state = StationState::Busy;
        view.etc = Some(now + Duration::from_secs(secs));
        view
    }

    pub fn pool(sources: &[(&str, f64, bool)]) -> ResourceView {
        ResourceView {
            sources: sources
                .iter()
                .map(|(id, volume, primed)| {
                    (
                        SourceId::new(*id),
                        SourceView {
                            id: SourceId::new(*id),
                            reagent: None,
                            capacity: 100.0,
                            volume: *volume,
                            primed: *primed,
                            offset: Position::ORIGIN,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    pub fn snapshot(stations: Vec<StationView>, pool: ResourceView, now: Instant) -> Snapshot {
        Snapshot {
            stations,
            pool,
            actuator: ActuatorView {
                position: Position::ORIGIN,
                busy: false,
                can_prime: true,
            },
            rest: Position::ORIGIN,
            now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use gantry_station::StationState;

    #[test]
    fn infeasible_head_is_skipped_with_reason() {
        let now = Instant::now();
        let snap = snapshot(
            vec![station(0, "A", StationState::Idle, &[task("A", "s0", 50.0, 0)])],
            pool(&[("s0", 20.0, false)]),
            now,
        );
        match admit_first_ready(&snap) {
            Some(ScheduleDecision::Skip { reason, .. }) => assert_eq!(
                reason,
                SkipReason::InsufficientResource {
                    source: "s0".into(),
                    requested: 50.0,
                    available: 20.0
                }
            ),
            other => panic!("expected skip, got {other:?}"),
        }
    }

    #[test]
    fn unknown_source_reason() {
        let t = task("A", "nope", 1.0, 0);
        assert_eq!(
            infeasibility(&pool(&[]), &t),
            Some(SkipReason::UnknownSource {
                source: "nope".into()
            })
        );
    }

    #[test]
    fn unprimed_sources_are_sorted_and_deduplicated() {
        let now = Instant::now();
        let snap = snapshot(
            vec![
                station(0, "A", StationState::Busy, &[task("A", "s1", 1.0, 0)]),
                station(1, "B", StationState::Busy, &[task("B", "s0", 1.0, 0)]),
                station(2, "C", StationState::Busy, &[task("C", "s1", 1.0, 0)]),
                station(3, "D", StationState::Busy, &[task("D", "s2", 1.0, 0)]),
            ],
            pool(&[("s0", 10.0, false), ("s1", 10.0, false), ("s2", 10.0, true)]),
            now,
        );
        assert_eq!(
            snap.unprimed_sources(),
            vec![SourceId::new("s0"), SourceId::new("s1")]
        );
    }

    #[test]
    fn skip_reason_serializes_tagged() {
        let json = serde_json::to_string(&SkipReason::UnknownSource {
            source: "s9".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"unknown_source","source":"s9"}"#);
    }
}
